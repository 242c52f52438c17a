
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{DType, MemoryRecord, TensorRecord};

/// Wraps a record and counts how many times its stream is opened.
#[derive(Debug, Clone)]
pub(crate) struct TrackedRecord {
    inner: MemoryRecord,
    opens: Arc<AtomicUsize>,
}

impl TrackedRecord {
    pub(crate) fn new(name: &str, dimensions: Vec<u64>, values: &[f32]) -> Self {
        Self {
            inner: MemoryRecord::from_f32(name, dimensions, values),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl TensorRecord for TrackedRecord {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn byte_size(&self) -> u64 {
        self.inner.byte_size()
    }

    fn dimensions(&self) -> &[u64] {
        self.inner.dimensions()
    }

    fn dtype(&self) -> DType {
        self.inner.dtype()
    }

    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open()
    }
}
