//! Tensor sources: the flat, named records the decoder turns into nested values.
//!
//! A source only has to enumerate its records. Each record knows its dotted name, its
//! declared byte size, its dimensions (minor-to-major, as stored) and how to open a stream
//! over its bytes. Parsing container headers is left to the caller; [`FileSource`] takes an
//! already parsed index of [`TensorEntry`] values.

use core::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::Error;

/// Element type of a stored tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
    /// 16-bit floating point
    F16,
    /// Brain floating point
    BF16,
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 8-bit integer
    I8,
    /// 8-bit unsigned integer
    U8,
    /// Boolean
    Bool,
    /// Container specific type id (quantized blocks and the like)
    Other(u32),
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
            DType::I32 => write!(f, "i32"),
            DType::I64 => write!(f, "i64"),
            DType::I8 => write!(f, "i8"),
            DType::U8 => write!(f, "u8"),
            DType::Bool => write!(f, "bool"),
            DType::Other(id) => write!(f, "type#{id}"),
        }
    }
}

/// One named tensor of a [`TensorSource`].
///
/// Implementations may assume that at most one stream returned by [`TensorRecord::open`]
/// is alive at a time across the whole source; the decoder serializes calls through a
/// [`ReaderGate`](crate::ReaderGate).
pub trait TensorRecord: Send + Sync {
    /// Dotted path of the tensor, e.g. `layers.3.weight`.
    fn name(&self) -> &str;

    /// Total size in bytes of the tensor data.
    fn byte_size(&self) -> u64;

    /// Dimensions in minor-to-major order.
    fn dimensions(&self) -> &[u64];

    /// Element type of the stored data.
    fn dtype(&self) -> DType {
        DType::F32
    }

    /// Opens a stream over the tensor bytes.
    fn open(&self) -> io::Result<Box<dyn Read + '_>>;
}

/// An enumerable set of tensor records.
pub trait TensorSource {
    /// Record type produced by the source.
    type Record: TensorRecord;

    /// Lists every record of the source. No tensor data is read.
    fn records(&self) -> Result<Vec<Self::Record>, Error>;
}

impl<R: TensorRecord + Clone> TensorSource for Vec<R> {
    type Record = R;

    fn records(&self) -> Result<Vec<R>, Error> {
        Ok(self.clone())
    }
}

/// A record whose bytes already live in memory.
#[derive(new, Debug, Clone)]
pub struct MemoryRecord {
    name: String,
    byte_size: u64,
    dimensions: Vec<u64>,
    dtype: DType,
    data: Arc<[u8]>,
}

impl MemoryRecord {
    /// Create a record from raw bytes. The declared byte size is the buffer length.
    pub fn from_bytes(name: impl Into<String>, dimensions: Vec<u64>, bytes: Vec<u8>) -> Self {
        Self::new(
            name.into(),
            bytes.len() as u64,
            dimensions,
            DType::F32,
            bytes.into(),
        )
    }

    /// Create an `f32` record, encoding the values in native byte order.
    pub fn from_f32(name: impl Into<String>, dimensions: Vec<u64>, values: &[f32]) -> Self {
        Self::from_bytes(name, dimensions, bytemuck::cast_slice::<f32, u8>(values).to_vec())
    }

    /// Override the declared byte size, which may then disagree with the stored bytes.
    pub fn with_byte_size(mut self, byte_size: u64) -> Self {
        self.byte_size = byte_size;
        self
    }

    /// Override the declared element type.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }
}

impl TensorRecord for MemoryRecord {
    fn name(&self) -> &str {
        &self.name
    }

    fn byte_size(&self) -> u64 {
        self.byte_size
    }

    fn dimensions(&self) -> &[u64] {
        &self.dimensions
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(&self.data[..]))
    }
}

/// Location of one tensor inside a file, as found by a container parser.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct TensorEntry {
    /// Dotted path of the tensor.
    pub name: String,
    /// Absolute offset of the first byte.
    pub offset: u64,
    /// Size in bytes.
    pub byte_size: u64,
    /// Dimensions in minor-to-major order.
    pub dimensions: Vec<u64>,
    /// Element type.
    pub dtype: DType,
}

/// Tensors stored in a single file that exposes one shared cursor.
///
/// Every record of the source, and of its clones, reads through the same file handle.
/// Opening a stream waits until no other stream of the source is alive, so a thread must not
/// open a second stream while holding one.
#[derive(Debug, Clone)]
pub struct FileSource {
    file: Arc<Mutex<File>>,
    entries: Vec<TensorEntry>,
}

impl FileSource {
    /// Open `path` and attach the given tensor index.
    pub fn open<P: AsRef<Path>>(path: P, entries: Vec<TensorEntry>) -> Result<Self, Error> {
        for entry in &entries {
            if entry.offset.checked_add(entry.byte_size).is_none() {
                return Err(Error::Source(format!(
                    "Tensor '{}' has corrupted offset data: offset {} + size {} overflows",
                    entry.name, entry.offset, entry.byte_size
                )));
            }
        }

        let file = File::open(path)?;

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            entries,
        })
    }

    /// Index of the tensors in the file.
    pub fn entries(&self) -> &[TensorEntry] {
        &self.entries
    }
}

impl TensorSource for FileSource {
    type Record = FileRecord;

    fn records(&self) -> Result<Vec<FileRecord>, Error> {
        Ok(self
            .entries
            .iter()
            .map(|entry| FileRecord {
                entry: entry.clone(),
                file: self.file.clone(),
            })
            .collect())
    }
}

/// A record of a [`FileSource`].
#[derive(Debug, Clone)]
pub struct FileRecord {
    entry: TensorEntry,
    file: Arc<Mutex<File>>,
}

impl TensorRecord for FileRecord {
    fn name(&self) -> &str {
        &self.entry.name
    }

    fn byte_size(&self) -> u64 {
        self.entry.byte_size
    }

    fn dimensions(&self) -> &[u64] {
        &self.entry.dimensions
    }

    fn dtype(&self) -> DType {
        self.entry.dtype
    }

    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        // A reader that panicked mid-stream leaves the cursor anywhere; the seek resets it.
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);

        file.seek(SeekFrom::Start(self.entry.offset))?;

        Ok(Box::new(FileStream {
            file,
            remaining: self.entry.byte_size,
        }))
    }
}

/// Reads at most `remaining` bytes while holding the shared file handle.
struct FileStream<'a> {
    file: MutexGuard<'a, File>,
    remaining: u64,
}

impl Read for FileStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }

        let max = usize::try_from(self.remaining)
            .unwrap_or(usize::MAX)
            .min(buf.len());
        let read = self.file.read(&mut buf[..max])?;
        self.remaining -= read as u64;

        Ok(read)
    }
}
