//! Mutual exclusion over the single physical byte stream of a tensor container.

use std::io::{self, Read};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{Error, TensorRecord};

/// A lock whose permit marks the one open tensor stream.
///
/// The gate is generic over this trait so that tests can inject an instrumented lock.
pub trait StreamLock: Send + Sync {
    /// Permit held while a stream is open. Dropping it releases the lock.
    type Permit<'a>: 'a
    where
        Self: 'a;

    /// Blocks until no other permit is alive.
    fn acquire(&self) -> Self::Permit<'_>;
}

impl StreamLock for Mutex<()> {
    type Permit<'a> = MutexGuard<'a, ()>;

    fn acquire(&self) -> MutexGuard<'_, ()> {
        // The guarded state is `()`, a panic while holding it cannot corrupt anything.
        self.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serializes access to tensor streams so that only one is open at any instant.
#[derive(Debug, Default)]
pub struct ReaderGate<L = Mutex<()>> {
    lock: L,
}

impl ReaderGate {
    /// Create a gate backed by a standard mutex.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<L: StreamLock> ReaderGate<L> {
    /// Create a gate backed by the given lock.
    pub fn with_lock(lock: L) -> Self {
        Self { lock }
    }

    /// The underlying lock.
    pub fn lock(&self) -> &L {
        &self.lock
    }

    /// Waits for exclusive access, then opens the record's stream.
    ///
    /// The exclusivity is released when the returned stream is dropped or closed. If the
    /// record fails to open, the permit is released before the error is returned.
    pub fn open_exclusive<'a, R>(&'a self, record: &'a R) -> Result<GatedStream<'a, L>, Error>
    where
        R: TensorRecord + ?Sized,
    {
        let permit = self.lock.acquire();
        log::trace!("Opening stream for tensor '{}'", record.name());

        let stream = record.open()?;

        Ok(GatedStream {
            stream,
            _permit: permit,
        })
    }
}

/// An open tensor stream holding the gate's permit.
pub struct GatedStream<'a, L: StreamLock + 'a> {
    // Declared first so the stream is closed before the permit is released.
    stream: Box<dyn Read + 'a>,
    _permit: L::Permit<'a>,
}

impl<L: StreamLock> GatedStream<'_, L> {
    /// Closes the stream and releases the gate.
    pub fn close(self) {}
}

impl<L: StreamLock> Read for GatedStream<'_, L> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}
