//! Shared pool of message buffers
//!
//! Every inbound message is copied out of the frame reader into a buffer
//! rented from a [`BufferPool`]. The rented [`PooledBuffer`] goes back to its
//! pool when it is dropped, so a buffer is returned exactly once on whichever
//! path finishes with the message.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Buffers that grew past this capacity are freed instead of pooled
const MAX_RETAINED_CAPACITY: usize = 1 << 20;

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
    outstanding: AtomicUsize,
}

/// A bounded pool of reusable byte buffers
///
/// Cloning a `BufferPool` yields another handle to the same pool.
///
/// # Examples
///
/// ```rust
/// use framerpc_core::BufferPool;
///
/// let pool = BufferPool::new(4);
/// let message = pool.rent_copy(br#"{"jsonrpc":"2.0"}"#);
/// assert_eq!(pool.outstanding(), 1);
/// drop(message);
/// assert_eq!(pool.outstanding(), 0);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool that keeps at most `max_pooled` idle buffers
    pub fn new(max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_pooled)),
                max_pooled,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Rent an empty buffer with room for at least `capacity` bytes
    pub fn rent(&self, capacity: usize) -> PooledBuffer {
        let reused = match self.inner.free.lock() {
            Ok(mut free) => free.pop(),
            Err(_) => None,
        };
        let mut buf = reused.unwrap_or_default();
        buf.clear();
        buf.reserve(capacity);
        self.inner.outstanding.fetch_add(1, Ordering::Relaxed);
        PooledBuffer {
            buf,
            pool: Some(Arc::clone(&self.inner)),
        }
    }

    /// Rent a buffer holding a copy of `bytes`
    pub fn rent_copy(&self, bytes: &[u8]) -> PooledBuffer {
        let mut rented = self.rent(bytes.len());
        rented.buf.extend_from_slice(bytes);
        rented
    }

    /// Number of buffers currently rented and not yet returned
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Relaxed)
    }

    /// Number of idle buffers waiting to be reused
    pub fn idle(&self) -> usize {
        self.inner.free.lock().map(|free| free.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(64)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("max_pooled", &self.inner.max_pooled)
            .field("outstanding", &self.outstanding())
            .field("idle", &self.idle())
            .finish()
    }
}

/// A message buffer that returns to its pool on drop
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Option<Arc<PoolInner>>,
}

impl PooledBuffer {
    /// A buffer that belongs to no pool; dropping it just frees the memory
    pub fn detached(buf: Vec<u8>) -> Self {
        Self { buf, pool: None }
    }

    /// The message bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl From<Vec<u8>> for PooledBuffer {
    fn from(buf: Vec<u8>) -> Self {
        PooledBuffer::detached(buf)
    }
}

impl From<&[u8]> for PooledBuffer {
    fn from(bytes: &[u8]) -> Self {
        PooledBuffer::detached(bytes.to_vec())
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        pool.outstanding.fetch_sub(1, Ordering::Relaxed);

        let mut buf = std::mem::take(&mut self.buf);
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        if let Ok(mut free) = pool.free.lock() {
            if free.len() < pool.max_pooled {
                free.push(buf);
            }
        };
    }
}
