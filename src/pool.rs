//! Fixed-size frame buffer pool owned by the [`Interface`](crate::interface::Interface).
//!
//! `original_source/include/nic.h` manages buffers with a `std::queue` guarded
//! by a binary semaphore, with explicit `alloc()`/`free()` calls. A bounded
//! `crossbeam::channel` already *is* a semaphore-guarded queue, and wrapping
//! the checked-out buffer in an RAII guard removes the original's most
//! common bug class (forgetting to call `free()` on an error path) while
//! keeping the same pool-conservation invariant: `free + in_flight == N`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::error::CoreError;

struct Inner {
    free_tx: Sender<Vec<u8>>,
    free_rx: Receiver<Vec<u8>>,
    in_flight: AtomicUsize,
    capacity: usize,
}

/// A fixed-capacity pool of equally-sized byte buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    pub fn new(capacity: usize, frame_size: usize) -> Self {
        let (free_tx, free_rx) = crossbeam::channel::bounded(capacity);
        for _ in 0..capacity {
            free_tx.send(vec![0u8; frame_size]).expect("pool channel has room for its own capacity");
        }
        BufferPool {
            inner: Arc::new(Inner {
                free_tx,
                free_rx,
                in_flight: AtomicUsize::new(0),
                capacity,
            }),
        }
    }

    /// Checks out a buffer. Fails with [`CoreError::BufferExhausted`] rather
    /// than blocking, matching the spec's "caller gets null/false send" rule.
    pub fn allocate(&self) -> Result<PooledBuffer, CoreError> {
        match self.inner.free_rx.try_recv() {
            Ok(buf) => {
                self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
                Ok(PooledBuffer {
                    buf: Some(buf),
                    pool: self.inner.clone(),
                })
            }
            Err(_) => Err(CoreError::BufferExhausted),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn free_count(&self) -> usize {
        self.inner.free_rx.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }
}

/// A checked-out buffer. Returned to the pool automatically on drop, which
/// is what "free the buffer" means everywhere in this crate.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<Inner>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.in_flight.fetch_sub(1, Ordering::SeqCst);
            let _ = self.pool.free_tx.send(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pool-conservation invariant: `free + in_flight == N` at all times.
    #[test]
    fn pool_is_conserved_across_alloc_and_drop() {
        let pool = BufferPool::new(4, 64);
        assert_eq!(pool.free_count() + pool.in_flight_count(), 4);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_eq!(pool.free_count() + pool.in_flight_count(), 4);
        assert_eq!(pool.in_flight_count(), 2);

        drop(a);
        assert_eq!(pool.free_count() + pool.in_flight_count(), 4);
        assert_eq!(pool.in_flight_count(), 1);

        drop(b);
        assert_eq!(pool.in_flight_count(), 0);
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn exhausted_pool_errors_instead_of_blocking() {
        let pool = BufferPool::new(1, 16);
        let _held = pool.allocate().unwrap();
        assert!(matches!(pool.allocate(), Err(CoreError::BufferExhausted)));
    }

    #[test]
    fn thousand_alloc_free_cycles_leak_nothing() {
        let pool = BufferPool::new(8, 32);
        for _ in 0..1000 {
            let bufs: Vec<_> = (0..8).map(|_| pool.allocate().unwrap()).collect();
            assert!(pool.allocate().is_err());
            drop(bufs);
        }
        assert_eq!(pool.free_count(), 8);
        assert_eq!(pool.in_flight_count(), 0);
    }
}
