//! Connection pool augmentation.
//!
//! Bounds the number of mutating operations concurrently holding the
//! storage adapter. A counting semaphore (mutex + condvar) is acquired
//! in `before_write` and released in `after_write`, so the bound covers
//! the whole storage-plus-index update tuple.

use std::sync::{Condvar, Mutex};

use crate::error::Result;

use super::{Augmentation, WriteDecision, WriteOutcome, WriteRequest};

/// Default concurrent-operation bound.
pub const DEFAULT_POOL_SIZE: usize = 16;

/// Counting-semaphore augmentation (priority 100).
pub struct ConnectionPool {
    capacity: usize,
    available: Mutex<usize>,
    released: Condvar,
}

impl ConnectionPool {
    /// Creates a pool with the given concurrency bound.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            available: Mutex::new(capacity),
            released: Condvar::new(),
        }
    }

    /// Acquires one permit, blocking while the pool is exhausted.
    pub fn acquire(&self) {
        let mut available = self.available.lock().expect("pool lock");
        while *available == 0 {
            available = self.released.wait(available).expect("pool lock");
        }
        *available -= 1;
    }

    /// Releases one permit.
    pub fn release(&self) {
        let mut available = self.available.lock().expect("pool lock");
        *available = (*available + 1).min(self.capacity);
        drop(available);
        self.released.notify_one();
    }

    /// Permits currently available.
    pub fn available(&self) -> usize {
        *self.available.lock().expect("pool lock")
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl Augmentation for ConnectionPool {
    fn name(&self) -> &'static str {
        "connection-pool"
    }

    fn priority(&self) -> u8 {
        100
    }

    fn before_write(&self, _request: &mut WriteRequest) -> Result<WriteDecision> {
        self.acquire();
        Ok(WriteDecision::Continue)
    }

    fn after_write(&self, _request: &WriteRequest, _outcome: &WriteOutcome) -> Result<()> {
        self.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_acquire_release() {
        let pool = ConnectionPool::new(2);
        assert_eq!(pool.available(), 2);
        pool.acquire();
        pool.acquire();
        assert_eq!(pool.available(), 0);
        pool.release();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_release_caps_at_capacity() {
        let pool = ConnectionPool::new(1);
        pool.release();
        pool.release();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_blocked_acquirer_wakes_on_release() {
        let pool = Arc::new(ConnectionPool::new(1));
        pool.acquire();

        let contender = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                pool.acquire();
                pool.release();
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(!contender.is_finished(), "contender should block");

        pool.release();
        contender.join().unwrap();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_zero_capacity_clamps_to_one() {
        let pool = ConnectionPool::new(0);
        pool.acquire();
        pool.release();
        assert_eq!(pool.available(), 1);
    }
}
