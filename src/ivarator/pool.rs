//! Bounded scan-source pool
//!
//! Materializations draw reusable scan sources from a fixed-size pool.
//! Acquire blocks when the pool is drained and fails with a typed error
//! once the timeout elapses; sources return on guard drop.

use std::ops::Deref;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::errors::{MaterializeError, MaterializeResult};

/// Fixed-capacity pool of scan sources.
pub struct ScanSourcePool<S> {
    idle: Mutex<Vec<S>>,
    returned: Condvar,
    capacity: usize,
}

impl<S> ScanSourcePool<S> {
    pub fn new(sources: Vec<S>) -> Self {
        let capacity = sources.len();
        Self {
            idle: Mutex::new(sources),
            returned: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }

    /// Takes a source, blocking up to `timeout` for one to come back.
    pub fn acquire(&self, timeout: Duration) -> MaterializeResult<PooledSource<'_, S>> {
        let deadline = Instant::now() + timeout;
        let mut idle = self.idle.lock().unwrap();
        loop {
            if let Some(source) = idle.pop() {
                return Ok(PooledSource {
                    pool: self,
                    source: Some(source),
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(MaterializeError::PoolExhausted(timeout.as_millis() as u64));
            }
            let (guard, result) = self.returned.wait_timeout(idle, remaining).unwrap();
            idle = guard;
            if result.timed_out() && idle.is_empty() {
                return Err(MaterializeError::PoolExhausted(timeout.as_millis() as u64));
            }
        }
    }

    fn give_back(&self, source: S) {
        self.idle.lock().unwrap().push(source);
        self.returned.notify_one();
    }
}

/// Guard handing a pooled source back on drop.
pub struct PooledSource<'a, S> {
    pool: &'a ScanSourcePool<S>,
    source: Option<S>,
}

impl<S> Deref for PooledSource<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.source.as_ref().unwrap()
    }
}

impl<S> Drop for PooledSource<'_, S> {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            self.pool.give_back(source);
        }
    }
}
