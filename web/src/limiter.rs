//! Per-instance cap on concurrent SSE subscriptions.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counting limiter; permits release on drop.
#[derive(Debug)]
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    /// Create a limiter with the given cap.
    #[must_use]
    pub const fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    /// Try to take a slot; `None` when the instance is at capacity.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionPermit> {
        let mut current = self.current.load(Ordering::Acquire);
        loop {
            if current >= self.max {
                return None;
            }
            match self.current.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    metrics::gauge!("gateway.sse_connections").increment(1.0);
                    return Some(ConnectionPermit {
                        limiter: Arc::clone(self),
                    });
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Currently held permits.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }
}

/// One held subscription slot.
#[derive(Debug)]
pub struct ConnectionPermit {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::AcqRel);
        metrics::gauge!("gateway.sse_connections").decrement(1.0);
    }
}
