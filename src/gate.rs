//! Intra-process gate (spec §4.B): a counting gate bounded by
//! `MAX_LOCAL_SLOTS`. Implemented as a manual poll loop rather than a bare
//! `Semaphore::acquire` so the observable ordering matches spec §5: requests
//! suspend in arrival order but the jittered polling can reorder across
//! short windows — there is no strict FIFO guarantee.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

pub struct LocalGate {
    capacity: usize,
    held: AtomicUsize,
}

impl LocalGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            held: AtomicUsize::new(0),
        }
    }

    /// Polls for a free slot until `timeout` elapses. Returns `true` and
    /// increments the counter on success.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self
                .held
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    if n < self.capacity {
                        Some(n + 1)
                    } else {
                        None
                    }
                })
                .is_ok()
            {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let jitter_ms = rand::rng().random_range(10..=60);
            tokio::time::sleep(Duration::from_millis(jitter_ms).min(remaining)).await;
        }
    }

    /// Decrements the counter, clamped at zero.
    pub fn release(&self) {
        let _ = self
            .held
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn in_use(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn respects_capacity() {
        let gate = LocalGate::new(2);
        assert!(gate.acquire(Duration::from_millis(50)).await);
        assert!(gate.acquire(Duration::from_millis(50)).await);
        assert!(!gate.acquire(Duration::from_millis(50)).await);
        assert_eq!(gate.in_use(), 2);
    }

    #[tokio::test]
    async fn release_frees_a_slot() {
        let gate = LocalGate::new(1);
        assert!(gate.acquire(Duration::from_millis(50)).await);
        gate.release();
        assert!(gate.acquire(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn release_never_goes_negative() {
        let gate = LocalGate::new(1);
        gate.release();
        gate.release();
        assert_eq!(gate.in_use(), 0);
    }
}
