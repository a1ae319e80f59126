//! CAPTCHA single-flight gate (spec §4.D). Only one in-flight request may
//! drive a headed human-recovery flow at a time; every other overlapping
//! call either waits for the release broadcast or gives up at its own
//! budget.

use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::debug;

#[derive(Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// This call owns the recovery and must drive it to completion.
    Acquired,
    /// Another call drove the recovery; the gate has since released.
    /// The caller should retry its search.
    Waited,
    /// Neither happened within the budget.
    TimedOut,
}

pub struct CaptchaGate {
    held: Mutex<bool>,
    released: broadcast::Sender<()>,
}

impl CaptchaGate {
    pub fn new() -> Self {
        let (released, _) = broadcast::channel(32);
        Self {
            held: Mutex::new(false),
            released,
        }
    }

    pub async fn try_acquire(&self, timeout: Duration) -> AcquireOutcome {
        // Subscribe before checking `held` so a release that lands between
        // the check and the wait is never missed.
        let mut waiter = self.released.subscribe();

        {
            let mut held = self.held.lock().await;
            if !*held {
                *held = true;
                return AcquireOutcome::Acquired;
            }
        }

        match tokio::time::timeout(timeout, waiter.recv()).await {
            Ok(_) => AcquireOutcome::Waited,
            Err(_) => AcquireOutcome::TimedOut,
        }
    }

    pub async fn release(&self) {
        let mut held = self.held.lock().await;
        if *held {
            *held = false;
            debug!("captcha gate released");
        }
        // Fire regardless — a waiter that subscribed while already-free
        // (e.g. the sentinel path below) should still unblock.
        let _ = self.released.send(());
    }

    pub async fn is_held(&self) -> bool {
        *self.held.lock().await
    }

    /// Waits for an in-progress recovery to finish, without attempting to
    /// become its owner (spec §4.G phase 3: "wait on its broadcast", not an
    /// acquire). Returns `true` if the gate was already free or released
    /// within `timeout`, `false` if the wait timed out.
    pub async fn wait_for_release(&self, timeout: Duration) -> bool {
        // Subscribe before checking `held`, same ordering as `try_acquire`,
        // so a release landing between the check and the wait is never missed.
        let mut waiter = self.released.subscribe();
        if !self.is_held().await {
            return true;
        }
        tokio::time::timeout(timeout, waiter.recv()).await.is_ok()
    }
}

impl Default for CaptchaGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_caller_acquires() {
        let gate = CaptchaGate::new();
        assert_eq!(
            gate.try_acquire(Duration::from_millis(50)).await,
            AcquireOutcome::Acquired
        );
        assert!(gate.is_held().await);
    }

    #[tokio::test]
    async fn second_caller_waits_then_unblocks_on_release() {
        let gate = Arc::new(CaptchaGate::new());
        assert_eq!(
            gate.try_acquire(Duration::from_millis(50)).await,
            AcquireOutcome::Acquired
        );

        let gate2 = gate.clone();
        let waiter = tokio::spawn(async move { gate2.try_acquire(Duration::from_secs(2)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.release().await;

        assert_eq!(waiter.await.unwrap(), AcquireOutcome::Waited);
    }

    #[tokio::test]
    async fn waiter_times_out_if_never_released() {
        let gate = CaptchaGate::new();
        let _ = gate.try_acquire(Duration::from_millis(50)).await;
        assert_eq!(
            gate.try_acquire(Duration::from_millis(30)).await,
            AcquireOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn wait_for_release_is_immediate_when_free() {
        let gate = CaptchaGate::new();
        assert!(gate.wait_for_release(Duration::from_millis(1)).await);
        assert!(!gate.is_held().await);
    }

    #[tokio::test]
    async fn wait_for_release_unblocks_without_taking_ownership() {
        let gate = Arc::new(CaptchaGate::new());
        let _ = gate.try_acquire(Duration::from_millis(50)).await;

        let gate2 = gate.clone();
        let waiter =
            tokio::spawn(async move { gate2.wait_for_release(Duration::from_secs(2)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.release().await;

        assert!(waiter.await.unwrap());
        assert!(!gate.is_held().await);
    }

    #[tokio::test]
    async fn wait_for_release_times_out_if_never_released() {
        let gate = CaptchaGate::new();
        let _ = gate.try_acquire(Duration::from_millis(50)).await;
        assert!(!gate.wait_for_release(Duration::from_millis(30)).await);
    }
}
