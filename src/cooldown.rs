//! Cooldown latch (spec §4.E). A coarse, time-based suppression window set
//! after a login/verification timeout. The MCP protocol gives no
//! "conversation ended" signal, so a timer is the intended recovery.

use std::sync::Arc;
use std::time::Duration;

use aho_corasick::AhoCorasick;
use tokio::sync::Mutex;

use crate::clock::Clock;

/// Case-insensitive, language-agnostic keywords that mark an error as a
/// login/verification timeout rather than some other browser failure.
const KEYWORDS: &[&str] = &[
    "timeout",
    "login-required",
    "login required",
    "captcha",
    "authentication",
    "验证超时",
    "登录超时",
    "未完成登录",
];

pub fn matches_timeout_keywords(error: &str) -> bool {
    let lower = error.to_lowercase();
    let ac = AhoCorasick::new(KEYWORDS).expect("static keyword list is always valid");
    ac.is_match(&lower)
}

pub struct CooldownLatch {
    timestamp: Mutex<Option<i64>>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

pub enum CooldownState {
    /// No latch set, or it has expired; the caller may proceed.
    Clear,
    /// Still latched; carries the remaining whole seconds to display.
    Active { remaining_secs: u64 },
}

impl CooldownLatch {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            timestamp: Mutex::new(None),
            window,
            clock,
        }
    }

    /// Reads the latch and clears it if the window has elapsed.
    pub async fn check(&self) -> CooldownState {
        let mut ts = self.timestamp.lock().await;
        match *ts {
            Some(set_at) => {
                let elapsed = self.clock.now_ms().saturating_sub(set_at);
                if (elapsed as u128) < self.window.as_millis() {
                    let remaining_ms = self.window.as_millis() as i64 - elapsed;
                    CooldownState::Active {
                        remaining_secs: (remaining_ms.max(0) as u64).div_ceil(1000),
                    }
                } else {
                    *ts = None;
                    CooldownState::Clear
                }
            }
            None => CooldownState::Clear,
        }
    }

    pub async fn trip(&self) {
        let mut ts = self.timestamp.lock().await;
        *ts = Some(self.clock.now_ms());
    }

    #[cfg(test)]
    pub async fn is_set(&self) -> bool {
        self.timestamp.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn keyword_predicate_matches_known_phrases() {
        assert!(matches_timeout_keywords("Login-Required: please sign in"));
        assert!(matches_timeout_keywords("验证超时，用户未完成登录"));
        assert!(matches_timeout_keywords("Request timeout after 30s"));
        assert!(!matches_timeout_keywords("unexpected DOM structure"));
    }

    #[tokio::test]
    async fn clear_before_any_trip() {
        let clock = Arc::new(FakeClock::new(0));
        let latch = CooldownLatch::new(Duration::from_secs(300), clock);
        assert!(matches!(latch.check().await, CooldownState::Clear));
    }

    #[tokio::test]
    async fn active_immediately_after_trip() {
        let clock = Arc::new(FakeClock::new(1_000));
        let latch = CooldownLatch::new(Duration::from_secs(300), clock);
        latch.trip().await;
        match latch.check().await {
            CooldownState::Active { remaining_secs } => {
                assert_eq!(remaining_secs, 300);
            }
            CooldownState::Clear => panic!("expected active"),
        }
    }

    #[tokio::test]
    async fn clears_once_window_elapses() {
        let clock = Arc::new(FakeClock::new(0));
        let latch = CooldownLatch::new(Duration::from_secs(300), clock.clone());
        latch.trip().await;

        clock.advance(60_000);
        assert!(matches!(
            latch.check().await,
            CooldownState::Active { remaining_secs } if remaining_secs >= 239 && remaining_secs <= 240
        ));

        clock.advance(241_000);
        assert!(matches!(latch.check().await, CooldownState::Clear));
        assert!(!latch.is_set().await);
    }
}
