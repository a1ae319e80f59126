//! Environment-driven configuration.
//!
//! Every tunable is resolved through a `resolve_*` method so the same
//! fallback chain (env var → hardcoded default) is visible in one place,
//! following the pattern the rest of this codebase uses for its settings.

use std::path::PathBuf;
use std::time::Duration;

pub const ENV_STRICT_GROUNDING: &str = "HUGE_AI_SEARCH_STRICT_GROUNDING";
pub const ENV_GUARDRAIL_PROMPT: &str = "HUGE_AI_SEARCH_GUARDRAIL_PROMPT";
pub const ENV_TOTAL_BUDGET_TEXT_MS: &str = "HUGE_AI_SEARCH_TOTAL_BUDGET_TEXT_MS";
pub const ENV_TOTAL_BUDGET_IMAGE_MS: &str = "HUGE_AI_SEARCH_TOTAL_BUDGET_IMAGE_MS";
pub const ENV_EXECUTION_TIMEOUT_TEXT_MS: &str = "HUGE_AI_SEARCH_EXECUTION_TIMEOUT_TEXT_MS";
pub const ENV_EXECUTION_TIMEOUT_IMAGE_MS: &str = "HUGE_AI_SEARCH_EXECUTION_TIMEOUT_IMAGE_MS";
pub const ENV_LOG_DIR: &str = "HUGE_AI_SEARCH_LOG_DIR";
pub const ENV_LOG_RETENTION_DAYS: &str = "HUGE_AI_SEARCH_LOG_RETENTION_DAYS";

pub const ENV_MAX_LOCAL_SLOTS: &str = "HUGE_AI_SEARCH_MAX_LOCAL_SLOTS";
pub const ENV_MAX_GLOBAL_SLOTS: &str = "HUGE_AI_SEARCH_MAX_GLOBAL_SLOTS";
pub const ENV_MAX_SESSIONS: &str = "HUGE_AI_SEARCH_MAX_SESSIONS";
pub const ENV_SESSION_IDLE_TTL_MS: &str = "HUGE_AI_SEARCH_SESSION_IDLE_TTL_MS";
pub const ENV_SESSION_MAX_USES: &str = "HUGE_AI_SEARCH_SESSION_MAX_USES";
pub const ENV_HEARTBEAT_MS: &str = "HUGE_AI_SEARCH_HEARTBEAT_MS";
pub const ENV_LEASE_MS: &str = "HUGE_AI_SEARCH_LEASE_MS";
pub const ENV_COOLDOWN_WINDOW_MS: &str = "HUGE_AI_SEARCH_COOLDOWN_WINDOW_MS";
pub const ENV_COORDINATOR_DIR: &str = "HUGE_AI_SEARCH_COORDINATOR_DIR";
pub const ENV_BROWSER_DATA_DIR: &str = "HUGE_AI_SEARCH_BROWSER_DATA_DIR";
pub const ENV_LOCAL_WAIT_BUDGET_MS: &str = "HUGE_AI_SEARCH_LOCAL_WAIT_BUDGET_MS";
pub const ENV_GLOBAL_WAIT_BUDGET_MS: &str = "HUGE_AI_SEARCH_GLOBAL_WAIT_BUDGET_MS";
pub const ENV_CAPTCHA_WAIT_BUDGET_MS: &str = "HUGE_AI_SEARCH_CAPTCHA_WAIT_BUDGET_MS";
pub const ENV_SAFETY_MARGIN_MS: &str = "HUGE_AI_SEARCH_SAFETY_MARGIN_MS";
pub const ENV_MIN_EXECUTION_MS: &str = "HUGE_AI_SEARCH_MIN_EXECUTION_MS";

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_bool_false_disables(key: &str) -> bool {
    match std::env::var(key) {
        Ok(v) => v.trim() != "0",
        Err(_) => true,
    }
}

/// All runtime-tunable values the core pipeline needs. Constructed once at
/// startup; cheap to clone (everything is `Copy` or a small owned `String`).
#[derive(Clone, Debug)]
pub struct CoreConfig {
    pub strict_grounding: bool,
    pub guardrail_prompt: String,

    pub total_budget_text: Duration,
    pub total_budget_image: Duration,
    pub execution_timeout_text: Duration,
    pub execution_timeout_image: Duration,
    pub safety_margin: Duration,
    pub min_execution: Duration,

    pub log_dir: PathBuf,
    pub log_retention_days: u32,

    pub max_local_slots: usize,
    pub max_global_slots: usize,
    pub max_sessions: usize,
    pub session_idle_ttl: Duration,
    pub session_max_uses: u32,
    pub heartbeat_interval: Duration,
    pub lease_window: Duration,
    pub cooldown_window: Duration,

    pub coordinator_dir: PathBuf,
    pub browser_data_dir: PathBuf,

    pub local_wait_budget: Duration,
    pub global_wait_budget: Duration,
    pub captcha_wait_budget: Duration,
}

impl CoreConfig {
    pub fn resolve() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let base = home.join(".huge-ai-search");

        Self {
            strict_grounding: env_bool_false_disables(ENV_STRICT_GROUNDING),
            guardrail_prompt: std::env::var(ENV_GUARDRAIL_PROMPT).unwrap_or_else(|_| {
                "请仅基于可验证的权威来源作答，不要编造技术术语的定义。".to_string()
            }),

            total_budget_text: Duration::from_millis(
                env_u64(ENV_TOTAL_BUDGET_TEXT_MS).unwrap_or(55_000),
            ),
            total_budget_image: Duration::from_millis(
                env_u64(ENV_TOTAL_BUDGET_IMAGE_MS).unwrap_or(80_000),
            ),
            execution_timeout_text: Duration::from_millis(
                env_u64(ENV_EXECUTION_TIMEOUT_TEXT_MS).unwrap_or(50_000),
            ),
            execution_timeout_image: Duration::from_millis(
                env_u64(ENV_EXECUTION_TIMEOUT_IMAGE_MS).unwrap_or(75_000),
            ),
            safety_margin: Duration::from_millis(env_u64(ENV_SAFETY_MARGIN_MS).unwrap_or(2_000)),
            min_execution: Duration::from_millis(env_u64(ENV_MIN_EXECUTION_MS).unwrap_or(5_000)),

            log_dir: std::env::var(ENV_LOG_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| base.join("logs")),
            log_retention_days: env_u64(ENV_LOG_RETENTION_DAYS).unwrap_or(14) as u32,

            max_local_slots: env_u64(ENV_MAX_LOCAL_SLOTS).unwrap_or(3) as usize,
            max_global_slots: env_u64(ENV_MAX_GLOBAL_SLOTS).unwrap_or(4) as usize,
            max_sessions: env_u64(ENV_MAX_SESSIONS).unwrap_or(20) as usize,
            session_idle_ttl: Duration::from_millis(
                env_u64(ENV_SESSION_IDLE_TTL_MS).unwrap_or(30 * 60 * 1000),
            ),
            session_max_uses: env_u64(ENV_SESSION_MAX_USES).unwrap_or(50) as u32,
            heartbeat_interval: Duration::from_millis(env_u64(ENV_HEARTBEAT_MS).unwrap_or(5_000)),
            lease_window: Duration::from_millis(env_u64(ENV_LEASE_MS).unwrap_or(15_000)),
            cooldown_window: Duration::from_millis(
                env_u64(ENV_COOLDOWN_WINDOW_MS).unwrap_or(300_000),
            ),

            coordinator_dir: std::env::var(ENV_COORDINATOR_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| base.join("coordinator").join("google-search-slots")),
            browser_data_dir: std::env::var(ENV_BROWSER_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| base.join("browser_data")),

            local_wait_budget: Duration::from_millis(
                env_u64(ENV_LOCAL_WAIT_BUDGET_MS).unwrap_or(8_000),
            ),
            global_wait_budget: Duration::from_millis(
                env_u64(ENV_GLOBAL_WAIT_BUDGET_MS).unwrap_or(10_000),
            ),
            captcha_wait_budget: Duration::from_millis(
                env_u64(ENV_CAPTCHA_WAIT_BUDGET_MS).unwrap_or(45_000),
            ),
        }
    }
}
