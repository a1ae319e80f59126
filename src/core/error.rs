use thiserror::Error;

/// Internal classification of a failed pipeline run. Never escapes the
/// handler: every variant is converted to a successful MCP response with a
/// Markdown body before it reaches the transport (spec §7's propagation
/// policy — business failures are not protocol errors).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("empty query and empty image path")]
    InputEmpty,

    #[error("cooldown active, {remaining_secs}s remaining")]
    Cooldown { remaining_secs: u64 },

    #[error("busy waiting for CAPTCHA verification")]
    CaptchaBusy,

    #[error("local concurrency slots exhausted")]
    LocalBusy,

    #[error("host concurrency slots exhausted")]
    GlobalBusy,

    #[error("queue delay left no execution budget")]
    QueueTooLong,

    #[error("execution deadline exceeded")]
    ExecutionTimeout,

    #[error("login/verification timeout: {0}")]
    LoginTimeout(String),

    #[error("browser subsystem error: {0}")]
    Browser(String),
}
