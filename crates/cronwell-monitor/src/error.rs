use cronwell_core::CronwellError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("hook {hook} failed: {reason}")]
    HookFailed { hook: String, reason: String },

    #[error("no hook registered under {0}")]
    UnknownHook(String),

    #[error("invalid circuit breaker metadata: {0}")]
    InvalidCircuitBreaker(String),

    #[error("store error: {0}")]
    Store(#[from] CronwellError),
}

impl MonitorError {
    pub fn hook(hook: impl Into<String>, reason: impl ToString) -> Self {
        MonitorError::HookFailed {
            hook: hook.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<MonitorError> for CronwellError {
    fn from(e: MonitorError) -> Self {
        match e {
            MonitorError::HookFailed { hook, reason } => CronwellError::Hook { hook, reason },
            MonitorError::UnknownHook(hook) => CronwellError::Hook {
                hook,
                reason: "not registered".into(),
            },
            MonitorError::InvalidCircuitBreaker(msg) => CronwellError::InvalidArgument(msg),
            MonitorError::Store(inner) => inner,
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
