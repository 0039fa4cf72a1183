use std::time::Duration;

use cronwell_core::config::{ExecutionConfig, DEFAULT_JOB_TIMEOUT_SECS, TIMEOUT_GRACE_SECS};
use cronwell_core::history::ExecutionStatus;

/// Wall-clock budget of one run: the trigger timeout, then a grace window
/// for the job to stop after it was asked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub grace: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            grace: Duration::from_secs(TIMEOUT_GRACE_SECS),
        }
    }
}

impl ExecutionLimits {
    pub fn new(timeout: Duration, grace: Duration) -> Self {
        Self { timeout, grace }
    }

    /// A missing or sub-second trigger timeout falls back to the configured default.
    pub fn for_trigger(timeout_secs: Option<u64>, cfg: &ExecutionConfig) -> Self {
        let secs = match timeout_secs {
            Some(s) if s >= 1 => s,
            _ => cfg.default_timeout_secs,
        };
        Self::new(Duration::from_secs(secs), Duration::from_secs(cfg.grace_secs))
    }

    /// Latest point at which the run is forcibly ended.
    pub fn deadline(&self) -> Duration {
        self.timeout + self.grace
    }
}

/// How a run ended, as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Fail,
    Stopped,
    TimedOut,
}

impl ExecutionOutcome {
    /// History status. A timeout is recorded as a failure; the log carries the marker.
    pub fn status(self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Success => ExecutionStatus::Success,
            ExecutionOutcome::Fail | ExecutionOutcome::TimedOut => ExecutionStatus::Fail,
            ExecutionOutcome::Stopped => ExecutionStatus::Stopped,
        }
    }

    pub fn is_stopped(self) -> bool {
        matches!(self, ExecutionOutcome::Stopped)
    }
}

/// `850ms`, `01:02:03` or `(2) 01:02:03` for spans of a day or more.
pub fn format_span(span: Duration) -> String {
    if span < Duration::from_secs(1) {
        return format!("{}ms", span.as_millis());
    }
    let total = span.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("({days}) {hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_or_tiny_timeout_uses_default() {
        let cfg = ExecutionConfig::default();
        let limits = ExecutionLimits::for_trigger(None, &cfg);
        assert_eq!(limits.timeout, Duration::from_secs(7200));
        assert_eq!(limits.deadline(), Duration::from_secs(7200 + 180));
        assert_eq!(ExecutionLimits::for_trigger(Some(0), &cfg), limits);
        assert_eq!(
            ExecutionLimits::for_trigger(Some(60), &cfg).deadline(),
            Duration::from_secs(240)
        );
        assert_eq!(ExecutionLimits::default(), limits);
    }

    #[test]
    fn timeout_is_recorded_as_failure() {
        assert_eq!(ExecutionOutcome::TimedOut.status(), ExecutionStatus::Fail);
        assert_eq!(ExecutionOutcome::Stopped.status(), ExecutionStatus::Stopped);
        assert!(ExecutionOutcome::Stopped.is_stopped());
    }

    #[test]
    fn spans_format_like_clock_time() {
        assert_eq!(format_span(Duration::from_millis(850)), "850ms");
        assert_eq!(format_span(Duration::from_secs(3723)), "01:02:03");
        assert_eq!(format_span(Duration::from_secs(2 * 86_400 + 3723)), "(2) 01:02:03");
    }
}
