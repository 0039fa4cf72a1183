//! Per-job circuit breaker.
//!
//! State lives in the job data map under [`CIRCUIT_BREAKER_KEY`] as
//! `FC:<fails>,SC:<successes>,FT:<fail threshold>,ST:<success threshold>,PS:<pause span>`.
//! `ST` is empty when unset; `PS` is a `[d.]hh:mm:ss[.fffffff]` span or `null`.
//! A tripped breaker pauses the job's active triggers and schedules a
//! one-shot resume trigger that lists exactly those triggers.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronwell_core::history::ExecutionStatus;
use cronwell_core::job::{NewTrigger, Schedule};
use cronwell_core::ports::TriggerClock;
use cronwell_core::types::{
    DataMap, JobKey, TriggerKey, CIRCUIT_BREAKER_KEY, CIRCUIT_BREAKER_PROBATION_KEY,
    CIRCUIT_BREAKER_TRIGGER_GROUP, SYSTEM_GROUP,
};
use dashmap::DashMap;
use tracing::{info, instrument, warn};

use crate::error::{MonitorError, Result};

/// System job that resumes paused triggers.
pub const CIRCUIT_BREAKER_JOB: &str = "CircuitBreaker";

/// Resume trigger data keys.
pub const RESUME_JOB_GROUP_KEY: &str = "JobKey.Group";
pub const RESUME_JOB_NAME_KEY: &str = "JobKey.Name";
pub const RESUME_TRIGGERS_KEY: &str = "Trigger.Keys";
pub const RESUME_CREATED_KEY: &str = "Created";

const NULL_VALUE: &str = "null";
const TICKS_PER_SEC: u64 = 10_000_000;
const NANOS_PER_TICK: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CircuitBreakerMetadata {
    pub fail_counter: u32,
    pub success_counter: u32,
    pub failure_threshold: u32,
    pub success_threshold: Option<u32>,
    pub pause_span: Option<Duration>,
}

impl CircuitBreakerMetadata {
    pub fn new(failure_threshold: u32, success_threshold: Option<u32>, pause_span: Option<Duration>) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            pause_span,
            ..Self::default()
        }
    }

    pub fn reset(&mut self) {
        self.fail_counter = 0;
        self.success_counter = 0;
    }

    pub fn parse(value: &str) -> Result<Self> {
        let invalid = |why: &str| MonitorError::InvalidCircuitBreaker(format!("{why}: {value}"));

        let parts: Vec<&str> = value.split(',').collect();
        if parts.len() != 5 {
            return Err(invalid("expected 5 fields"));
        }

        let mut result = Self::default();
        let mut seen = [false; 5];
        for part in parts {
            let (key, raw) = part.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
            let raw = raw.trim();
            let slot = match key.trim() {
                "FC" => {
                    result.fail_counter = raw.parse().map_err(|_| invalid("invalid FC"))?;
                    0
                }
                "SC" => {
                    result.success_counter = raw.parse().map_err(|_| invalid("invalid SC"))?;
                    1
                }
                "FT" => {
                    result.failure_threshold = raw.parse().map_err(|_| invalid("invalid FT"))?;
                    2
                }
                "ST" => {
                    result.success_threshold = if raw.is_empty() || raw == NULL_VALUE {
                        None
                    } else {
                        Some(raw.parse().map_err(|_| invalid("invalid ST"))?)
                    };
                    3
                }
                "PS" => {
                    result.pause_span = if raw == NULL_VALUE {
                        None
                    } else {
                        Some(parse_timespan(raw).ok_or_else(|| invalid("invalid PS"))?)
                    };
                    4
                }
                _ => return Err(invalid("unknown field")),
            };
            if std::mem::replace(&mut seen[slot], true) {
                return Err(invalid("duplicate field"));
            }
        }
        Ok(result)
    }
}

impl fmt::Display for CircuitBreakerMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.success_threshold.map(|v| v.to_string()).unwrap_or_default();
        let ps = self
            .pause_span
            .map(format_timespan)
            .unwrap_or_else(|| NULL_VALUE.to_string());
        write!(
            f,
            "FC:{},SC:{},FT:{},ST:{},PS:{}",
            self.fail_counter, self.success_counter, self.failure_threshold, st, ps
        )
    }
}

impl FromStr for CircuitBreakerMetadata {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// `[d.]hh:mm:ss[.fffffff]`, fraction in 100ns ticks and only when non-zero.
pub fn format_timespan(span: Duration) -> String {
    let total = span.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    let ticks = span.subsec_nanos() / NANOS_PER_TICK;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}."));
    }
    out.push_str(&format!("{hours:02}:{minutes:02}:{seconds:02}"));
    if ticks > 0 {
        out.push_str(&format!(".{ticks:07}"));
    }
    out
}

/// Accepts `d`, `hh:mm`, `hh:mm:ss`, each with an optional `d.` prefix and
/// `.fffffff` fraction. Negative spans are rejected.
pub fn parse_timespan(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() || value.starts_with('-') {
        return None;
    }
    if !value.contains(':') {
        let days: u64 = value.parse().ok()?;
        return Some(Duration::from_secs(days.checked_mul(86_400)?));
    }

    let (days, time) = match (value.find('.'), value.find(':')) {
        (Some(dot), Some(colon)) if dot < colon => {
            let days: u64 = value[..dot].parse().ok()?;
            (days, &value[dot + 1..])
        }
        _ => (0, value),
    };

    let (clock, fraction) = match time.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (time, None),
    };

    let fields: Vec<&str> = clock.split(':').collect();
    let (h, m, s) = match fields.as_slice() {
        [h, m] => (*h, *m, "0"),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };
    let hours: u64 = h.parse().ok()?;
    let minutes: u64 = m.parse().ok()?;
    let seconds: u64 = s.parse().ok()?;
    if hours > 23 || minutes > 59 || seconds > 59 {
        return None;
    }

    let mut nanos = 0u32;
    if let Some(fraction) = fraction {
        if fraction.is_empty() || fraction.len() > 7 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let ticks: u32 = format!("{fraction:0<7}").parse().ok()?;
        nanos = ticks * NANOS_PER_TICK;
    }

    let secs = days
        .checked_mul(86_400)?
        .checked_add(hours * 3600 + minutes * 60 + seconds)?;
    Some(Duration::new(secs, nanos))
}

/// What an outcome did to the breaker, for the caller to report.
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerTransition {
    /// Threshold reached: `paused` triggers were paused and will be resumed
    /// at `resume_at` (none when the span is zero or nothing was active).
    Opened {
        paused: Vec<TriggerKey>,
        resume_at: Option<DateTime<Utc>>,
    },
    /// Probation completed after a resume.
    Reset,
}

/// Applies execution outcomes to a job's breaker through the trigger clock.
///
/// Updates to one job's counters are serialized, so concurrent fires of a
/// job never lose an increment.
pub struct CircuitBreaker {
    clock: Arc<dyn TriggerClock>,
    locks: DashMap<JobKey, Arc<Mutex<()>>>,
}

impl CircuitBreaker {
    pub fn new(clock: Arc<dyn TriggerClock>) -> Self {
        Self {
            clock,
            locks: DashMap::new(),
        }
    }

    fn job_lock(&self, job: &JobKey) -> Arc<Mutex<()>> {
        self.locks.entry(job.clone()).or_default().clone()
    }

    /// The job's breaker, if it has one.
    pub fn metadata(&self, job: &JobKey) -> Result<Option<CircuitBreakerMetadata>> {
        let data = self.clock.job_data(job)?;
        data.get(CIRCUIT_BREAKER_KEY)
            .map(|v| CircuitBreakerMetadata::parse(v))
            .transpose()
    }

    /// Install or replace a job's breaker with zeroed counters.
    pub fn configure(&self, job: &JobKey, metadata: &CircuitBreakerMetadata) -> Result<()> {
        let lock = self.job_lock(job);
        let _guard = hold(&lock);
        let mut fresh = metadata.clone();
        fresh.reset();
        self.clock
            .put_job_data(job, CIRCUIT_BREAKER_KEY, Some(&fresh.to_string()))?;
        self.clock.put_job_data(job, CIRCUIT_BREAKER_PROBATION_KEY, None)?;
        Ok(())
    }

    fn in_probation(data: &DataMap) -> bool {
        data.get(CIRCUIT_BREAKER_PROBATION_KEY).is_some_and(|v| v == "true")
    }

    /// Count a finished run. Only `Success` and `Fail` move the breaker.
    #[instrument(skip(self), fields(job = %job))]
    pub fn on_outcome(
        &self,
        job: &JobKey,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<BreakerTransition>> {
        let lock = self.job_lock(job);
        let _guard = hold(&lock);
        let data = self.clock.job_data(job)?;
        let Some(raw) = data.get(CIRCUIT_BREAKER_KEY) else {
            return Ok(None);
        };
        let mut meta = CircuitBreakerMetadata::parse(raw)?;
        let probation = Self::in_probation(&data);

        let transition = match status {
            ExecutionStatus::Fail => {
                meta.fail_counter += 1;
                meta.success_counter = 0;
                if meta.failure_threshold > 0 && meta.fail_counter >= meta.failure_threshold {
                    meta.fail_counter = 0;
                    Some(self.trip(job, &meta, now)?)
                } else {
                    None
                }
            }
            ExecutionStatus::Success if probation => {
                meta.fail_counter = 0;
                meta.success_counter += 1;
                let needed = meta.success_threshold.unwrap_or(1).max(1);
                if meta.success_counter >= needed {
                    meta.reset();
                    self.clock.put_job_data(job, CIRCUIT_BREAKER_PROBATION_KEY, None)?;
                    info!("circuit breaker closed after probation");
                    Some(BreakerTransition::Reset)
                } else {
                    None
                }
            }
            ExecutionStatus::Success => {
                meta.fail_counter = 0;
                None
            }
            ExecutionStatus::Running | ExecutionStatus::Veto | ExecutionStatus::Stopped => {
                return Ok(None);
            }
        };

        self.clock
            .put_job_data(job, CIRCUIT_BREAKER_KEY, Some(&meta.to_string()))?;
        Ok(transition)
    }

    fn trip(
        &self,
        job: &JobKey,
        meta: &CircuitBreakerMetadata,
        now: DateTime<Utc>,
    ) -> Result<BreakerTransition> {
        let mut active = Vec::new();
        for trigger in self.clock.triggers_of_job(job)? {
            if self.clock.trigger_state(&trigger.key)?.is_active() {
                active.push(trigger.key);
            }
        }
        for key in &active {
            self.clock.pause_trigger(key)?;
        }
        warn!(job = %job, paused = active.len(), "circuit breaker opened, job paused");

        let span = meta.pause_span.unwrap_or(Duration::ZERO);
        let resume_at = if span.is_zero() || active.is_empty() {
            None
        } else {
            Some(self.queue_resume(job, &active, span, now)?)
        };

        Ok(BreakerTransition::Opened {
            paused: active,
            resume_at,
        })
    }

    fn queue_resume(
        &self,
        job: &JobKey,
        triggers: &[TriggerKey],
        span: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let span = chrono::Duration::from_std(span)
            .map_err(|e| MonitorError::InvalidCircuitBreaker(e.to_string()))?;
        let due = now + span;
        let key = resume_trigger_key(job);
        if self.clock.get_trigger(&key)?.is_some() {
            self.clock.unschedule_trigger(&key)?;
        }

        let trigger_keys = serde_json::to_string(triggers)
            .map_err(|e| MonitorError::InvalidCircuitBreaker(e.to_string()))?;
        let trigger = NewTrigger::new(
            key,
            JobKey::new(SYSTEM_GROUP, CIRCUIT_BREAKER_JOB),
            Schedule::Once { at: due },
        )
        .with_data(RESUME_JOB_GROUP_KEY, job.group.clone())
        .with_data(RESUME_JOB_NAME_KEY, job.name.clone())
        .with_data(RESUME_TRIGGERS_KEY, trigger_keys)
        .with_data(RESUME_CREATED_KEY, now.to_rfc3339());
        self.clock.schedule_trigger(&trigger)?;
        info!(job = %job, resume_at = %due, "circuit breaker resume scheduled");
        Ok(due)
    }

    /// Run by the resume trigger: resume exactly the listed triggers and
    /// start probation. Returns the job and the triggers resumed.
    #[instrument(skip(self, resume_data))]
    pub fn resume(&self, resume_data: &DataMap) -> Result<(JobKey, Vec<TriggerKey>)> {
        let field = |key: &str| {
            resume_data
                .get(key)
                .ok_or_else(|| MonitorError::InvalidCircuitBreaker(format!("resume trigger missing {key}")))
        };
        let job = JobKey::new(field(RESUME_JOB_GROUP_KEY)?.clone(), field(RESUME_JOB_NAME_KEY)?.clone());
        let triggers: Vec<TriggerKey> = serde_json::from_str(field(RESUME_TRIGGERS_KEY)?)
            .map_err(|e| MonitorError::InvalidCircuitBreaker(e.to_string()))?;

        let lock = self.job_lock(&job);
        let _guard = hold(&lock);
        let mut resumed = Vec::new();
        for key in triggers {
            if self.clock.get_trigger(&key)?.is_none() {
                warn!(trigger = %key, "paused trigger no longer exists");
                continue;
            }
            self.clock.resume_trigger(&key)?;
            resumed.push(key);
        }

        if let Some(mut meta) = self.metadata(&job)? {
            meta.reset();
            self.clock
                .put_job_data(&job, CIRCUIT_BREAKER_KEY, Some(&meta.to_string()))?;
            self.clock
                .put_job_data(&job, CIRCUIT_BREAKER_PROBATION_KEY, Some("true"))?;
        }
        info!(job = %job, resumed = resumed.len(), "circuit breaker resumed job");
        Ok((job, resumed))
    }
}

fn hold(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn resume_trigger_key(job: &JobKey) -> TriggerKey {
    TriggerKey::new(CIRCUIT_BREAKER_TRIGGER_GROUP, format!("Resume.{job}"))
}
