//! `cronwell-monitor`: alerting on execution outcomes.
//!
//! [`MonitorEngine`] matches stored monitor actions against execution
//! events and dispatches each match to a named [`MonitorHook`]. The
//! [`CircuitBreaker`] pauses a job's triggers after repeated failures and
//! resumes them after a configured span.

pub mod circuit_breaker;
pub mod engine;
pub mod error;
pub mod events;
pub mod hooks;

pub use circuit_breaker::{BreakerTransition, CircuitBreaker, CircuitBreakerMetadata};
pub use engine::MonitorEngine;
pub use error::{MonitorError, Result};
pub use events::{events_for_outcome, ExecutionSnapshot, MonitorMessage};
pub use hooks::{HookRegistry, LogHook, MonitorHook, WebhookHook};
