//! Line protocol between a process job and its host.
//!
//! A job reports lifecycle events by writing `::cronwell:: <json>` lines to
//! stdout. Every other stdout or stderr line is plain log output.

use serde::{Deserialize, Serialize};

pub const LINE_PREFIX: &str = "::cronwell::";

/// Exception captured during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// One-line summary.
    pub message: String,
    /// Full text (stack trace, cause chain). Falls back to `message` when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

impl ExceptionInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            text: String::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn full_text(&self) -> &str {
        if self.text.is_empty() {
            &self.message
        } else {
            &self.text
        }
    }
}

/// One callback from job code to the lifecycle tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    AppendLog {
        message: String,
    },
    AddAggregateException {
        exception: ExceptionInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
    SetEffectedRows {
        value: i64,
    },
    IncreaseEffectedRows {
        #[serde(default = "one")]
        delta: i64,
    },
    UpdateProgress {
        progress: u8,
    },
    UpdateProgressOf {
        current: i64,
        total: i64,
    },
    ReportException {
        exception: ExceptionInfo,
    },
    PutJobData {
        key: String,
        #[serde(default)]
        value: Option<String>,
    },
    PutTriggerData {
        key: String,
        #[serde(default)]
        value: Option<String>,
    },
}

fn one() -> i64 {
    1
}

impl LifecycleEvent {
    /// Encode as a single stdout line (without newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        Ok(format!("{LINE_PREFIX} {}", serde_json::to_string(self)?))
    }
}

/// How a host should treat one line of process output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Event(LifecycleEvent),
    Log(String),
    /// Carried the prefix but the payload did not decode.
    Malformed { line: String, error: String },
}

pub fn parse_line(line: &str) -> OutputLine {
    let Some(rest) = line.trim_start().strip_prefix(LINE_PREFIX) else {
        return OutputLine::Log(line.to_string());
    };
    match serde_json::from_str::<LifecycleEvent>(rest.trim()) {
        Ok(event) => OutputLine::Event(event),
        Err(e) => OutputLine::Malformed {
            line: line.to_string(),
            error: e.to_string(),
        },
    }
}
