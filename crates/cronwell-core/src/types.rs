use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Job and trigger data maps. Ordered so serialized data is stable in history rows.
pub type DataMap = BTreeMap<String, String>;

/// Group holding the internal housekeeping jobs.
pub const SYSTEM_GROUP: &str = "__system";
/// Group of one-shot triggers created by the retry listener.
pub const RETRY_TRIGGER_GROUP: &str = "__retry";
/// Group of one-shot auto-resume triggers created by a tripped circuit breaker.
pub const CIRCUIT_BREAKER_TRIGGER_GROUP: &str = "__circuit_breaker";
/// Group of one-shot triggers created by a manual invoke.
pub const MANUAL_TRIGGER_GROUP: &str = "__manual";
/// Data keys with this prefix belong to cronwell and never reach job code.
pub const RESERVED_PREFIX: &str = "__";

/// Job data key holding the serialized circuit breaker counters.
pub const CIRCUIT_BREAKER_KEY: &str = "__circuit_breaker";
/// Job data key set while a resumed job is proving itself healthy again.
pub const CIRCUIT_BREAKER_PROBATION_KEY: &str = "__circuit_breaker_probation";
/// Trigger data key counting how many retries a retry trigger represents.
pub const RETRY_COUNTER_KEY: &str = "__retry_counter";

pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Copy of `data` without reserved keys: what a running job is allowed to see.
pub fn visible_data(data: &DataMap) -> DataMap {
    data.iter()
        .filter(|(k, _)| !is_reserved_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// `(group, name)` identity of a job definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub group: String,
    pub name: String,
}

impl JobKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.group == SYSTEM_GROUP
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// `(group, name)` identity of a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub group: String,
    pub name: String,
}

impl TriggerKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    pub fn is_retry(&self) -> bool {
        self.group == RETRY_TRIGGER_GROUP
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Unique id minted for every trigger firing.
///
/// Correlates the lifecycle tracker, the history row and cross-node
/// running-job lookups for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FireInstanceId(pub String);

impl FireInstanceId {
    pub fn new() -> Self {
        // UUIDv7 sorts by fire time, which keeps history ids roughly ordered.
        Self(Uuid::now_v7().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FireInstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FireInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FireInstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FireInstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Short random id used for job and trigger ids.
pub fn generate_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

/// Clip `value` to at most `max` characters (never splits a char).
pub fn clip(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_data_hides_reserved_keys() {
        let mut data = DataMap::new();
        data.insert("Folder".into(), "/tmp".into());
        data.insert(CIRCUIT_BREAKER_KEY.into(), "FC:0".into());
        let visible = visible_data(&data);
        assert_eq!(visible.len(), 1);
        assert!(visible.contains_key("Folder"));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("abcdef", 3), "abc");
        assert_eq!(clip("ab", 3), "ab");
        assert_eq!(clip("ééé", 2), "éé");
    }

    #[test]
    fn key_display_is_group_dot_name() {
        assert_eq!(JobKey::new("Infra", "Backup").to_string(), "Infra.Backup");
        assert!(JobKey::new(SYSTEM_GROUP, "PersistData").is_system());
        assert!(TriggerKey::new(RETRY_TRIGGER_GROUP, "r1").is_retry());
    }

    #[test]
    fn generated_ids_are_short_and_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
    }
}
