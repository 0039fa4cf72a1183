use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_HTTP_PORT: u16 = 2306;
pub const DEFAULT_CLUSTER_PORT: u16 = 12306;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 2 * 60 * 60; // 2h when a trigger declares none
pub const TIMEOUT_GRACE_SECS: u64 = 3 * 60;
pub const DEFAULT_MAX_AGGREGATE_EXCEPTIONS: usize = 25;

/// Top-level config (cronwell.toml + CRONWELL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronwellConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Scheduler instance id. A fresh UUID per process when unset.
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Host name half of this node's identity. Machine host name when unset.
    #[serde(default)]
    pub server: Option<String>,
    /// Port half of this node's identity (also the management API port).
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Warm-up window between scheduler init and the first trigger tick.
    #[serde(default = "default_start_delay_secs")]
    pub start_delay_secs: u64,
    #[serde(default = "default_jobs_folder")]
    pub jobs_folder: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            instance_id: None,
            server: None,
            http_port: DEFAULT_HTTP_PORT,
            bind: DEFAULT_BIND.to_string(),
            max_concurrency: default_max_concurrency(),
            start_delay_secs: default_start_delay_secs(),
            jobs_folder: default_jobs_folder(),
        }
    }
}

impl ServiceConfig {
    pub fn server_name(&self) -> String {
        self.server.clone().unwrap_or_else(machine_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub clustering: bool,
    /// Port the cluster RPC server listens on.
    #[serde(default = "default_cluster_port")]
    pub port: u16,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// A node is live iff `now - health_check_date < interval * deviation_factor`.
    #[serde(default = "default_deviation_factor")]
    pub deviation_factor: f64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            clustering: false,
            port: DEFAULT_CLUSTER_PORT,
            health_check_interval_secs: default_health_check_interval_secs(),
            deviation_factor: default_deviation_factor(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl ClusterConfig {
    /// Heartbeat age beyond which a node counts as dead.
    pub fn live_tolerance(&self) -> chrono::Duration {
        let ms = self.health_check_interval_secs as f64 * 1000.0 * self.deviation_factor;
        chrono::Duration::milliseconds(ms.round() as i64)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_history_days")]
    pub history_days: u32,
    #[serde(default = "default_alert_days")]
    pub alert_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            history_days: default_history_days(),
            alert_days: default_alert_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default = "default_max_aggregate_exceptions")]
    pub max_aggregate_exceptions: usize,
    #[serde(default = "default_persist_running_jobs_secs")]
    pub persist_running_jobs_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            grace_secs: TIMEOUT_GRACE_SECS,
            max_aggregate_exceptions: DEFAULT_MAX_AGGREGATE_EXCEPTIONS,
            persist_running_jobs_secs: default_persist_running_jobs_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MonitorConfig {
    #[serde(default)]
    pub webhooks: Vec<WebhookHookConfig>,
}

/// A named outgoing webhook usable as a monitor hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookHookConfig {
    /// Hook name referenced by `MonitorAction::hook`.
    pub name: String,
    pub url: String,
    /// When set, the body is signed with HMAC-SHA256 (`X-Cronwell-Signature-256`).
    #[serde(default)]
    pub secret: Option<String>,
}

fn default_service_name() -> String {
    "cronwell".to_string()
}
fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_max_concurrency() -> usize {
    10
}
fn default_start_delay_secs() -> u64 {
    30
}
fn default_cluster_port() -> u16 {
    DEFAULT_CLUSTER_PORT
}
fn default_health_check_interval_secs() -> u64 {
    60
}
fn default_deviation_factor() -> f64 {
    2.5
}
fn default_rpc_timeout_ms() -> u64 {
    5_000
}
fn default_retry_count() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_history_days() -> u32 {
    365
}
fn default_alert_days() -> u32 {
    90
}
fn default_timeout_secs() -> u64 {
    DEFAULT_JOB_TIMEOUT_SECS
}
fn default_grace_secs() -> u64 {
    TIMEOUT_GRACE_SECS
}
fn default_max_aggregate_exceptions() -> usize {
    DEFAULT_MAX_AGGREGATE_EXCEPTIONS
}
fn default_persist_running_jobs_secs() -> u64 {
    300
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}
fn default_db_path() -> String {
    format!("{}/.cronwell/cronwell.db", home_dir())
}
fn default_jobs_folder() -> String {
    format!("{}/.cronwell/jobs", home_dir())
}

fn machine_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl CronwellConfig {
    /// Load config from a TOML file with CRONWELL_* env var overrides.
    ///
    /// Path resolution: explicit argument, then `CRONWELL_CONFIG`, then
    /// `~/.cronwell/cronwell.toml`. A missing file is not an error.
    /// Nested keys use a double underscore: `CRONWELL_CLUSTER__CLUSTERING=true`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CRONWELL_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CronwellError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(CronwellConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CRONWELL_").ignore(&["config"]).split("__"))
    }

    pub fn instance_id(&self) -> String {
        self.service
            .instance_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

fn default_config_path() -> String {
    format!("{}/.cronwell/cronwell.toml", home_dir())
}
