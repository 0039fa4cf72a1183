// Cluster RPC routes. Every node serves them on its cluster port.

pub const HEALTH_CHECK: &str = "/cluster/health-check";
pub const STOP_SCHEDULER: &str = "/cluster/stop-scheduler";
pub const START_SCHEDULER: &str = "/cluster/start-scheduler";
pub const IS_JOB_RUNNING: &str = "/cluster/is-job-running";
pub const RUNNING_JOB: &str = "/cluster/running-job";
pub const RUNNING_JOBS: &str = "/cluster/running-jobs";
pub const RUNNING_DATA: &str = "/cluster/running-data";
pub const PERSISTENCE_RUNNING_JOBS: &str = "/cluster/persistence-running-jobs";
pub const STOP_RUNNING_JOB: &str = "/cluster/stop-running-job";
pub const JOB_FOLDER_EXISTS: &str = "/cluster/job-folder-exists";
pub const JOB_FILE_EXISTS: &str = "/cluster/job-file-exists";

// Liveness of the daemon itself (not part of the peer protocol).
pub const HEALTH: &str = "/health";
