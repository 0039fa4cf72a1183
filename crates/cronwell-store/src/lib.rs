//! SQLite implementations of the cronwell data-access ports.

pub mod db;
pub mod error;
pub mod history;
pub mod monitor;
pub mod registry;

pub use error::StoreError;
pub use history::HistoryManager;
pub use monitor::MonitorManager;
pub use registry::NodeRegistry;
