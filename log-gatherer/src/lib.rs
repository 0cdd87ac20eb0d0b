//! Log Gatherer Library
//!
//! Collects log files and systemd journals from inventory hosts over
//! rsync/ssh with bounded parallelism and retries, and bundles newly
//! collected files into incremental per-host archives.

pub mod archive;
pub mod collector;
pub mod config;
pub mod executor;
pub mod fs;
pub mod inventory;
pub mod planner;
pub mod probe;
pub mod scheduler;
pub mod shutdown;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::GathererError;
pub type Result<T> = std::result::Result<T, GathererError>;
