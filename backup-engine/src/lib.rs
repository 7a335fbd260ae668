//! Backup Engine Library
//!
//! Snapshots a fixed set of relational tables into compressed, checksummed
//! blobs, restores them selectively, verifies them in place and prunes them
//! under a tiered retention policy.

pub mod codec;
pub mod config;
pub mod engine;
pub mod model;
pub mod service;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use model::{BackupRecord, BackupStatus, BackupType, RestoreOutcome, RestoreRequest};
pub use service::BackupService;
pub use utils::errors::{EngineError, Result};
