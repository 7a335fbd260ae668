//! Data model shared by the engines and the store adapters.

pub mod record;
pub mod report;
pub mod value;

pub use record::{BackupRecord, BackupStatus, BackupType, RecordFilter};
pub use report::{PruneReport, RestoreOutcome, RestoreRequest, VerificationReport};
pub use value::{Row, Snapshot, Value};
