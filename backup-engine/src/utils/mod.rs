//! Utility modules for the backup engine.

pub mod cancel;
pub mod errors;
pub mod logger;

pub use errors::{EngineError, Result};
