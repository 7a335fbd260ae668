//! SQLite adapters for the engine's store traits.

pub mod sqlite_metadata;
pub mod sqlite_tables;

pub use sqlite_metadata::SqliteMetadataStore;
pub use sqlite_tables::SqliteTables;
