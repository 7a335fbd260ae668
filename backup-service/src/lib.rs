//! Backup Service
//!
//! Runs the backup engine against a SQLite application database, with
//! backup records in SQLite and snapshot blobs on the local filesystem.

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod state;
pub mod stores;
