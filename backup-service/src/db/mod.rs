pub mod connection;
pub mod migrate;
