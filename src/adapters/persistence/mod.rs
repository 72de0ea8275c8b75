//! Persistence Adapters - SQLite Time-series Store
//!
//! Implements the `BarStore` and `SnapshotStore` ports on a single
//! SQLite file. Writes are upserts in one transaction per batch, so a
//! composite key is never stored twice and a failed batch leaves no
//! partial rows behind.

pub mod sqlite;

pub use sqlite::SqliteStore;
