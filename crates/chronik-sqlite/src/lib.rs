//! SQLite row-store file backend for chronik.
//!
//! Containers are grouped into per-type tables of
//! `(_identifier INTEGER PRIMARY KEY AUTOINCREMENT, [_timestamp BIGINT,]
//! _data TEXT|BLOB)`, with a `metadata` table carrying the format version,
//! compression mode, serialization format, and storage scope. The metadata
//! is validated on every open against three compatibility thresholds:
//! minimum-appendable, minimum-upgradeable, and minimum-readable. Writes
//! are buffered per type and flushed as one transaction; transient database
//! locks are retried with a fixed backoff before being propagated.

pub mod metadata;
pub mod store;

pub use metadata::{
    StorageMetadata, APPEND_COMPATIBLE_FORMAT_VERSION, FORMAT_VERSION,
    READ_COMPATIBLE_FORMAT_VERSION, UPGRADE_COMPATIBLE_FORMAT_VERSION,
};
pub use store::{SqliteStore, DEFAULT_FLUSH_THRESHOLD};
