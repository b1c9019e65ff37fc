//! Segmented stream-of-streams file backend for chronik.
//!
//! One append-only file holds, per container type and flush generation N,
//! three companion streams:
//!
//! - `{type}_data.N` — repeated `[u32 size][payload]` serialized entries
//! - `{type}_index.N` — one u32 offset per entry, for random access
//! - `{type}_timestamps.N` — one i64 per entry (events only), for range
//!   pruning without touching payloads
//!
//! plus a top-level `metadata` stream of key=value text. A fresh stream
//! number is started each time a type's buffer is flushed; stream numbers
//! are append-only and never rewritten. Events pass through the write
//! buffer heap, so flushed event streams are physically sorted by
//! timestamp.

pub mod format;
pub mod partition;
pub mod store;

pub use format::{StreamKind, StreamMetadata, FORMAT_VERSION, MAGIC};
pub use partition::StreamPartition;
pub use store::{StreamsStore, DEFAULT_FLUSH_THRESHOLD};
