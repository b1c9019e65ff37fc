//! Key/value service backend for chronik.
//!
//! Each container type maps to one namespaced hash keyed
//! `{session}-{task}-{container_type}`; field names are identifier strings
//! and values are JSON-serialized containers. A supplementary sorted set
//! (score = timestamp) is maintained for events so chronological retrieval
//! does not scan every container. Identifiers are random 128-bit keys, so
//! concurrent writers need no coordination.
//!
//! The service is reached through the [`KeyValueClient`] trait:
//! [`RedisClient`] for a real Redis-compatible service, [`MemoryClient`]
//! as an in-process fake for tests and embedding.

pub mod client;
pub mod store;

pub use client::{KeyValueClient, MemoryClient, RedisClient};
pub use store::KvStore;
