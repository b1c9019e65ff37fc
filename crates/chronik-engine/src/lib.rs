//! Coordinator-side merge engine for chronik.
//!
//! Workers persist attribute containers into private task stores; this
//! crate holds everything the coordinator needs to fold those stores into
//! the durable session store:
//!
//! - [`EngineConfig`] — the shared tunables (TOML-loadable)
//! - [`StorageFormat`] + factory functions — enum-keyed backend selection
//! - [`TaskStorageLayout`] — scratch directory with `processed/` and
//!   `merge/`, atomic rename staging, and the ready-to-merge scan
//! - [`RemapTable`] — merge-scoped local → session identifier mapping
//! - [`MergeReader`] — resumable, failure-containing fold of one task
//!   store into the session store

pub mod config;
pub mod error;
pub mod factory;
pub mod layout;
pub mod merge;
pub mod remap;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use factory::{
    create_kv_store, create_session_store, create_task_store, StorageFormat,
};
pub use layout::TaskStorageLayout;
pub use merge::{MergeReader, MergeWarning, MERGE_ORDER};
pub use remap::RemapTable;
