use std::path::Path;

use uuid::Uuid;

use chronik_kv::{KeyValueClient, KvStore};
use chronik_sqlite::SqliteStore;
use chronik_store::{AttributeStore, MemoryStore, StorageScope};
use chronik_streams::StreamsStore;

/// File-backed storage formats a store path can be created with.
///
/// The key/value backend is not part of this enum: it is addressed by
/// session and task identifiers rather than a path, and is constructed via
/// [`create_kv_store`] with an injected client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageFormat {
    Memory,
    Sqlite,
    Streams,
}

impl StorageFormat {
    /// File extension used by the task storage layout.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Memory => "mem",
            Self::Sqlite => "sqlite",
            Self::Streams => "cnks",
        }
    }
}

fn create_store(
    format: StorageFormat,
    scope: StorageScope,
    path: &Path,
    flush_threshold: usize,
) -> Box<dyn AttributeStore> {
    match format {
        StorageFormat::Memory => Box::new(MemoryStore::new()),
        StorageFormat::Sqlite => {
            Box::new(SqliteStore::new(path, scope).with_flush_threshold(flush_threshold))
        }
        StorageFormat::Streams => {
            Box::new(StreamsStore::new(path, scope).with_flush_threshold(flush_threshold))
        }
    }
}

/// Store for one task's private results.
pub fn create_task_store(
    format: StorageFormat,
    path: &Path,
    flush_threshold: usize,
) -> Box<dyn AttributeStore> {
    create_store(format, StorageScope::Task, path, flush_threshold)
}

/// The durable session-wide result store.
pub fn create_session_store(
    format: StorageFormat,
    path: &Path,
    flush_threshold: usize,
) -> Box<dyn AttributeStore> {
    create_store(format, StorageScope::Session, path, flush_threshold)
}

/// Task store on a key/value service. The client is injected so callers
/// choose the real service or an in-process fake.
pub fn create_kv_store(
    client: Box<dyn KeyValueClient>,
    session: Uuid,
    task: Uuid,
) -> Box<dyn AttributeStore> {
    Box::new(KvStore::new(client, session, task))
}
