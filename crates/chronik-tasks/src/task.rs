use chronik_types::{now_micros, SourceKind};
use uuid::Uuid;

/// One unit of extraction work dispatched to a worker.
///
/// A task exclusively owns its private store until a merge begins. Times
/// are wall-clock microseconds since the POSIX epoch; liveness decisions
/// use the tracker's monotonic clock, not these fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub identifier: Uuid,
    pub session_identifier: Uuid,
    pub start_time: i64,
    pub completion_time: Option<i64>,
    /// Terminal flag set when the session aborts; never a rollback.
    pub aborted: bool,
    /// Updated by worker heartbeats.
    pub last_processing_time: Option<i64>,
    /// Size of the worker's store, known once the store stops changing.
    /// Required before the task becomes eligible for merging.
    pub storage_file_size: Option<u64>,
    pub retried: bool,
    /// Set on a retry task: the task it replaces.
    pub original_task_identifier: Option<Uuid>,
    /// Whether the task's evidence source is a file or a directory tree.
    pub source_kind: SourceKind,
}

impl Task {
    pub fn new(session_identifier: Uuid) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            session_identifier,
            start_time: now_micros(),
            completion_time: None,
            aborted: false,
            last_processing_time: None,
            storage_file_size: None,
            retried: false,
            original_task_identifier: None,
            source_kind: SourceKind::File,
        }
    }

    pub fn with_source_kind(mut self, source_kind: SourceKind) -> Self {
        self.source_kind = source_kind;
        self
    }

    /// Merge selection weight: lower merges earlier. Directory-sourced
    /// tasks outrank everything because their results tend to shrink the
    /// remaining backlog the most; other tasks order by store size so one
    /// huge task never starves a queue of small, cheap merges.
    pub fn merge_priority(&self) -> u64 {
        match self.source_kind {
            SourceKind::Directory => 0,
            SourceKind::File => self.storage_file_size.map_or(u64::MAX, |size| size.max(1)),
        }
    }
}
