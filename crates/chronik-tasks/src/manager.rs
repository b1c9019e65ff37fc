use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use chronik_types::{now_micros, SourceKind};
use uuid::Uuid;

use crate::error::{TaskError, TaskResult};
use crate::task::Task;

/// Default heartbeat silence after which a task counts as abandoned.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

struct ProcessingEntry {
    task: Task,
    last_heartbeat: Instant,
}

struct PendingEntry {
    priority: u64,
    seq: u64,
    task: Task,
}

impl PendingEntry {
    fn key(&self) -> (u64, u64) {
        (self.priority, self.seq)
    }
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Min-heap of tasks awaiting merge: directory-sourced tasks first, then
/// ascending store size, first-found among equals.
#[derive(Default)]
struct PendingMergeHeap {
    heap: BinaryHeap<Reverse<PendingEntry>>,
    seq: u64,
}

impl PendingMergeHeap {
    fn push(&mut self, task: Task) {
        self.seq += 1;
        self.heap.push(Reverse(PendingEntry {
            priority: task.merge_priority(),
            seq: self.seq,
            task,
        }));
    }

    fn peek(&self) -> Option<&Task> {
        self.heap.peek().map(|Reverse(entry)| &entry.task)
    }

    fn pop(&mut self) -> Option<Task> {
        self.heap.pop().map(|Reverse(entry)| entry.task)
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn remove(&mut self, identifier: &Uuid) -> bool {
        let before = self.heap.len();
        let entries: Vec<Reverse<PendingEntry>> = std::mem::take(&mut self.heap).into_vec();
        self.heap = entries
            .into_iter()
            .filter(|Reverse(entry)| entry.task.identifier != *identifier)
            .collect();
        before != self.heap.len()
    }
}

/// Tracks every task handed to a worker and arbitrates which finished task
/// merges next.
///
/// State machine per task:
/// `created → processing → {pending_merge → merging → completed}` with an
/// `abandoned → retried` branch out of `processing` whenever no heartbeat
/// arrived within the inactivity timeout.
///
/// The abandonment sweep runs as a side effect of `get_abandoned_tasks()`
/// and `has_pending_tasks()`; callers must not assume those are read-only.
pub struct TaskManager {
    inactivity_timeout: Duration,
    processing: HashMap<Uuid, ProcessingEntry>,
    abandoned: HashMap<Uuid, Task>,
    pending_merge: PendingMergeHeap,
    merging: HashMap<Uuid, Task>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::with_inactivity_timeout(DEFAULT_INACTIVITY_TIMEOUT)
    }

    pub fn with_inactivity_timeout(inactivity_timeout: Duration) -> Self {
        Self {
            inactivity_timeout,
            processing: HashMap::new(),
            abandoned: HashMap::new(),
            pending_merge: PendingMergeHeap::default(),
            merging: HashMap::new(),
        }
    }

    /// Create and register a new task. The task starts in the processing
    /// state; creation counts as its first heartbeat.
    pub fn create_task(&mut self, session_identifier: Uuid, source_kind: SourceKind) -> Task {
        let task = Task::new(session_identifier).with_source_kind(source_kind);
        tracing::debug!(task = %task.identifier, "created task");
        self.processing.insert(
            task.identifier,
            ProcessingEntry {
                task: task.clone(),
                last_heartbeat: Instant::now(),
            },
        );
        task
    }

    /// Record a worker heartbeat.
    pub fn update_task_as_processing(&mut self, identifier: &Uuid) -> TaskResult<()> {
        let entry = self
            .processing
            .get_mut(identifier)
            .ok_or(TaskError::NotFound(*identifier))?;
        entry.last_heartbeat = Instant::now();
        entry.task.last_processing_time = Some(now_micros());
        Ok(())
    }

    /// Record the size of the worker's finished store. A task without a
    /// recorded size cannot become eligible for merge.
    pub fn update_task_storage_size(&mut self, identifier: &Uuid, size: u64) -> TaskResult<()> {
        let entry = self
            .processing
            .get_mut(identifier)
            .ok_or(TaskError::NotFound(*identifier))?;
        entry.task.storage_file_size = Some(size);
        Ok(())
    }

    /// Move heartbeat-silent tasks out of the processing set. Runs inside
    /// every liveness query.
    fn sweep_abandoned(&mut self) {
        let timeout = self.inactivity_timeout;
        let expired: Vec<Uuid> = self
            .processing
            .iter()
            .filter(|(_, entry)| entry.last_heartbeat.elapsed() > timeout)
            .map(|(identifier, _)| *identifier)
            .collect();
        for identifier in expired {
            if let Some(entry) = self.processing.remove(&identifier) {
                tracing::warn!(task = %identifier, "task abandoned: no heartbeat");
                self.abandoned.insert(identifier, entry.task);
            }
        }
    }

    /// Abandoned tasks that have not been retried yet. Sweeps first.
    pub fn get_abandoned_tasks(&mut self) -> Vec<Task> {
        self.sweep_abandoned();
        self.abandoned
            .values()
            .filter(|task| !task.retried)
            .cloned()
            .collect()
    }

    /// Whether any work remains: processing, awaiting merge, merging, or
    /// abandoned without a retry. Sweeps first.
    pub fn has_pending_tasks(&mut self) -> bool {
        self.sweep_abandoned();
        !self.processing.is_empty()
            || !self.pending_merge.is_empty()
            || !self.merging.is_empty()
            || self.abandoned.values().any(|task| !task.retried)
    }

    /// Create the retry for an abandoned task. The original is marked
    /// retried; its results, should they ever arrive, are discarded.
    pub fn get_retry_task(&mut self, identifier: &Uuid) -> TaskResult<Task> {
        let original = self
            .abandoned
            .get_mut(identifier)
            .ok_or(TaskError::NotFound(*identifier))?;
        if original.retried {
            return Err(TaskError::InvalidState(format!(
                "task {identifier} was already retried"
            )));
        }
        original.retried = true;

        let mut retry =
            Task::new(original.session_identifier).with_source_kind(original.source_kind);
        retry.original_task_identifier = Some(*identifier);
        tracing::warn!(task = %identifier, retry = %retry.identifier, "retrying abandoned task");

        self.processing.insert(
            retry.identifier,
            ProcessingEntry {
                task: retry.clone(),
                last_heartbeat: Instant::now(),
            },
        );
        Ok(retry)
    }

    /// Mark a task's results as ready to merge. Requires the storage size
    /// to be recorded; a task that was abandoned in the meantime is
    /// rejected so stale results are never merged.
    pub fn update_task_as_pending_merge(&mut self, identifier: &Uuid) -> TaskResult<()> {
        if self.abandoned.contains_key(identifier) {
            return Err(TaskError::Abandoned(*identifier));
        }
        let entry = self
            .processing
            .get(identifier)
            .ok_or(TaskError::NotFound(*identifier))?;
        if entry.task.storage_file_size.is_none() {
            return Err(TaskError::StorageSizeNotSet(*identifier));
        }
        let mut entry = self
            .processing
            .remove(identifier)
            .ok_or(TaskError::NotFound(*identifier))?;
        entry.task.completion_time = Some(now_micros());
        self.pending_merge.push(entry.task);
        Ok(())
    }

    /// Select the next task to merge, if any candidate should run before
    /// (or instead of) the task currently being merged.
    ///
    /// A directory-sourced task preempts any currently-favored smaller
    /// task; a strictly larger task never preempts a smaller one already
    /// selected. Equal priorities fall back to first-found.
    pub fn get_task_pending_merge(&mut self, current: Option<&Task>) -> Option<Task> {
        let candidate_priority = self.pending_merge.peek()?.merge_priority();
        if let Some(current) = current {
            if candidate_priority >= current.merge_priority() {
                return None;
            }
        }
        let task = self.pending_merge.pop()?;
        self.merging.insert(task.identifier, task.clone());
        Some(task)
    }

    /// Remove a task from every tracking set once its merge finished.
    /// Idempotent against a task that was concurrently abandoned and
    /// retried; completing a task that was never scheduled is a
    /// coordinator bug.
    pub fn complete_task(&mut self, identifier: &Uuid) -> TaskResult<()> {
        let mut found = self.merging.remove(identifier).is_some();
        found |= self.pending_merge.remove(identifier);
        found |= self.abandoned.remove(identifier).is_some();
        if !found {
            return Err(TaskError::InvalidState(format!(
                "task {identifier} completed without being scheduled"
            )));
        }
        tracing::debug!(task = %identifier, "task completed");
        Ok(())
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}
