use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use chronik_store::{AccessMode, AttributeStore, StoreError};
use chronik_tasks::Task;
use chronik_types::{AttributeContainer, ContainerIdentifier, ContainerType};

use crate::error::EngineResult;
use crate::remap::RemapTable;

/// Container types in merge dependency order. Later types carry local
/// identifiers pointing at earlier types, so the remap table must already
/// hold the targets when a reference is rewritten.
pub const MERGE_ORDER: [ContainerType; 6] = [
    ContainerType::EventSource,
    ContainerType::EventDataStream,
    ContainerType::EventData,
    ContainerType::Event,
    ContainerType::ExtractionWarning,
    ContainerType::EventTag,
];

/// One recoverable problem recorded while merging. The merge itself keeps
/// going; the affected container is permanently dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeWarning {
    pub container_type: ContainerType,
    pub message: String,
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.container_type, self.message)
    }
}

/// Folds one finished task's private store into the session store exactly
/// once, remapping cross-container identifiers as it goes.
///
/// The fold is resumable: [`MergeReader::merge_containers`] processes a
/// bounded batch and preserves its cursor, so a coordinator can interleave
/// merging with dispatching new work. Once every container type is drained
/// the task store file is deleted.
pub struct MergeReader {
    task: Task,
    store: Box<dyn AttributeStore>,
    store_path: Option<PathBuf>,
    remap: RemapTable,
    /// Rows that failed to deserialize, so dependents can be dropped with
    /// a message distinguishing "could not be deserialized" from "could
    /// not be found".
    failed: HashSet<(ContainerType, ContainerIdentifier)>,
    warnings: Vec<MergeWarning>,
    type_cursor: usize,
    container_cursor: usize,
    finished: bool,
}

impl MergeReader {
    /// Open the task store read-only and prepare a merge pass.
    ///
    /// `store_path` is the file (or store directory) to delete once the
    /// merge completes; pass `None` for stores without a filesystem
    /// footprint, whose cleanup belongs to the caller.
    pub fn new(
        task: Task,
        mut store: Box<dyn AttributeStore>,
        store_path: Option<PathBuf>,
    ) -> EngineResult<Self> {
        store.open(AccessMode::ReadOnly)?;
        Ok(Self {
            task,
            store,
            store_path,
            remap: RemapTable::new(),
            failed: HashSet::new(),
            warnings: Vec::new(),
            type_cursor: 0,
            container_cursor: 0,
            finished: false,
        })
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Warnings recorded so far. A merge that completes with warnings is
    /// still usable; drops are never escalated into failures.
    pub fn warnings(&self) -> &[MergeWarning] {
        &self.warnings
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Merge up to `max_containers` containers (0 = unbounded) into the
    /// session store. Returns `false` with cursor state preserved when the
    /// batch limit stopped the pass, `true` once every container type is
    /// drained and the task store has been deleted.
    pub fn merge_containers(
        &mut self,
        session: &mut dyn AttributeStore,
        max_containers: usize,
    ) -> EngineResult<bool> {
        if self.finished {
            return Ok(true);
        }

        let mut processed = 0usize;
        while self.type_cursor < MERGE_ORDER.len() {
            let container_type = MERGE_ORDER[self.type_cursor];
            loop {
                if max_containers > 0 && processed >= max_containers {
                    tracing::debug!(
                        task = %self.task.identifier,
                        processed,
                        "merge batch limit reached"
                    );
                    return Ok(false);
                }
                match self.store.container_by_index(container_type, self.container_cursor) {
                    Ok(Some(container)) => {
                        self.container_cursor += 1;
                        processed += 1;
                        self.merge_one(session, container)?;
                    }
                    Ok(None) => {
                        self.type_cursor += 1;
                        self.container_cursor = 0;
                        break;
                    }
                    Err(StoreError::Deserialization {
                        container_type,
                        identifier,
                        reason,
                    }) => {
                        // Recoverable: skip this one container, keep going.
                        self.container_cursor += 1;
                        processed += 1;
                        tracing::warn!(
                            task = %self.task.identifier,
                            %container_type,
                            %identifier,
                            "container could not be deserialized: {reason}"
                        );
                        self.warnings.push(MergeWarning {
                            container_type,
                            message: format!(
                                "container {identifier} could not be deserialized: {reason}"
                            ),
                        });
                        self.failed.insert((container_type, identifier));
                    }
                    Err(other) => return Err(other.into()),
                }
            }
        }

        self.finish()?;
        Ok(true)
    }

    fn merge_one(
        &mut self,
        session: &mut dyn AttributeStore,
        mut container: AttributeContainer,
    ) -> EngineResult<()> {
        let container_type = container.container_type();
        let local = container.identifier().cloned();

        if let Some((referenced_type, referenced)) = container.reference() {
            let referenced = referenced.clone();
            match self.remap.lookup(referenced_type, &referenced) {
                Some(mapped) => {
                    let mapped = mapped.clone();
                    container.set_reference(mapped);
                }
                None => {
                    // Partial-failure containment: drop only this
                    // container and record why the reference is dangling.
                    let cause = if self.failed.contains(&(referenced_type, referenced.clone())) {
                        "could not be deserialized"
                    } else {
                        "could not be found"
                    };
                    let local_display = local
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "<unidentified>".to_string());
                    tracing::warn!(
                        task = %self.task.identifier,
                        %container_type,
                        container = %local_display,
                        "dropped: referenced {referenced_type} {referenced} {cause}"
                    );
                    self.warnings.push(MergeWarning {
                        container_type,
                        message: format!(
                            "container {local_display} dropped: referenced {referenced_type} \
                             {referenced} {cause}"
                        ),
                    });
                    return Ok(());
                }
            }
        }

        let session_identifier = session.add_container(container)?;
        if let Some(local) = local {
            self.remap.insert(container_type, local, session_identifier);
        }
        Ok(())
    }

    fn finish(&mut self) -> EngineResult<()> {
        self.finished = true;
        self.store.close()?;
        if let Some(path) = &self.store_path {
            if path.is_dir() {
                fs::remove_dir_all(path)?;
            } else if path.exists() {
                fs::remove_file(path)?;
            }
            tracing::debug!(
                task = %self.task.identifier,
                path = %path.display(),
                remapped = self.remap.len(),
                warnings = self.warnings.len(),
                "merge complete, task store deleted"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronik_store::MemoryStore;
    use chronik_types::{Event, EventData, EventSource, EventTag, SourceKind};
    use uuid::Uuid;

    fn task() -> Task {
        Task::new(Uuid::new_v4())
    }

    /// Build a task store with a source, a data container, two events
    /// referencing the data, and a tag referencing the first event.
    fn populated_task_store() -> Box<dyn AttributeStore> {
        let mut store = MemoryStore::new();
        store.open(AccessMode::ReadWrite).unwrap();
        store
            .add_container(AttributeContainer::EventSource(EventSource::new(
                "/evidence",
                SourceKind::File,
            )))
            .unwrap();
        let data_id = store
            .add_container(AttributeContainer::EventData(EventData::new("fs:stat")))
            .unwrap();

        let mut first = Event::new(10, "Creation Time");
        first.set_event_data_identifier(data_id.clone());
        let first_id = store
            .add_container(AttributeContainer::Event(first))
            .unwrap();

        let mut second = Event::new(20, "Modification Time");
        second.set_event_data_identifier(data_id);
        store.add_container(AttributeContainer::Event(second)).unwrap();

        let mut tag = EventTag::new();
        tag.add_label("reviewed");
        tag.set_event_identifier(first_id);
        store.add_container(AttributeContainer::EventTag(tag)).unwrap();

        store.close().unwrap();
        Box::new(store)
    }

    fn open_session() -> MemoryStore {
        let mut session = MemoryStore::new();
        session.open(AccessMode::ReadWrite).unwrap();
        session
    }

    #[test]
    fn merges_all_types_and_remaps_references() {
        let mut session = open_session();
        let mut reader = MergeReader::new(task(), populated_task_store(), None).unwrap();

        assert!(reader.merge_containers(&mut session, 0).unwrap());
        assert!(reader.warnings().is_empty());

        assert_eq!(session.container_count(ContainerType::Event).unwrap(), 2);
        assert_eq!(session.container_count(ContainerType::EventData).unwrap(), 1);
        assert_eq!(session.container_count(ContainerType::EventTag).unwrap(), 1);

        // The tag's reference now resolves inside the session store.
        let tag = session
            .container_by_index(ContainerType::EventTag, 0)
            .unwrap()
            .unwrap();
        let (referenced_type, referenced) = tag.reference().unwrap();
        assert_eq!(referenced_type, ContainerType::Event);
        let event = session
            .container_by_identifier(ContainerType::Event, &referenced.clone())
            .unwrap()
            .unwrap();
        assert_eq!(event.timestamp(), Some(10));

        // And the event's own reference resolves to the merged data.
        let (data_type, data_id) = event.reference().unwrap();
        assert_eq!(data_type, ContainerType::EventData);
        assert!(session
            .container_by_identifier(ContainerType::EventData, &data_id.clone())
            .unwrap()
            .is_some());
    }

    #[test]
    fn bounded_batches_resume_and_match_unbounded_merge() {
        let mut unbounded_session = open_session();
        let mut reader = MergeReader::new(task(), populated_task_store(), None).unwrap();
        assert!(reader.merge_containers(&mut unbounded_session, 0).unwrap());

        let mut stepped_session = open_session();
        let mut reader = MergeReader::new(task(), populated_task_store(), None).unwrap();
        let mut steps = 0;
        while !reader.merge_containers(&mut stepped_session, 1).unwrap() {
            steps += 1;
            assert!(steps < 100, "merge failed to converge");
        }
        assert!(steps >= 5, "expected one container per step");

        for container_type in MERGE_ORDER {
            assert_eq!(
                stepped_session.container_count(container_type).unwrap(),
                unbounded_session.container_count(container_type).unwrap(),
            );
        }
        let a = stepped_session.containers(ContainerType::Event, None).unwrap();
        let b = unbounded_session.containers(ContainerType::Event, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dangling_reference_drops_only_the_dependent() {
        let mut store = MemoryStore::new();
        store.open(AccessMode::ReadWrite).unwrap();
        let mut orphan = Event::new(5, "Creation Time");
        orphan.set_event_data_identifier(ContainerIdentifier::Sequence(99));
        store.add_container(AttributeContainer::Event(orphan)).unwrap();
        store
            .add_container(AttributeContainer::Event(Event::new(6, "Creation Time")))
            .unwrap();
        store.close().unwrap();

        let mut session = open_session();
        let mut reader = MergeReader::new(task(), Box::new(store), None).unwrap();
        assert!(reader.merge_containers(&mut session, 0).unwrap());

        // The orphan is gone, its sibling survived, the merge completed.
        assert_eq!(session.container_count(ContainerType::Event).unwrap(), 1);
        assert_eq!(reader.warnings().len(), 1);
        assert!(reader.warnings()[0].message.contains("could not be found"));
    }

    #[test]
    fn merge_after_finish_is_a_no_op() {
        let mut session = open_session();
        let mut reader = MergeReader::new(task(), populated_task_store(), None).unwrap();
        assert!(reader.merge_containers(&mut session, 0).unwrap());
        assert!(reader.is_finished());
        assert!(reader.merge_containers(&mut session, 0).unwrap());
        assert_eq!(session.container_count(ContainerType::Event).unwrap(), 2);
    }
}
