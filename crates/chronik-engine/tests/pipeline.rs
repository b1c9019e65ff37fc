//! End-to-end exercise of the worker → stage → merge → read pipeline over
//! the SQLite backend.

use std::time::Duration;

use tempfile::TempDir;
use uuid::Uuid;

use chronik_engine::{
    create_session_store, create_task_store, EngineConfig, MergeReader, StorageFormat,
    TaskStorageLayout,
};
use chronik_store::{AccessMode, AttributeStore, StoreResult};
use chronik_tasks::TaskManager;
use chronik_types::{
    timestamp_from_rfc3339, AttributeContainer, ContainerType, Event, EventData, EventSource,
    EventTag, SourceKind,
};

const FLUSH_THRESHOLD: usize = 64 * 1024 * 1024;

/// Run one worker: extract a handful of containers into the task's private
/// store and declare it processed.
fn run_worker(layout: &TaskStorageLayout, task: &Uuid, dates: &[&str]) {
    let path = layout.scratch_path(task);
    let mut store = create_task_store(StorageFormat::Sqlite, &path, FLUSH_THRESHOLD);
    store.open(AccessMode::ReadWrite).unwrap();

    store
        .add_container(AttributeContainer::EventSource(EventSource::new(
            "/evidence/image.dd",
            SourceKind::Directory,
        )))
        .unwrap();
    let data_id = store
        .add_container(AttributeContainer::EventData(EventData::new("fs:stat")))
        .unwrap();

    let mut first_event_id = None;
    for date in dates {
        let mut event = Event::new(timestamp_from_rfc3339(date).unwrap(), *date);
        event.set_event_data_identifier(data_id.clone());
        let id = store
            .add_container(AttributeContainer::Event(event))
            .unwrap();
        first_event_id.get_or_insert(id);
    }

    let mut tag = EventTag::new();
    tag.add_label("reviewed");
    tag.set_event_identifier(first_event_id.unwrap());
    store
        .add_container(AttributeContainer::EventTag(tag))
        .unwrap();

    store.close().unwrap();
    layout.mark_processed(task).unwrap();
}

#[test]
fn worker_results_fold_into_the_session_in_time_order() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::default();
    let layout = TaskStorageLayout::create(dir.path(), StorageFormat::Sqlite).unwrap();

    let mut manager = TaskManager::with_inactivity_timeout(Duration::from_secs(60));
    let session_id = Uuid::new_v4();

    // Dispatch one task and let the "worker" run it.
    let task = manager.create_task(session_id, SourceKind::Directory);
    manager.update_task_as_processing(&task.identifier).unwrap();
    run_worker(
        &layout,
        &task.identifier,
        &[
            "2012-04-20T22:38:46",
            "2012-05-02T13:43:26",
            "2012-04-20T16:44:46",
            "2009-04-05T12:27:39",
        ],
    );

    // The worker reported completion: record the size, make it eligible,
    // and stage the store for merging.
    let size = layout.processed_store_size(&task.identifier).unwrap();
    manager
        .update_task_storage_size(&task.identifier, size)
        .unwrap();
    manager
        .update_task_as_pending_merge(&task.identifier)
        .unwrap();
    layout.stage_for_merge(&task.identifier).unwrap();
    assert_eq!(
        layout.tasks_ready_to_merge().unwrap(),
        vec![task.identifier]
    );

    // Coordinator picks the task and merges in bounded batches.
    let selected = manager.get_task_pending_merge(None).unwrap();
    assert_eq!(selected.identifier, task.identifier);

    let store_path = layout.merge_path(&selected.identifier);
    let task_store = create_task_store(StorageFormat::Sqlite, &store_path, FLUSH_THRESHOLD);
    let mut reader =
        MergeReader::new(selected.clone(), task_store, Some(store_path.clone())).unwrap();

    let session_path = dir.path().join("session.sqlite");
    let mut session = create_session_store(StorageFormat::Sqlite, &session_path, FLUSH_THRESHOLD);
    session.open(AccessMode::ReadWrite).unwrap();

    let mut batches = 0;
    while !reader
        .merge_containers(session.as_mut(), config.merge_batch_size)
        .unwrap()
    {
        batches += 1;
        assert!(batches < 100, "merge failed to converge");
    }
    assert!(reader.warnings().is_empty());

    // The task store was deleted, the task completes, no work remains.
    assert!(!store_path.exists());
    manager.complete_task(&selected.identifier).unwrap();
    assert!(!manager.has_pending_tasks());

    // The session store now holds everything, with references resolved.
    assert_eq!(session.container_count(ContainerType::Event).unwrap(), 4);
    let tag = session
        .container_by_index(ContainerType::EventTag, 0)
        .unwrap()
        .unwrap();
    let (_, tagged_event) = tag.reference().unwrap();
    let tagged_event = tagged_event.clone();
    let event = session
        .container_by_identifier(ContainerType::Event, &tagged_event)
        .unwrap()
        .unwrap();
    assert_eq!(
        event.timestamp(),
        Some(timestamp_from_rfc3339("2012-04-20T22:38:46").unwrap())
    );

    // Chronological read-back across the whole session.
    session.close().unwrap();
    let mut reopened =
        create_session_store(StorageFormat::Sqlite, &session_path, FLUSH_THRESHOLD);
    reopened.open(AccessMode::ReadOnly).unwrap();
    let sorted: Vec<Event> = reopened
        .sorted_events(None)
        .unwrap()
        .collect::<StoreResult<_>>()
        .unwrap();
    let descs: Vec<&str> = sorted.iter().map(|e| e.timestamp_desc.as_str()).collect();
    assert_eq!(
        descs,
        vec![
            "2009-04-05T12:27:39",
            "2012-04-20T16:44:46",
            "2012-04-20T22:38:46",
            "2012-05-02T13:43:26",
        ]
    );
}

#[test]
fn single_step_merge_matches_unbounded_merge() {
    let dir = TempDir::new().unwrap();
    let layout = TaskStorageLayout::create(dir.path(), StorageFormat::Sqlite).unwrap();
    let dates = ["2012-04-20T22:38:46", "2009-04-05T12:27:39"];

    // Two identical task stores.
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    run_worker(&layout, &first, &dates);
    run_worker(&layout, &second, &dates);
    layout.stage_for_merge(&first).unwrap();
    layout.stage_for_merge(&second).unwrap();

    let merge_with_batch = |task: &Uuid, session_name: &str, batch: usize| {
        let store_path = layout.merge_path(task);
        let task_store = create_task_store(StorageFormat::Sqlite, &store_path, FLUSH_THRESHOLD);
        let mut reader = MergeReader::new(
            chronik_tasks::Task::new(Uuid::new_v4()),
            task_store,
            Some(store_path),
        )
        .unwrap();

        let session_path = dir.path().join(session_name);
        let mut session =
            create_session_store(StorageFormat::Sqlite, &session_path, FLUSH_THRESHOLD);
        session.open(AccessMode::ReadWrite).unwrap();
        while !reader.merge_containers(session.as_mut(), batch).unwrap() {}
        session.close().unwrap();

        let mut reopened =
            create_session_store(StorageFormat::Sqlite, &session_path, FLUSH_THRESHOLD);
        reopened.open(AccessMode::ReadOnly).unwrap();
        reopened
    };

    let mut unbounded = merge_with_batch(&first, "session-unbounded.sqlite", 0);
    let mut stepped = merge_with_batch(&second, "session-stepped.sqlite", 1);

    for container_type in ContainerType::ALL {
        assert_eq!(
            unbounded.container_count(container_type).unwrap(),
            stepped.container_count(container_type).unwrap(),
            "count mismatch for {container_type}"
        );
        assert_eq!(
            unbounded.containers(container_type, None).unwrap(),
            stepped.containers(container_type, None).unwrap(),
            "contents mismatch for {container_type}"
        );
    }
}

#[test]
fn corrupt_rows_are_contained_and_dependents_dropped() {
    let dir = TempDir::new().unwrap();
    let layout = TaskStorageLayout::create(dir.path(), StorageFormat::Sqlite).unwrap();
    let task = Uuid::new_v4();
    run_worker(&layout, &task, &["2012-04-20T22:38:46"]);
    layout.stage_for_merge(&task).unwrap();
    let store_path = layout.merge_path(&task);

    // Corrupt the event data row the events reference.
    let conn = rusqlite::Connection::open(&store_path).unwrap();
    conn.execute("UPDATE event_data SET _data = X'00ff' WHERE _identifier = 1", [])
        .unwrap();
    drop(conn);

    let task_store = create_task_store(StorageFormat::Sqlite, &store_path, FLUSH_THRESHOLD);
    let mut reader = MergeReader::new(
        chronik_tasks::Task::new(Uuid::new_v4()),
        task_store,
        Some(store_path.clone()),
    )
    .unwrap();

    let session_path = dir.path().join("session.sqlite");
    let mut session = create_session_store(StorageFormat::Sqlite, &session_path, FLUSH_THRESHOLD);
    session.open(AccessMode::ReadWrite).unwrap();

    // The merge still completes.
    assert!(reader.merge_containers(session.as_mut(), 0).unwrap());
    assert!(!store_path.exists());

    // The corrupt data row and its dependent event are both absent.
    assert_eq!(session.container_count(ContainerType::EventData).unwrap(), 0);
    assert_eq!(session.container_count(ContainerType::Event).unwrap(), 0);
    // The source survived.
    assert_eq!(
        session.container_count(ContainerType::EventSource).unwrap(),
        1
    );

    // The warnings distinguish the failure modes: the corrupt row itself,
    // the event dropped because its data "could not be deserialized", and
    // the tag dropped because its (already dropped) event "could not be
    // found".
    let message_for = |container_type: ContainerType| {
        reader
            .warnings()
            .iter()
            .find(|warning| warning.container_type == container_type)
            .map(|warning| warning.message.as_str())
            .unwrap_or_default()
    };
    assert!(message_for(ContainerType::EventData).contains("could not be deserialized"));
    assert!(message_for(ContainerType::Event).contains("could not be deserialized"));
    assert!(message_for(ContainerType::EventTag).contains("could not be found"));
}
