use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use chronik_store::{
    AccessMode, AttributeStore, CompressionFormat, ContainerCodec, ContainerFilter, EventHeap,
    EventPartition, SortedEventMerge, StorageScope, StoreError, StoreLifecycle, StoreResult,
    VecPartition,
};
use chronik_types::{AttributeContainer, ContainerIdentifier, ContainerType, Event, TimeRange};

use crate::format::{
    append_segment, decode_offsets, decode_timestamps, encode_metadata, encode_offsets,
    encode_timestamps, parse_metadata, parse_stream_name, read_entry_at, read_header,
    read_segment, scan_segments, stream_name, write_header, Segment, StreamKind, StreamMetadata,
    METADATA_STREAM,
};
use crate::partition::StreamPartition;

/// Default per-type buffer size that triggers a flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 64 * 1024 * 1024;

/// Per-type write-side state: the stream being filled plus bookkeeping for
/// the streams already on disk.
struct TypeState {
    /// Number of the stream the buffer will flush into. Streams are
    /// numbered from 1; flushed stream numbers are never rewritten.
    next_stream: u32,
    /// Entry count per flushed stream, in stream-number order.
    flushed_counts: Vec<u32>,
    /// Buffered containers in insertion order (entry-index order).
    buffer: Vec<AttributeContainer>,
    /// Buffered payloads for non-chronological types, parallel to `buffer`.
    pending: Vec<Vec<u8>>,
    /// Buffered event payloads, pre-sorted for flushing.
    heap: EventHeap,
    pending_bytes: usize,
}

impl TypeState {
    fn new() -> Self {
        Self {
            next_stream: 1,
            flushed_counts: Vec::new(),
            buffer: Vec::new(),
            pending: Vec::new(),
            heap: EventHeap::new(),
            pending_bytes: 0,
        }
    }

    fn flushed_total(&self) -> usize {
        self.flushed_counts.iter().map(|&count| count as usize).sum()
    }

    fn buffered_bytes(&self, timestamped: bool) -> usize {
        if timestamped {
            self.heap.data_size()
        } else {
            self.pending_bytes
        }
    }
}

/// Attribute store backed by one segmented, append-only container file.
///
/// Each container type owns a numbered sequence of streams; every flush
/// appends a data stream, an offset table, and (for events) a timestamp
/// table under a fresh stream number. Events are buffered through
/// [`EventHeap`], so flushed event streams are physically sorted by
/// timestamp and the timestamp tables support range pruning.
pub struct StreamsStore {
    path: PathBuf,
    scope: StorageScope,
    codec: ContainerCodec,
    flush_threshold: usize,
    lifecycle: StoreLifecycle,
    file: Option<File>,
    segments: BTreeMap<String, Segment>,
    types: BTreeMap<ContainerType, TypeState>,
    offset_cache: BTreeMap<(ContainerType, u32), Vec<u32>>,
    metadata: Option<StreamMetadata>,
}

impl StreamsStore {
    pub fn new(path: impl Into<PathBuf>, scope: StorageScope) -> Self {
        Self {
            path: path.into(),
            scope,
            // Stream payloads are stored uncompressed; the format's
            // metadata stream declares no compression field.
            codec: ContainerCodec::new(CompressionFormat::None),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            lifecycle: StoreLifecycle::new(),
            file: None,
            segments: BTreeMap::new(),
            types: BTreeMap::new(),
            offset_cache: BTreeMap::new(),
            metadata: None,
        }
    }

    pub fn with_flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scope(&self) -> StorageScope {
        self.scope
    }

    /// Parsed metadata of the open file.
    pub fn metadata(&self) -> Option<&StreamMetadata> {
        self.metadata.as_ref()
    }

    fn flush_type(&mut self, container_type: ContainerType) -> StoreResult<()> {
        let Some(state) = self.types.get_mut(&container_type) else {
            return Ok(());
        };
        if state.buffer.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or(StoreError::NotOpen)?;

        let stream = state.next_stream;
        let count = state.buffer.len();
        let mut data = Vec::new();
        let mut offsets = vec![0u32; count];
        let mut timestamps = Vec::new();

        if container_type.is_timestamped() {
            // Drain the heap: entries land in the data stream in ascending
            // timestamp order while the offset table stays indexed by the
            // entry index assigned at add time.
            for event in state.heap.drain_sorted() {
                offsets[event.entry as usize] = data.len() as u32;
                data.extend_from_slice(&(event.payload.len() as u32).to_be_bytes());
                data.extend_from_slice(&event.payload);
                timestamps.push(event.timestamp);
            }
        } else {
            for (entry, payload) in state.pending.drain(..).enumerate() {
                offsets[entry] = data.len() as u32;
                data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                data.extend_from_slice(&payload);
            }
        }

        let data_bytes = data.len();
        let name = stream_name(container_type, StreamKind::Data, stream);
        let segment = append_segment(file, &name, &data)?;
        self.segments.insert(name, segment);

        let name = stream_name(container_type, StreamKind::Index, stream);
        let segment = append_segment(file, &name, &encode_offsets(&offsets))?;
        self.segments.insert(name, segment);

        if container_type.is_timestamped() {
            let name = stream_name(container_type, StreamKind::Timestamps, stream);
            let segment = append_segment(file, &name, &encode_timestamps(&timestamps))?;
            self.segments.insert(name, segment);
        }

        let state = self
            .types
            .get_mut(&container_type)
            .ok_or_else(|| StoreError::Corrupt("type state vanished during flush".into()))?;
        state.flushed_counts.push(count as u32);
        state.next_stream += 1;
        state.buffer.clear();
        state.pending_bytes = 0;

        tracing::debug!(
            container_type = %container_type,
            stream,
            entries = count,
            bytes = data_bytes,
            "flushed stream"
        );
        Ok(())
    }

    fn ensure_offsets(&mut self, container_type: ContainerType, stream: u32) -> StoreResult<()> {
        if self.offset_cache.contains_key(&(container_type, stream)) {
            return Ok(());
        }
        let name = stream_name(container_type, StreamKind::Index, stream);
        let segment = *self
            .segments
            .get(&name)
            .ok_or_else(|| StoreError::Corrupt(format!("missing index stream {name}")))?;
        let file = self.file.as_mut().ok_or(StoreError::NotOpen)?;
        let data = read_segment(file, segment)?;
        let offsets = decode_offsets(&data)?;
        self.offset_cache.insert((container_type, stream), offsets);
        Ok(())
    }

    fn read_flushed(
        &mut self,
        container_type: ContainerType,
        stream: u32,
        entry: u32,
    ) -> StoreResult<Option<AttributeContainer>> {
        self.ensure_offsets(container_type, stream)?;
        let offsets = self
            .offset_cache
            .get(&(container_type, stream))
            .expect("offset table loaded above");
        let Some(&offset) = offsets.get(entry as usize) else {
            return Ok(None);
        };

        let name = stream_name(container_type, StreamKind::Data, stream);
        let segment = *self
            .segments
            .get(&name)
            .ok_or_else(|| StoreError::Corrupt(format!("missing data stream {name}")))?;
        let file = self.file.as_mut().ok_or(StoreError::NotOpen)?;
        let payload = read_entry_at(file, segment, offset)?;

        let identifier = ContainerIdentifier::Stream { stream, entry };
        let mut container = self
            .codec
            .decode(container_type, &payload)
            .map_err(|err| err.with_identifier(identifier.clone()))?;
        container.set_identifier(identifier);
        Ok(Some(container))
    }
}

fn rebuild_type_states(
    segments: &BTreeMap<String, Segment>,
) -> StoreResult<BTreeMap<ContainerType, TypeState>> {
    let mut counts: BTreeMap<(ContainerType, u32), u32> = BTreeMap::new();
    let mut max_stream: BTreeMap<ContainerType, u32> = BTreeMap::new();

    for (name, segment) in segments {
        let Some((container_type, kind, stream)) = parse_stream_name(name) else {
            continue;
        };
        if kind == StreamKind::Index {
            counts.insert((container_type, stream), (segment.length / 4) as u32);
        }
        let max = max_stream.entry(container_type).or_insert(0);
        if stream > *max {
            *max = stream;
        }
    }

    let mut types = BTreeMap::new();
    for (container_type, max) in max_stream {
        let mut state = TypeState::new();
        for stream in 1..=max {
            let count = counts.get(&(container_type, stream)).copied().ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "missing index stream for {container_type} stream {stream}"
                ))
            })?;
            state.flushed_counts.push(count);
        }
        state.next_stream = max + 1;
        types.insert(container_type, state);
    }
    Ok(types)
}

impl AttributeStore for StreamsStore {
    fn open(&mut self, mode: AccessMode) -> StoreResult<()> {
        if self.lifecycle.is_open() {
            return Err(StoreError::AlreadyOpen);
        }
        let exists = self.path.exists();
        let mut file = match mode {
            AccessMode::ReadOnly => File::open(&self.path)?,
            AccessMode::ReadWrite => File::options()
                .create(true)
                .read(true)
                .write(true)
                .open(&self.path)?,
        };

        if exists {
            read_header(&mut file)?;
            let segments = scan_segments(&mut file)?;
            let metadata = segments
                .get(METADATA_STREAM)
                .copied()
                .ok_or_else(|| StoreError::Metadata("missing metadata stream".into()))?;
            let data = read_segment(&mut file, metadata)?;
            let metadata = parse_metadata(&data, self.scope)?;
            tracing::debug!(
                path = %self.path.display(),
                format_version = metadata.format_version,
                segments = segments.len(),
                "opened existing store"
            );
            self.metadata = Some(metadata);
            self.types = rebuild_type_states(&segments)?;
            self.segments = segments;
        } else {
            write_header(&mut file)?;
            let segment = append_segment(&mut file, METADATA_STREAM, &encode_metadata(self.scope))?;
            self.segments.insert(METADATA_STREAM.to_string(), segment);
            self.metadata = Some(StreamMetadata::current(self.scope));
        }

        self.file = Some(file);
        self.lifecycle.set_open(mode)
    }

    fn close(&mut self) -> StoreResult<()> {
        self.lifecycle.ensure_open()?;
        if !self.lifecycle.is_read_only() {
            let types: Vec<ContainerType> = self.types.keys().copied().collect();
            for container_type in types {
                self.flush_type(container_type)?;
            }
            if let Some(file) = self.file.as_mut() {
                file.sync_all()?;
            }
        }
        self.file = None;
        self.segments.clear();
        self.types.clear();
        self.offset_cache.clear();
        self.metadata = None;
        self.lifecycle.set_closed()
    }

    fn add_container(
        &mut self,
        mut container: AttributeContainer,
    ) -> StoreResult<ContainerIdentifier> {
        self.lifecycle.ensure_writable()?;

        let container_type = container.container_type();
        let payload = self.codec.encode(&container)?;

        let state = self
            .types
            .entry(container_type)
            .or_insert_with(TypeState::new);
        let entry = state.buffer.len() as u32;
        let identifier = ContainerIdentifier::Stream {
            stream: state.next_stream,
            entry,
        };
        container.set_identifier(identifier.clone());

        if container_type.is_timestamped() {
            let timestamp = container.timestamp().unwrap_or_default();
            state.heap.push(timestamp, payload, entry);
        } else {
            state.pending_bytes += payload.len();
            state.pending.push(payload);
        }
        state.buffer.push(container);

        if state.buffered_bytes(container_type.is_timestamped()) >= self.flush_threshold {
            self.flush_type(container_type)?;
        }
        Ok(identifier)
    }

    fn container_by_identifier(
        &mut self,
        container_type: ContainerType,
        identifier: &ContainerIdentifier,
    ) -> StoreResult<Option<AttributeContainer>> {
        self.lifecycle.ensure_open()?;
        let ContainerIdentifier::Stream { stream, entry } = identifier else {
            return Ok(None);
        };
        let (stream, entry) = (*stream, *entry);
        let Some(state) = self.types.get(&container_type) else {
            return Ok(None);
        };

        if stream == state.next_stream {
            return Ok(state.buffer.get(entry as usize).cloned());
        }
        if stream == 0 || stream > state.flushed_counts.len() as u32 {
            return Ok(None);
        }
        self.read_flushed(container_type, stream, entry)
    }

    fn container_by_index(
        &mut self,
        container_type: ContainerType,
        index: usize,
    ) -> StoreResult<Option<AttributeContainer>> {
        self.lifecycle.ensure_open()?;
        let (stream, entry) = {
            let Some(state) = self.types.get(&container_type) else {
                return Ok(None);
            };
            let mut remaining = index;
            let mut location = None;
            for (position, &count) in state.flushed_counts.iter().enumerate() {
                if remaining < count as usize {
                    location = Some(((position + 1) as u32, remaining as u32));
                    break;
                }
                remaining -= count as usize;
            }
            match location {
                Some(location) => location,
                None => return Ok(state.buffer.get(remaining).cloned()),
            }
        };
        self.read_flushed(container_type, stream, entry)
    }

    fn containers(
        &mut self,
        container_type: ContainerType,
        filter: Option<&ContainerFilter>,
    ) -> StoreResult<Vec<AttributeContainer>> {
        let count = self.container_count(container_type)?;
        let mut results = Vec::new();
        for index in 0..count {
            if let Some(container) = self.container_by_index(container_type, index)? {
                if filter.map_or(true, |keep| keep(&container)) {
                    results.push(container);
                }
            }
        }
        Ok(results)
    }

    fn container_count(&mut self, container_type: ContainerType) -> StoreResult<usize> {
        self.lifecycle.ensure_open()?;
        Ok(self
            .types
            .get(&container_type)
            .map_or(0, |state| state.flushed_total() + state.buffer.len()))
    }

    fn update_container(&mut self, container: &AttributeContainer) -> StoreResult<()> {
        self.lifecycle.ensure_writable()?;

        let container_type = container.container_type();
        if !container_type.is_mutable() {
            return Err(StoreError::Immutable(container_type));
        }
        let identifier = container
            .identifier()
            .ok_or(StoreError::MissingIdentifier(container_type))?
            .clone();
        let ContainerIdentifier::Stream { stream, entry } = &identifier else {
            return Err(StoreError::UnknownIdentifier {
                container_type,
                identifier,
            });
        };
        let (stream, entry) = (*stream, *entry as usize);

        let payload = self.codec.encode(container)?;
        let state = self
            .types
            .get_mut(&container_type)
            .ok_or_else(|| StoreError::UnknownIdentifier {
                container_type,
                identifier: identifier.clone(),
            })?;

        if stream != state.next_stream {
            // Flushed streams are never rewritten.
            return Err(StoreError::Backend(format!(
                "{container_type} container {identifier} is already flushed to an append-only stream"
            )));
        }
        if entry >= state.buffer.len() {
            return Err(StoreError::UnknownIdentifier {
                container_type,
                identifier,
            });
        }

        state.pending_bytes = state.pending_bytes - state.pending[entry].len() + payload.len();
        state.pending[entry] = payload;
        state.buffer[entry] = container.clone();
        Ok(())
    }

    fn sorted_events<'a>(
        &'a mut self,
        range: Option<TimeRange>,
    ) -> StoreResult<Box<dyn Iterator<Item = StoreResult<Event>> + 'a>> {
        self.lifecycle.ensure_open()?;

        let container_type = ContainerType::Event;
        let flushed = self
            .types
            .get(&container_type)
            .map_or(0, |state| state.flushed_counts.len() as u32);

        let mut partitions: Vec<Box<dyn EventPartition>> = Vec::new();
        for stream in 1..=flushed {
            self.ensure_offsets(container_type, stream)?;
            let offsets = self
                .offset_cache
                .get(&(container_type, stream))
                .expect("offset table loaded above")
                .clone();

            let name = stream_name(container_type, StreamKind::Timestamps, stream);
            let segment = *self
                .segments
                .get(&name)
                .ok_or_else(|| StoreError::Corrupt(format!("missing timestamp stream {name}")))?;
            let file = self.file.as_mut().ok_or(StoreError::NotOpen)?;
            let timestamps = decode_timestamps(&read_segment(file, segment)?)?;

            let name = stream_name(container_type, StreamKind::Data, stream);
            let data_segment = *self
                .segments
                .get(&name)
                .ok_or_else(|| StoreError::Corrupt(format!("missing data stream {name}")))?;

            // Independent read handle so partitions can interleave reads.
            let reader = File::open(&self.path)?;
            partitions.push(Box::new(StreamPartition::new(
                stream,
                self.codec,
                reader,
                data_segment,
                offsets,
                timestamps,
            )?));
        }

        if let Some(state) = self.types.get(&container_type) {
            if !state.buffer.is_empty() {
                let mut events = Vec::with_capacity(state.buffer.len());
                for buffered in state.heap.clone().drain_sorted() {
                    let identifier = ContainerIdentifier::Stream {
                        stream: state.next_stream,
                        entry: buffered.entry,
                    };
                    let container = self
                        .codec
                        .decode(container_type, &buffered.payload)
                        .map_err(|err| err.with_identifier(identifier.clone()))?;
                    let AttributeContainer::Event(mut event) = container else {
                        continue;
                    };
                    event.set_identifier(identifier);
                    events.push(event);
                }
                partitions.push(Box::new(VecPartition::new(state.next_stream, events)));
            }
        }

        Ok(Box::new(SortedEventMerge::new(partitions, range)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronik_types::{EventSource, EventTag, SourceKind};
    use tempfile::TempDir;

    fn store_at(dir: &TempDir, scope: StorageScope) -> StreamsStore {
        StreamsStore::new(dir.path().join("store.cnks"), scope)
    }

    fn open_task_store(dir: &TempDir) -> StreamsStore {
        let mut store = store_at(dir, StorageScope::Task);
        store.open(AccessMode::ReadWrite).unwrap();
        store
    }

    fn add_event(store: &mut StreamsStore, timestamp: i64, desc: &str) -> ContainerIdentifier {
        store
            .add_container(AttributeContainer::Event(Event::new(timestamp, desc)))
            .unwrap()
    }

    #[test]
    fn identifiers_carry_stream_and_entry() {
        let dir = TempDir::new().unwrap();
        let mut store = open_task_store(&dir);
        let first = add_event(&mut store, 5, "a");
        let second = add_event(&mut store, 3, "b");
        assert_eq!(first, ContainerIdentifier::Stream { stream: 1, entry: 0 });
        assert_eq!(second, ContainerIdentifier::Stream { stream: 1, entry: 1 });
    }

    #[test]
    fn counts_survive_close_and_reopen() {
        let dir = TempDir::new().unwrap();
        let mut store = open_task_store(&dir);
        add_event(&mut store, 5, "a");
        add_event(&mut store, 3, "b");
        store
            .add_container(AttributeContainer::EventSource(EventSource::new(
                "/evidence",
                SourceKind::File,
            )))
            .unwrap();
        store.close().unwrap();

        let mut reopened = store_at(&dir, StorageScope::Task);
        reopened.open(AccessMode::ReadOnly).unwrap();
        assert_eq!(reopened.container_count(ContainerType::Event).unwrap(), 2);
        assert_eq!(
            reopened.container_count(ContainerType::EventSource).unwrap(),
            1
        );
        assert_eq!(
            reopened.metadata(),
            Some(&StreamMetadata::current(StorageScope::Task))
        );
    }

    #[test]
    fn append_after_reopen_starts_a_new_stream() {
        let dir = TempDir::new().unwrap();
        let mut store = open_task_store(&dir);
        add_event(&mut store, 1, "a");
        store.close().unwrap();

        let mut reopened = store_at(&dir, StorageScope::Task);
        reopened.open(AccessMode::ReadWrite).unwrap();
        let id = add_event(&mut reopened, 2, "b");
        assert_eq!(id, ContainerIdentifier::Stream { stream: 2, entry: 0 });
        reopened.close().unwrap();

        let mut check = store_at(&dir, StorageScope::Task);
        check.open(AccessMode::ReadOnly).unwrap();
        assert_eq!(check.container_count(ContainerType::Event).unwrap(), 2);
    }

    #[test]
    fn by_identifier_reads_buffered_and_flushed() {
        let dir = TempDir::new().unwrap();
        let mut store = open_task_store(&dir);
        // Out-of-order adds: flushed stream is physically sorted but
        // identifiers keep insertion order.
        let late = add_event(&mut store, 9, "late");
        let early = add_event(&mut store, 1, "early");

        let buffered = store
            .container_by_identifier(ContainerType::Event, &late)
            .unwrap()
            .unwrap();
        assert_eq!(buffered.timestamp(), Some(9));

        store.close().unwrap();
        let mut reopened = store_at(&dir, StorageScope::Task);
        reopened.open(AccessMode::ReadOnly).unwrap();

        let flushed_late = reopened
            .container_by_identifier(ContainerType::Event, &late)
            .unwrap()
            .unwrap();
        assert_eq!(flushed_late.timestamp(), Some(9));
        let flushed_early = reopened
            .container_by_identifier(ContainerType::Event, &early)
            .unwrap()
            .unwrap();
        assert_eq!(flushed_early.timestamp(), Some(1));
    }

    #[test]
    fn missing_identifier_returns_none() {
        let dir = TempDir::new().unwrap();
        let mut store = open_task_store(&dir);
        add_event(&mut store, 1, "a");
        let absent = store
            .container_by_identifier(
                ContainerType::Event,
                &ContainerIdentifier::Stream { stream: 7, entry: 0 },
            )
            .unwrap();
        assert!(absent.is_none());
        let wrong_entry = store
            .container_by_identifier(
                ContainerType::Event,
                &ContainerIdentifier::Stream { stream: 1, entry: 9 },
            )
            .unwrap();
        assert!(wrong_entry.is_none());
    }

    #[test]
    fn index_spans_flushed_and_buffered_segments() {
        let dir = TempDir::new().unwrap();
        let mut store = store_at(&dir, StorageScope::Task).with_flush_threshold(1);
        store.open(AccessMode::ReadWrite).unwrap();
        add_event(&mut store, 1, "flushed-1");
        add_event(&mut store, 2, "flushed-2");

        // Raise the threshold so the next add stays buffered.
        store.flush_threshold = DEFAULT_FLUSH_THRESHOLD;
        add_event(&mut store, 3, "buffered");

        for (index, desc) in ["flushed-1", "flushed-2", "buffered"].iter().enumerate() {
            let container = store
                .container_by_index(ContainerType::Event, index)
                .unwrap()
                .unwrap();
            let AttributeContainer::Event(event) = container else {
                panic!("expected event");
            };
            assert_eq!(&event.timestamp_desc, desc);
        }
        assert!(store
            .container_by_index(ContainerType::Event, 3)
            .unwrap()
            .is_none());
    }

    #[test]
    fn sorted_events_merge_across_streams_and_buffer() {
        let dir = TempDir::new().unwrap();
        let mut store = store_at(&dir, StorageScope::Task).with_flush_threshold(1);
        store.open(AccessMode::ReadWrite).unwrap();
        add_event(&mut store, 5, "stream-1");
        add_event(&mut store, 3, "stream-2");
        store.flush_threshold = DEFAULT_FLUSH_THRESHOLD;
        add_event(&mut store, 5, "buffered");
        add_event(&mut store, 1, "buffered-early");

        let sorted: Vec<Event> = store
            .sorted_events(None)
            .unwrap()
            .collect::<StoreResult<_>>()
            .unwrap();
        let descs: Vec<&str> = sorted.iter().map(|e| e.timestamp_desc.as_str()).collect();
        // Tie at 5: stream 1 outranks the buffered partition (stream 3).
        assert_eq!(descs, vec!["buffered-early", "stream-2", "stream-1", "buffered"]);
    }

    #[test]
    fn sorted_events_respects_time_range() {
        let dir = TempDir::new().unwrap();
        let mut store = store_at(&dir, StorageScope::Task).with_flush_threshold(1);
        store.open(AccessMode::ReadWrite).unwrap();
        for timestamp in [1, 4, 6, 9] {
            add_event(&mut store, timestamp, "e");
        }

        let range = TimeRange::new(3, 7).unwrap();
        let sorted: Vec<Event> = store
            .sorted_events(Some(range))
            .unwrap()
            .collect::<StoreResult<_>>()
            .unwrap();
        let timestamps: Vec<i64> = sorted.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![4, 6]);
    }

    #[test]
    fn flushed_event_stream_is_physically_sorted() {
        let dir = TempDir::new().unwrap();
        let mut store = open_task_store(&dir);
        add_event(&mut store, 9, "last");
        add_event(&mut store, 1, "first");
        add_event(&mut store, 5, "middle");
        store.close().unwrap();

        let mut reopened = store_at(&dir, StorageScope::Task);
        reopened.open(AccessMode::ReadOnly).unwrap();
        let sorted: Vec<Event> = reopened
            .sorted_events(None)
            .unwrap()
            .collect::<StoreResult<_>>()
            .unwrap();
        let timestamps: Vec<i64> = sorted.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![1, 5, 9]);
        // Identifiers still reflect insertion order.
        assert_eq!(
            sorted[0].identifier(),
            Some(&ContainerIdentifier::Stream { stream: 1, entry: 1 })
        );
    }

    #[test]
    fn update_rewrites_buffered_tag_only() {
        let dir = TempDir::new().unwrap();
        let mut store = open_task_store(&dir);

        let mut tag = EventTag::new();
        tag.add_label("initial");
        let id = store
            .add_container(AttributeContainer::EventTag(tag))
            .unwrap();

        let mut stored = store
            .container_by_identifier(ContainerType::EventTag, &id)
            .unwrap()
            .unwrap();
        if let AttributeContainer::EventTag(tag) = &mut stored {
            tag.add_label("extra");
        }
        store.update_container(&stored).unwrap();

        let reread = store
            .container_by_identifier(ContainerType::EventTag, &id)
            .unwrap()
            .unwrap();
        assert_eq!(reread, stored);
    }

    #[test]
    fn update_of_flushed_tag_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = store_at(&dir, StorageScope::Task).with_flush_threshold(1);
        store.open(AccessMode::ReadWrite).unwrap();

        let mut tag = EventTag::new();
        tag.add_label("flushed");
        let id = store
            .add_container(AttributeContainer::EventTag(tag))
            .unwrap();

        let stored = store
            .container_by_identifier(ContainerType::EventTag, &id)
            .unwrap()
            .unwrap();
        assert!(matches!(
            store.update_container(&stored),
            Err(StoreError::Backend(_))
        ));
    }

    #[test]
    fn lifecycle_misuse_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = open_task_store(&dir);
        assert!(matches!(
            store.open(AccessMode::ReadWrite),
            Err(StoreError::AlreadyOpen)
        ));
        store.close().unwrap();
        assert!(matches!(store.close(), Err(StoreError::NotOpen)));

        store.open(AccessMode::ReadOnly).unwrap();
        assert!(matches!(
            store.add_container(AttributeContainer::Event(Event::new(1, "x"))),
            Err(StoreError::NotWritable)
        ));
    }

    #[test]
    fn scope_mismatch_fails_open() {
        let dir = TempDir::new().unwrap();
        let mut store = open_task_store(&dir);
        add_event(&mut store, 1, "a");
        store.close().unwrap();

        let mut wrong = store_at(&dir, StorageScope::Session);
        assert!(matches!(
            wrong.open(AccessMode::ReadOnly),
            Err(StoreError::Metadata(_))
        ));
    }

    #[test]
    fn filter_applies_to_containers() {
        let dir = TempDir::new().unwrap();
        let mut store = open_task_store(&dir);
        add_event(&mut store, 1, "keep");
        add_event(&mut store, 2, "drop");

        let keep = |container: &AttributeContainer| {
            matches!(container, AttributeContainer::Event(e) if e.timestamp_desc == "keep")
        };
        let filtered = store
            .containers(ContainerType::Event, Some(&keep))
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }
}
