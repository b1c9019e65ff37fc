use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags};

use chronik_store::{
    AccessMode, AttributeStore, CompressionFormat, ContainerCodec, ContainerFilter,
    SortedEventMerge, StorageScope, StoreError, StoreLifecycle, StoreResult, VecPartition,
};
use chronik_types::{AttributeContainer, ContainerIdentifier, ContainerType, Event, TimeRange};

use crate::metadata::StorageMetadata;

/// Default per-type buffer size that triggers a bulk insert.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 64 * 1024 * 1024;

const LOCK_RETRY_ATTEMPTS: u32 = 3;
const LOCK_RETRY_BACKOFF: Duration = Duration::from_millis(100);

fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(code, _)
            if matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) =>
        {
            StoreError::LockedFile(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

/// Run an operation, retrying a bounded number of times with a fixed
/// backoff while the database reports a transient lock.
fn with_lock_retry<T>(mut op: impl FnMut() -> Result<T, rusqlite::Error>) -> StoreResult<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                let mapped = map_sqlite_error(err);
                if matches!(mapped, StoreError::LockedFile(_)) {
                    attempt += 1;
                    if attempt < LOCK_RETRY_ATTEMPTS {
                        tracing::warn!(attempt, "database locked, retrying");
                        std::thread::sleep(LOCK_RETRY_BACKOFF);
                        continue;
                    }
                }
                return Err(mapped);
            }
        }
    }
}

/// Convert a payload into the column value matching the compression mode:
/// TEXT for plain JSON, BLOB for zlib.
fn payload_value(compression: CompressionFormat, payload: &[u8]) -> StoreResult<Value> {
    match compression {
        CompressionFormat::None => {
            let text = String::from_utf8(payload.to_vec())
                .map_err(|_| StoreError::Corrupt("uncompressed payload is not UTF-8".into()))?;
            Ok(Value::Text(text))
        }
        CompressionFormat::Zlib => Ok(Value::Blob(payload.to_vec())),
    }
}

fn value_payload(value: Value) -> StoreResult<Vec<u8>> {
    match value {
        Value::Text(text) => Ok(text.into_bytes()),
        Value::Blob(blob) => Ok(blob),
        other => Err(StoreError::Corrupt(format!(
            "unexpected _data column type: {other:?}"
        ))),
    }
}

struct BufferedRow {
    row: i64,
    timestamp: Option<i64>,
    payload: Vec<u8>,
    container: AttributeContainer,
}

#[derive(Default)]
struct TypeBuffer {
    rows: Vec<BufferedRow>,
    bytes: usize,
}

/// Attribute store backed by one SQLite file.
///
/// Containers are grouped into per-type tables of
/// `(_identifier INTEGER PRIMARY KEY AUTOINCREMENT, [_timestamp BIGINT,]
/// _data TEXT|BLOB)`. Writes are buffered per type and flushed as one
/// transaction once the buffer passes the byte threshold or on close. Row
/// identifiers are pre-assigned from the table's next row id so adds can
/// return identifiers without touching the database.
pub struct SqliteStore {
    path: PathBuf,
    scope: StorageScope,
    codec: ContainerCodec,
    flush_threshold: usize,
    lifecycle: StoreLifecycle,
    conn: Option<Connection>,
    buffers: BTreeMap<ContainerType, TypeBuffer>,
    next_row: BTreeMap<ContainerType, i64>,
    metadata: Option<StorageMetadata>,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>, scope: StorageScope) -> Self {
        Self {
            path: path.into(),
            scope,
            codec: ContainerCodec::default(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            lifecycle: StoreLifecycle::new(),
            conn: None,
            buffers: BTreeMap::new(),
            next_row: BTreeMap::new(),
            metadata: None,
        }
    }

    /// Choose the per-value compression for newly created files. Existing
    /// files dictate their own compression through the metadata table.
    pub fn with_compression(mut self, compression: CompressionFormat) -> Self {
        self.codec = ContainerCodec::new(compression);
        self
    }

    pub fn with_flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed metadata of the open file.
    pub fn metadata(&self) -> Option<&StorageMetadata> {
        self.metadata.as_ref()
    }

    fn conn(&self) -> StoreResult<&Connection> {
        self.conn.as_ref().ok_or(StoreError::NotOpen)
    }

    fn bootstrap(&self, conn: &Connection) -> StoreResult<()> {
        let metadata = StorageMetadata::current(self.codec.compression(), self.scope);
        metadata.write(conn)?;

        let data_column = match self.codec.compression() {
            CompressionFormat::None => "TEXT",
            CompressionFormat::Zlib => "BLOB",
        };
        for container_type in ContainerType::ALL {
            let schema = if container_type.is_timestamped() {
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (_identifier INTEGER PRIMARY KEY \
                     AUTOINCREMENT, _timestamp BIGINT, _data {data_column})",
                    container_type.name()
                )
            } else {
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (_identifier INTEGER PRIMARY KEY \
                     AUTOINCREMENT, _data {data_column})",
                    container_type.name()
                )
            };
            conn.execute(&schema, [])
                .map_err(|err| StoreError::Backend(err.to_string()))?;
        }
        Ok(())
    }

    fn persisted_count(&self, container_type: ContainerType) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", container_type.name()),
                [],
                |row| row.get(0),
            )
            .map_err(map_sqlite_error)?;
        Ok(count as usize)
    }

    fn flush_type(&mut self, container_type: ContainerType) -> StoreResult<()> {
        let Some(buffer) = self.buffers.get(&container_type) else {
            return Ok(());
        };
        if buffer.rows.is_empty() {
            return Ok(());
        }

        let compression = self.codec.compression();
        let mut prepared = Vec::with_capacity(buffer.rows.len());
        for row in &buffer.rows {
            prepared.push((row.row, row.timestamp, payload_value(compression, &row.payload)?));
        }
        let count = prepared.len();
        let bytes = buffer.bytes;

        let conn = self.conn.as_mut().ok_or(StoreError::NotOpen)?;
        let insert = if container_type.is_timestamped() {
            format!(
                "INSERT INTO {} (_identifier, _timestamp, _data) VALUES (?1, ?2, ?3)",
                container_type.name()
            )
        } else {
            format!(
                "INSERT INTO {} (_identifier, _data) VALUES (?1, ?2)",
                container_type.name()
            )
        };

        with_lock_retry(|| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&insert)?;
                for (row, timestamp, value) in &prepared {
                    if container_type.is_timestamped() {
                        stmt.execute(params![row, timestamp, value])?;
                    } else {
                        stmt.execute(params![row, value])?;
                    }
                }
            }
            tx.commit()
        })?;

        if let Some(buffer) = self.buffers.get_mut(&container_type) {
            buffer.rows.clear();
            buffer.bytes = 0;
        }
        tracing::debug!(
            container_type = %container_type,
            rows = count,
            bytes,
            "flushed table buffer"
        );
        Ok(())
    }

    fn buffered_row(
        &self,
        container_type: ContainerType,
        row: i64,
    ) -> Option<&BufferedRow> {
        let buffer = self.buffers.get(&container_type)?;
        let first = buffer.rows.first()?.row;
        if row < first {
            return None;
        }
        buffer.rows.get((row - first) as usize)
    }

    fn read_row(
        &self,
        container_type: ContainerType,
        row: i64,
    ) -> StoreResult<Option<AttributeContainer>> {
        let conn = self.conn()?;
        let value: Option<Value> = conn
            .query_row(
                &format!(
                    "SELECT _data FROM {} WHERE _identifier = ?1",
                    container_type.name()
                ),
                params![row],
                |r| r.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(map_sqlite_error(other)),
            })?;
        let Some(value) = value else {
            return Ok(None);
        };

        let identifier = ContainerIdentifier::Row {
            table: container_type.name().to_string(),
            row,
        };
        let payload = value_payload(value)?;
        let mut container = self
            .codec
            .decode(container_type, &payload)
            .map_err(|err| err.with_identifier(identifier.clone()))?;
        container.set_identifier(identifier);
        Ok(Some(container))
    }
}

impl AttributeStore for SqliteStore {
    fn open(&mut self, mode: AccessMode) -> StoreResult<()> {
        if self.lifecycle.is_open() {
            return Err(StoreError::AlreadyOpen);
        }

        let conn = match mode {
            AccessMode::ReadOnly => Connection::open_with_flags(
                &self.path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(map_sqlite_error)?,
            AccessMode::ReadWrite => Connection::open(&self.path).map_err(map_sqlite_error)?,
        };

        let has_metadata: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'metadata'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count > 0)
            .map_err(map_sqlite_error)?;

        if has_metadata {
            let metadata = StorageMetadata::read(&conn)?;
            metadata.validate(mode, self.scope)?;
            tracing::debug!(
                path = %self.path.display(),
                format_version = metadata.format_version,
                compression = metadata.compression.name(),
                "opened existing store"
            );
            self.codec = ContainerCodec::new(metadata.compression);
            self.metadata = Some(metadata);
        } else {
            if mode == AccessMode::ReadOnly {
                return Err(StoreError::Metadata("missing metadata table".into()));
            }
            self.bootstrap(&conn)?;
            self.metadata = Some(StorageMetadata::current(
                self.codec.compression(),
                self.scope,
            ));
        }

        for container_type in ContainerType::ALL {
            let max: Option<i64> = conn
                .query_row(
                    &format!("SELECT MAX(_identifier) FROM {}", container_type.name()),
                    [],
                    |row| row.get(0),
                )
                .map_err(map_sqlite_error)?;
            self.next_row.insert(container_type, max.unwrap_or(0) + 1);
        }

        self.conn = Some(conn);
        self.lifecycle.set_open(mode)
    }

    fn close(&mut self) -> StoreResult<()> {
        self.lifecycle.ensure_open()?;
        if !self.lifecycle.is_read_only() {
            for container_type in ContainerType::ALL {
                self.flush_type(container_type)?;
            }
        }
        self.conn = None;
        self.buffers.clear();
        self.next_row.clear();
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
        let timestamp = container.timestamp();

        let next = self
            .next_row
            .entry(container_type)
            .or_insert(1);
        let row = *next;
        *next += 1;

        let identifier = ContainerIdentifier::Row {
            table: container_type.name().to_string(),
            row,
        };
        container.set_identifier(identifier.clone());

        let buffer = self.buffers.entry(container_type).or_default();
        buffer.bytes += payload.len();
        buffer.rows.push(BufferedRow {
            row,
            timestamp,
            payload,
            container,
        });

        if buffer.bytes >= self.flush_threshold {
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
        let ContainerIdentifier::Row { table, row } = identifier else {
            return Ok(None);
        };
        if table != container_type.name() {
            return Ok(None);
        }
        if let Some(buffered) = self.buffered_row(container_type, *row) {
            return Ok(Some(buffered.container.clone()));
        }
        self.read_row(container_type, *row)
    }

    fn container_by_index(
        &mut self,
        container_type: ContainerType,
        index: usize,
    ) -> StoreResult<Option<AttributeContainer>> {
        self.lifecycle.ensure_open()?;
        let persisted = self.persisted_count(container_type)?;
        if index < persisted {
            // Rows are never deleted, so identifiers are dense from 1.
            return self.read_row(container_type, index as i64 + 1);
        }
        let buffered = self
            .buffers
            .get(&container_type)
            .and_then(|buffer| buffer.rows.get(index - persisted));
        Ok(buffered.map(|row| row.container.clone()))
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
        let buffered = self
            .buffers
            .get(&container_type)
            .map_or(0, |buffer| buffer.rows.len());
        Ok(self.persisted_count(container_type)? + buffered)
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
        let ContainerIdentifier::Row { table, row } = &identifier else {
            return Err(StoreError::UnknownIdentifier {
                container_type,
                identifier,
            });
        };
        if table != container_type.name() {
            return Err(StoreError::UnknownIdentifier {
                container_type,
                identifier: identifier.clone(),
            });
        }
        let row = *row;
        let payload = self.codec.encode(container)?;

        // Still buffered: rewrite in place.
        if let Some(buffer) = self.buffers.get_mut(&container_type) {
            if let Some(first) = buffer.rows.first().map(|r| r.row) {
                if row >= first {
                    let position = (row - first) as usize;
                    let Some(slot) = buffer.rows.get_mut(position) else {
                        return Err(StoreError::UnknownIdentifier {
                            container_type,
                            identifier,
                        });
                    };
                    buffer.bytes = buffer.bytes - slot.payload.len() + payload.len();
                    slot.payload = payload;
                    slot.container = container.clone();
                    return Ok(());
                }
            }
        }

        let value = payload_value(self.codec.compression(), &payload)?;
        let conn = self.conn.as_mut().ok_or(StoreError::NotOpen)?;
        let update = format!(
            "UPDATE {} SET _data = ?1 WHERE _identifier = ?2",
            container_type.name()
        );
        let affected = with_lock_retry(|| conn.execute(&update, params![value, row]))?;
        if affected == 0 {
            return Err(StoreError::UnknownIdentifier {
                container_type,
                identifier,
            });
        }
        Ok(())
    }

    fn sorted_events<'a>(
        &'a mut self,
        range: Option<TimeRange>,
    ) -> StoreResult<Box<dyn Iterator<Item = StoreResult<Event>> + 'a>> {
        self.lifecycle.ensure_open()?;
        let container_type = ContainerType::Event;
        let codec = self.codec;
        let conn = self.conn()?;

        let sql = match range {
            Some(_) => format!(
                "SELECT _identifier, _data FROM {} WHERE _timestamp >= ?1 AND _timestamp <= ?2 \
                 ORDER BY _timestamp, _identifier",
                container_type.name()
            ),
            None => format!(
                "SELECT _identifier, _data FROM {} ORDER BY _timestamp, _identifier",
                container_type.name()
            ),
        };

        let mut persisted = Vec::new();
        let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
        let mut rows = match range {
            Some(range) => stmt.query(params![range.start, range.end]),
            None => stmt.query([]),
        }
        .map_err(map_sqlite_error)?;
        while let Some(row) = rows.next().map_err(map_sqlite_error)? {
            let id: i64 = row.get(0).map_err(map_sqlite_error)?;
            let value: Value = row.get(1).map_err(map_sqlite_error)?;
            let identifier = ContainerIdentifier::Row {
                table: container_type.name().to_string(),
                row: id,
            };
            let payload = value_payload(value)?;
            let container = codec
                .decode(container_type, &payload)
                .map_err(|err| err.with_identifier(identifier.clone()))?;
            let AttributeContainer::Event(mut event) = container else {
                return Err(StoreError::Corrupt(format!("row {id} is not an event")));
            };
            event.set_identifier(identifier);
            persisted.push(event);
        }
        drop(rows);
        drop(stmt);

        let mut buffered: Vec<Event> = self
            .buffers
            .get(&container_type)
            .into_iter()
            .flat_map(|buffer| buffer.rows.iter())
            .filter_map(|row| match &row.container {
                AttributeContainer::Event(event) => Some(event.clone()),
                _ => None,
            })
            .filter(|event| range.map_or(true, |range| range.contains(event.timestamp)))
            .collect();
        buffered.sort_by_key(|event| event.timestamp);

        let partitions: Vec<Box<dyn chronik_store::EventPartition>> = vec![
            Box::new(VecPartition::new(0, persisted)),
            Box::new(VecPartition::new(1, buffered)),
        ];
        Ok(Box::new(SortedEventMerge::new(partitions, range)?))
    }
}
