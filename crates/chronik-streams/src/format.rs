use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use chronik_store::{SerializationFormat, StorageScope, StoreError, StoreResult};
use chronik_types::ContainerType;

/// File magic of the segmented container file.
pub const MAGIC: &[u8; 4] = b"CNKS";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Name of the top-level metadata stream.
pub const METADATA_STREAM: &str = "metadata";

/// Which of the companion streams a name refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    /// Length-prefixed serialized entries.
    Data,
    /// One u32 offset per entry, indexed by entry number.
    Index,
    /// One i64 timestamp per entry in on-disk order. Events only.
    Timestamps,
}

impl StreamKind {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Index => "index",
            Self::Timestamps => "timestamps",
        }
    }
}

/// Build the name of one numbered stream, e.g. `event_data.000001`.
pub fn stream_name(container_type: ContainerType, kind: StreamKind, stream: u32) -> String {
    format!("{}_{}.{stream:06}", container_type.name(), kind.suffix())
}

/// Parse a stream name back into its components. Returns `None` for the
/// metadata stream and anything else that is not a numbered stream.
pub fn parse_stream_name(name: &str) -> Option<(ContainerType, StreamKind, u32)> {
    let (base, number) = name.rsplit_once('.')?;
    let stream: u32 = number.parse().ok()?;
    for kind in [StreamKind::Data, StreamKind::Index, StreamKind::Timestamps] {
        if let Some(type_name) = base.strip_suffix(kind.suffix()) {
            let type_name = type_name.strip_suffix('_')?;
            if let Ok(container_type) = ContainerType::from_name(type_name) {
                return Some((container_type, kind, stream));
            }
        }
    }
    None
}

/// Location of one stream's payload inside the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub offset: u64,
    pub length: u64,
}

/// Write the file header. The file must be empty and positioned at zero.
pub fn write_header(file: &mut File) -> StoreResult<()> {
    file.write_all(MAGIC)?;
    file.write_all(&FORMAT_VERSION.to_be_bytes())?;
    Ok(())
}

/// Validate the header of an existing file and return its version.
pub fn read_header(file: &mut File) -> StoreResult<u32> {
    file.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)
        .map_err(|_| StoreError::Corrupt("file too short for header".into()))?;
    if &magic != MAGIC {
        return Err(StoreError::Corrupt(format!(
            "bad magic: expected {MAGIC:?}, got {magic:?}"
        )));
    }
    let mut version = [0u8; 4];
    file.read_exact(&mut version)
        .map_err(|_| StoreError::Corrupt("file too short for version".into()))?;
    let version = u32::from_be_bytes(version);
    if version != FORMAT_VERSION {
        return Err(StoreError::FormatVersion {
            found: version,
            reason: format!("only version {FORMAT_VERSION} is supported"),
        });
    }
    Ok(version)
}

/// Append one named segment at the end of the file and return its payload
/// location.
pub fn append_segment(file: &mut File, name: &str, data: &[u8]) -> StoreResult<Segment> {
    let name_bytes = name.as_bytes();
    file.seek(SeekFrom::End(0))?;
    file.write_all(&(name_bytes.len() as u32).to_be_bytes())?;
    file.write_all(name_bytes)?;
    file.write_all(&(data.len() as u64).to_be_bytes())?;
    let offset = file.stream_position()?;
    file.write_all(data)?;
    Ok(Segment {
        offset,
        length: data.len() as u64,
    })
}

/// Scan every segment header and build the name → location table.
pub fn scan_segments(file: &mut File) -> StoreResult<BTreeMap<String, Segment>> {
    let file_len = file.seek(SeekFrom::End(0))?;
    let mut position = (MAGIC.len() + 4) as u64;
    let mut segments = BTreeMap::new();

    while position < file_len {
        file.seek(SeekFrom::Start(position))?;
        let mut buf4 = [0u8; 4];
        file.read_exact(&mut buf4)
            .map_err(|_| StoreError::Corrupt("truncated segment header".into()))?;
        let name_len = u32::from_be_bytes(buf4) as usize;

        let mut name = vec![0u8; name_len];
        file.read_exact(&mut name)
            .map_err(|_| StoreError::Corrupt("truncated segment name".into()))?;
        let name = String::from_utf8(name)
            .map_err(|_| StoreError::Corrupt("segment name is not UTF-8".into()))?;

        let mut buf8 = [0u8; 8];
        file.read_exact(&mut buf8)
            .map_err(|_| StoreError::Corrupt("truncated segment length".into()))?;
        let length = u64::from_be_bytes(buf8);

        let offset = file.stream_position()?;
        if offset + length > file_len {
            return Err(StoreError::Corrupt(format!(
                "segment {name} extends beyond end of file"
            )));
        }
        segments.insert(name, Segment { offset, length });
        position = offset + length;
    }

    Ok(segments)
}

/// Read one segment's payload.
pub fn read_segment(file: &mut File, segment: Segment) -> StoreResult<Vec<u8>> {
    file.seek(SeekFrom::Start(segment.offset))?;
    let mut data = vec![0u8; segment.length as usize];
    file.read_exact(&mut data)
        .map_err(|_| StoreError::Corrupt("truncated segment payload".into()))?;
    Ok(data)
}

/// Parsed contents of the metadata stream, kept by the store for
/// introspection after open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamMetadata {
    pub format_version: u32,
    pub serialization: SerializationFormat,
    pub scope: StorageScope,
}

impl StreamMetadata {
    /// Metadata for a freshly created file.
    pub fn current(scope: StorageScope) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            serialization: SerializationFormat::Json,
            scope,
        }
    }
}

/// Encode the metadata stream: key=value text, one pair per line.
pub fn encode_metadata(scope: StorageScope) -> Vec<u8> {
    format!(
        "format_version={FORMAT_VERSION}\nserialization_format={}\nstorage_type={}\n",
        SerializationFormat::Json.name(),
        scope.name()
    )
    .into_bytes()
}

/// Parse and validate the metadata stream against the expected scope.
pub fn parse_metadata(data: &[u8], expected_scope: StorageScope) -> StoreResult<StreamMetadata> {
    let text = std::str::from_utf8(data)
        .map_err(|_| StoreError::Metadata("metadata stream is not UTF-8".into()))?;

    let mut pairs = BTreeMap::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| StoreError::Metadata(format!("malformed metadata line: {line}")))?;
        pairs.insert(key.to_string(), value.to_string());
    }

    let version: u32 = pairs
        .get("format_version")
        .ok_or_else(|| StoreError::Metadata("missing format_version".into()))?
        .parse()
        .map_err(|_| StoreError::Metadata("format_version is not a number".into()))?;
    if version != FORMAT_VERSION {
        return Err(StoreError::FormatVersion {
            found: version,
            reason: format!("only version {FORMAT_VERSION} is supported"),
        });
    }

    let serialization = pairs
        .get("serialization_format")
        .ok_or_else(|| StoreError::Metadata("missing serialization_format".into()))?;
    let serialization = SerializationFormat::from_name(serialization)?;

    let scope = pairs
        .get("storage_type")
        .ok_or_else(|| StoreError::Metadata("missing storage_type".into()))?;
    let scope = StorageScope::from_name(scope)?;
    if scope != expected_scope {
        return Err(StoreError::Metadata(format!(
            "storage_type is {}, expected {}",
            scope.name(),
            expected_scope.name()
        )));
    }

    Ok(StreamMetadata {
        format_version: version,
        serialization,
        scope,
    })
}

/// Serialize a u32 offset table.
pub fn encode_offsets(offsets: &[u32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(offsets.len() * 4);
    for offset in offsets {
        data.extend_from_slice(&offset.to_be_bytes());
    }
    data
}

pub fn decode_offsets(data: &[u8]) -> StoreResult<Vec<u32>> {
    if data.len() % 4 != 0 {
        return Err(StoreError::Corrupt("offset table length not a multiple of 4".into()));
    }
    Ok(data
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes(chunk.try_into().expect("chunk size is 4")))
        .collect())
}

/// Serialize an i64 timestamp table.
pub fn encode_timestamps(timestamps: &[i64]) -> Vec<u8> {
    let mut data = Vec::with_capacity(timestamps.len() * 8);
    for timestamp in timestamps {
        data.extend_from_slice(&timestamp.to_be_bytes());
    }
    data
}

pub fn decode_timestamps(data: &[u8]) -> StoreResult<Vec<i64>> {
    if data.len() % 8 != 0 {
        return Err(StoreError::Corrupt(
            "timestamp table length not a multiple of 8".into(),
        ));
    }
    Ok(data
        .chunks_exact(8)
        .map(|chunk| i64::from_be_bytes(chunk.try_into().expect("chunk size is 8")))
        .collect())
}

/// Read one length-prefixed entry directly from the file, without loading
/// the whole data stream.
pub fn read_entry_at(file: &mut File, segment: Segment, offset: u32) -> StoreResult<Vec<u8>> {
    let offset = offset as u64;
    if offset + 4 > segment.length {
        return Err(StoreError::Corrupt("entry offset beyond data stream".into()));
    }
    file.seek(SeekFrom::Start(segment.offset + offset))?;
    let mut buf4 = [0u8; 4];
    file.read_exact(&mut buf4)
        .map_err(|_| StoreError::Corrupt("truncated entry size".into()))?;
    let size = u32::from_be_bytes(buf4) as u64;
    if offset + 4 + size > segment.length {
        return Err(StoreError::Corrupt("entry extends beyond data stream".into()));
    }
    let mut payload = vec![0u8; size as usize];
    file.read_exact(&mut payload)
        .map_err(|_| StoreError::Corrupt("truncated entry payload".into()))?;
    Ok(payload)
}

/// Read one length-prefixed entry out of a data stream payload.
pub fn read_entry(data: &[u8], offset: u32) -> StoreResult<&[u8]> {
    let start = offset as usize;
    let size_end = start
        .checked_add(4)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| StoreError::Corrupt("entry offset beyond data stream".into()))?;
    let size = u32::from_be_bytes(data[start..size_end].try_into().expect("slice length is 4"))
        as usize;
    let end = size_end
        .checked_add(size)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| StoreError::Corrupt("entry extends beyond data stream".into()))?;
    Ok(&data[size_end..end])
}
