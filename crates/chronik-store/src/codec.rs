use std::io::{Read, Write};

use chronik_types::{
    AttributeContainer, ContainerType, Event, EventData, EventDataStream, EventSource, EventTag,
    ExtractionWarning,
};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{StoreError, StoreResult};

/// Per-value compression applied to serialized container payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompressionFormat {
    None,
    #[default]
    Zlib,
}

impl CompressionFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zlib => "zlib",
        }
    }

    pub fn from_name(name: &str) -> StoreResult<Self> {
        match name {
            "none" => Ok(Self::None),
            "zlib" => Ok(Self::Zlib),
            other => Err(StoreError::Metadata(format!(
                "unknown compression format: {other}"
            ))),
        }
    }
}

/// Serialization format of container payloads. JSON is the only format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SerializationFormat {
    #[default]
    Json,
}

impl SerializationFormat {
    pub fn name(&self) -> &'static str {
        "json"
    }

    pub fn from_name(name: &str) -> StoreResult<Self> {
        match name {
            "json" => Ok(Self::Json),
            other => Err(StoreError::Metadata(format!(
                "unknown serialization format: {other}"
            ))),
        }
    }
}

/// Encodes and decodes attribute containers for persistence.
///
/// The container type is carried out of band (per-type tables, streams, and
/// hashes), so payloads hold only the container's fields. The store-assigned
/// identifier is excluded by the container types themselves.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContainerCodec {
    compression: CompressionFormat,
}

impl ContainerCodec {
    pub fn new(compression: CompressionFormat) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> CompressionFormat {
        self.compression
    }

    pub fn serialization(&self) -> SerializationFormat {
        SerializationFormat::Json
    }

    /// Serialize a container to its stored payload.
    pub fn encode(&self, container: &AttributeContainer) -> StoreResult<Vec<u8>> {
        let json = match container {
            AttributeContainer::EventSource(c) => serde_json::to_vec(c),
            AttributeContainer::EventDataStream(c) => serde_json::to_vec(c),
            AttributeContainer::EventData(c) => serde_json::to_vec(c),
            AttributeContainer::Event(c) => serde_json::to_vec(c),
            AttributeContainer::ExtractionWarning(c) => serde_json::to_vec(c),
            AttributeContainer::EventTag(c) => serde_json::to_vec(c),
        }
        .map_err(|err| StoreError::Serialization {
            container_type: container.container_type(),
            reason: err.to_string(),
        })?;

        match self.compression {
            CompressionFormat::None => Ok(json),
            CompressionFormat::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&json)?;
                Ok(encoder.finish()?)
            }
        }
    }

    /// Decode a stored payload back into a container of the given type.
    ///
    /// The returned container has no identifier; callers that know the row's
    /// identifier set it afterwards.
    pub fn decode(
        &self,
        container_type: ContainerType,
        data: &[u8],
    ) -> StoreResult<AttributeContainer> {
        let json = match self.compression {
            CompressionFormat::None => data.to_vec(),
            CompressionFormat::Zlib => {
                let mut decoder = ZlibDecoder::new(data);
                let mut decompressed = Vec::new();
                decoder
                    .read_to_end(&mut decompressed)
                    .map_err(|err| StoreError::Serialization {
                        container_type,
                        reason: format!("zlib: {err}"),
                    })?;
                decompressed
            }
        };

        let decode_error = |err: serde_json::Error| StoreError::Serialization {
            container_type,
            reason: err.to_string(),
        };

        let container = match container_type {
            ContainerType::EventSource => {
                AttributeContainer::EventSource(serde_json::from_slice::<EventSource>(&json).map_err(decode_error)?)
            }
            ContainerType::EventDataStream => AttributeContainer::EventDataStream(
                serde_json::from_slice::<EventDataStream>(&json).map_err(decode_error)?,
            ),
            ContainerType::EventData => {
                AttributeContainer::EventData(serde_json::from_slice::<EventData>(&json).map_err(decode_error)?)
            }
            ContainerType::Event => {
                AttributeContainer::Event(serde_json::from_slice::<Event>(&json).map_err(decode_error)?)
            }
            ContainerType::ExtractionWarning => AttributeContainer::ExtractionWarning(
                serde_json::from_slice::<ExtractionWarning>(&json).map_err(decode_error)?,
            ),
            ContainerType::EventTag => {
                AttributeContainer::EventTag(serde_json::from_slice::<EventTag>(&json).map_err(decode_error)?)
            }
        };
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronik_types::{AttributeValue, ContainerIdentifier, SourceKind};

    fn sample_event_data() -> AttributeContainer {
        let mut data = EventData::new("fs:stat");
        data.set_attribute("file_size", AttributeValue::Integer(4096));
        data.set_attribute("name", AttributeValue::String("MFT".into()));
        data.set_stream_identifier(ContainerIdentifier::Sequence(2));
        AttributeContainer::EventData(data)
    }

    #[test]
    fn roundtrip_uncompressed() {
        let codec = ContainerCodec::new(CompressionFormat::None);
        let container = sample_event_data();
        let payload = codec.encode(&container).unwrap();
        let decoded = codec.decode(ContainerType::EventData, &payload).unwrap();
        assert_eq!(decoded, container);
    }

    #[test]
    fn roundtrip_zlib() {
        let codec = ContainerCodec::new(CompressionFormat::Zlib);
        let container = sample_event_data();
        let payload = codec.encode(&container).unwrap();
        let decoded = codec.decode(ContainerType::EventData, &payload).unwrap();
        assert_eq!(decoded, container);
    }

    #[test]
    fn zlib_payload_is_not_plain_json() {
        let codec = ContainerCodec::new(CompressionFormat::Zlib);
        let payload = codec.encode(&sample_event_data()).unwrap();
        assert!(serde_json::from_slice::<EventData>(&payload).is_err());
    }

    #[test]
    fn identifier_not_preserved_by_roundtrip() {
        let codec = ContainerCodec::new(CompressionFormat::None);
        let mut container = AttributeContainer::Event(Event::new(42, "Creation Time"));
        container.set_identifier(ContainerIdentifier::Sequence(99));
        let payload = codec.encode(&container).unwrap();
        let decoded = codec.decode(ContainerType::Event, &payload).unwrap();
        assert!(decoded.identifier().is_none());
        assert_eq!(decoded.timestamp(), Some(42));
    }

    #[test]
    fn decode_garbage_reports_type() {
        let codec = ContainerCodec::new(CompressionFormat::None);
        let err = codec.decode(ContainerType::Event, b"{not json").unwrap_err();
        match err {
            StoreError::Serialization { container_type, .. } => {
                assert_eq!(container_type, ContainerType::Event);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_wrong_shape_fails() {
        let codec = ContainerCodec::new(CompressionFormat::None);
        // An event payload is not a valid event data stream payload.
        let payload = codec
            .encode(&AttributeContainer::Event(Event::new(1, "t")))
            .unwrap();
        assert!(codec.decode(ContainerType::EventDataStream, &payload).is_err());
    }

    #[test]
    fn format_names_roundtrip() {
        assert_eq!(
            CompressionFormat::from_name(CompressionFormat::Zlib.name()).unwrap(),
            CompressionFormat::Zlib
        );
        assert_eq!(
            SerializationFormat::from_name("json").unwrap(),
            SerializationFormat::Json
        );
        assert!(CompressionFormat::from_name("lz4").is_err());
    }
}
