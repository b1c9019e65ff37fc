use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::identifier::ContainerIdentifier;

/// Registry of the known attribute container types.
///
/// The order of [`ContainerType::ALL`] is not significant; the merge
/// dependency order is owned by the merge reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    EventSource,
    EventDataStream,
    EventData,
    Event,
    ExtractionWarning,
    EventTag,
}

impl ContainerType {
    pub const ALL: [ContainerType; 6] = [
        ContainerType::EventSource,
        ContainerType::EventDataStream,
        ContainerType::EventData,
        ContainerType::Event,
        ContainerType::ExtractionWarning,
        ContainerType::EventTag,
    ];

    /// Stable snake_case name, used for table names, stream names, and
    /// key/value hash names.
    pub fn name(&self) -> &'static str {
        match self {
            Self::EventSource => "event_source",
            Self::EventDataStream => "event_data_stream",
            Self::EventData => "event_data",
            Self::Event => "event",
            Self::ExtractionWarning => "extraction_warning",
            Self::EventTag => "event_tag",
        }
    }

    /// Parse a container type from its stable name.
    pub fn from_name(name: &str) -> Result<Self, TypeError> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.name() == name)
            .ok_or_else(|| TypeError::UnknownContainerType(name.to_string()))
    }

    /// Whether rows of this type may be overwritten after insertion.
    /// Only event tags accumulate state (labels) over time.
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::EventTag)
    }

    /// Whether this is the chronologically-queried type that carries a
    /// timestamp column/stream.
    pub fn is_timestamped(&self) -> bool {
        matches!(self, Self::Event)
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Schema-free attribute value, the field type of [`EventData::attributes`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Integer(i64),
    String(String),
    Bytes(Vec<u8>),
}

/// Whether a task's evidence source is a single file or a directory tree.
/// Directory-sourced tasks are favored by the merge selection policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    File,
    Directory,
}

/// Origin of extracted data within the evidence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSource {
    #[serde(skip)]
    identifier: Option<ContainerIdentifier>,
    pub path: String,
    pub source_kind: SourceKind,
}

impl EventSource {
    pub fn new(path: impl Into<String>, source_kind: SourceKind) -> Self {
        Self {
            identifier: None,
            path: path.into(),
            source_kind,
        }
    }
}

/// A concrete data stream the extraction read from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDataStream {
    #[serde(skip)]
    identifier: Option<ContainerIdentifier>,
    pub path: String,
    pub md5_hash: Option<String>,
    pub sha256_hash: Option<String>,
}

impl EventDataStream {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            identifier: None,
            path: path.into(),
            md5_hash: None,
            sha256_hash: None,
        }
    }
}

/// Parser-extracted attributes shared by one or more events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(skip)]
    identifier: Option<ContainerIdentifier>,
    pub data_type: String,
    pub attributes: BTreeMap<String, AttributeValue>,
    stream_identifier: Option<ContainerIdentifier>,
}

impl EventData {
    pub fn new(data_type: impl Into<String>) -> Self {
        Self {
            identifier: None,
            data_type: data_type.into(),
            attributes: BTreeMap::new(),
            stream_identifier: None,
        }
    }

    /// Set a named attribute, replacing any previous value.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(name.into(), value);
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Local identifier of the event data stream this data was read from.
    pub fn stream_identifier(&self) -> Option<&ContainerIdentifier> {
        self.stream_identifier.as_ref()
    }

    pub fn set_stream_identifier(&mut self, identifier: ContainerIdentifier) {
        self.stream_identifier = Some(identifier);
    }
}

/// A single dated occurrence on the timeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(skip)]
    identifier: Option<ContainerIdentifier>,
    /// Microseconds since the POSIX epoch.
    pub timestamp: i64,
    /// What the timestamp means for this event ("Content Modification
    /// Time", "Last Visited Time", ...).
    pub timestamp_desc: String,
    event_data_identifier: Option<ContainerIdentifier>,
}

impl Event {
    pub fn new(timestamp: i64, timestamp_desc: impl Into<String>) -> Self {
        Self {
            identifier: None,
            timestamp,
            timestamp_desc: timestamp_desc.into(),
            event_data_identifier: None,
        }
    }

    /// The store-assigned identifier, if this event has been persisted or
    /// loaded from a store. Sorted reads yield bare events, so the
    /// identifier is exposed here as well as on the container enum.
    pub fn identifier(&self) -> Option<&ContainerIdentifier> {
        self.identifier.as_ref()
    }

    pub fn set_identifier(&mut self, identifier: ContainerIdentifier) {
        self.identifier = Some(identifier);
    }

    /// Local identifier of the event data this event points at.
    pub fn event_data_identifier(&self) -> Option<&ContainerIdentifier> {
        self.event_data_identifier.as_ref()
    }

    pub fn set_event_data_identifier(&mut self, identifier: ContainerIdentifier) {
        self.event_data_identifier = Some(identifier);
    }
}

/// A problem reported by a parser while processing evidence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionWarning {
    #[serde(skip)]
    identifier: Option<ContainerIdentifier>,
    pub message: String,
    pub parser_chain: String,
    pub path: Option<String>,
}

impl ExtractionWarning {
    pub fn new(message: impl Into<String>, parser_chain: impl Into<String>) -> Self {
        Self {
            identifier: None,
            message: message.into(),
            parser_chain: parser_chain.into(),
            path: None,
        }
    }
}

/// Labels attached to one event. The only mutable container type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTag {
    #[serde(skip)]
    identifier: Option<ContainerIdentifier>,
    pub labels: Vec<String>,
    event_identifier: Option<ContainerIdentifier>,
}

impl EventTag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label if not already present.
    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }

    /// Local identifier of the tagged event.
    pub fn event_identifier(&self) -> Option<&ContainerIdentifier> {
        self.event_identifier.as_ref()
    }

    pub fn set_event_identifier(&mut self, identifier: ContainerIdentifier) {
        self.event_identifier = Some(identifier);
    }
}

/// Tagged union over the known container kinds.
///
/// Identity is assigned by the store that persists the container, not by
/// the producer, and is excluded from serialization. References to other
/// containers (event → event data → event data stream, tag → event) are
/// serialized because the merge reader must read and remap them.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeContainer {
    EventSource(EventSource),
    EventDataStream(EventDataStream),
    EventData(EventData),
    Event(Event),
    ExtractionWarning(ExtractionWarning),
    EventTag(EventTag),
}

impl AttributeContainer {
    pub fn container_type(&self) -> ContainerType {
        match self {
            Self::EventSource(_) => ContainerType::EventSource,
            Self::EventDataStream(_) => ContainerType::EventDataStream,
            Self::EventData(_) => ContainerType::EventData,
            Self::Event(_) => ContainerType::Event,
            Self::ExtractionWarning(_) => ContainerType::ExtractionWarning,
            Self::EventTag(_) => ContainerType::EventTag,
        }
    }

    /// The store-assigned identifier, if this container has been persisted
    /// or loaded from a store.
    pub fn identifier(&self) -> Option<&ContainerIdentifier> {
        match self {
            Self::EventSource(c) => c.identifier.as_ref(),
            Self::EventDataStream(c) => c.identifier.as_ref(),
            Self::EventData(c) => c.identifier.as_ref(),
            Self::Event(c) => c.identifier.as_ref(),
            Self::ExtractionWarning(c) => c.identifier.as_ref(),
            Self::EventTag(c) => c.identifier.as_ref(),
        }
    }

    pub fn set_identifier(&mut self, identifier: ContainerIdentifier) {
        let slot = match self {
            Self::EventSource(c) => &mut c.identifier,
            Self::EventDataStream(c) => &mut c.identifier,
            Self::EventData(c) => &mut c.identifier,
            Self::Event(c) => &mut c.identifier,
            Self::ExtractionWarning(c) => &mut c.identifier,
            Self::EventTag(c) => &mut c.identifier,
        };
        *slot = Some(identifier);
    }

    /// Timestamp of the chronological type; `None` for everything else.
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Self::Event(event) => Some(event.timestamp),
            _ => None,
        }
    }

    /// The dependency link this container carries, if any: the referenced
    /// container type together with the *local* identifier of the referenced
    /// container.
    pub fn reference(&self) -> Option<(ContainerType, &ContainerIdentifier)> {
        match self {
            Self::EventData(data) => data
                .stream_identifier()
                .map(|id| (ContainerType::EventDataStream, id)),
            Self::Event(event) => event
                .event_data_identifier()
                .map(|id| (ContainerType::EventData, id)),
            Self::EventTag(tag) => tag
                .event_identifier()
                .map(|id| (ContainerType::Event, id)),
            _ => None,
        }
    }

    /// Replace the dependency link with a remapped identifier. No-op for
    /// container types that carry no link.
    pub fn set_reference(&mut self, identifier: ContainerIdentifier) {
        match self {
            Self::EventData(data) => data.set_stream_identifier(identifier),
            Self::Event(event) => event.set_event_data_identifier(identifier),
            Self::EventTag(tag) => tag.set_event_identifier(identifier),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_roundtrip() {
        for ty in ContainerType::ALL {
            assert_eq!(ContainerType::from_name(ty.name()).unwrap(), ty);
        }
        assert!(ContainerType::from_name("no_such_type").is_err());
    }

    #[test]
    fn only_event_tags_are_mutable() {
        for ty in ContainerType::ALL {
            assert_eq!(ty.is_mutable(), ty == ContainerType::EventTag);
        }
    }

    #[test]
    fn only_events_are_timestamped() {
        for ty in ContainerType::ALL {
            assert_eq!(ty.is_timestamped(), ty == ContainerType::Event);
        }
    }

    #[test]
    fn identifier_is_excluded_from_serialization() {
        let mut event = Event::new(1_000, "Creation Time");
        let mut container = AttributeContainer::Event(event.clone());
        container.set_identifier(ContainerIdentifier::Sequence(7));

        let AttributeContainer::Event(with_id) = &container else {
            unreachable!();
        };
        let json = serde_json::to_string(with_id).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        // All attributes survive except the store-assigned identifier.
        event.identifier = None;
        assert_eq!(parsed, event);
        assert!(AttributeContainer::Event(parsed).identifier().is_none());
    }

    #[test]
    fn references_are_serialized() {
        let mut event = Event::new(500, "Modification Time");
        event.set_event_data_identifier(ContainerIdentifier::Sequence(3));

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.event_data_identifier(),
            Some(&ContainerIdentifier::Sequence(3))
        );
    }

    #[test]
    fn reference_accessor_matches_variant() {
        let mut data = EventData::new("fs:stat");
        data.set_stream_identifier(ContainerIdentifier::Sequence(1));
        let container = AttributeContainer::EventData(data);
        let (ty, id) = container.reference().unwrap();
        assert_eq!(ty, ContainerType::EventDataStream);
        assert_eq!(id, &ContainerIdentifier::Sequence(1));

        let source = AttributeContainer::EventSource(EventSource::new("/", SourceKind::Directory));
        assert!(source.reference().is_none());
    }

    #[test]
    fn set_reference_replaces_link() {
        let mut tag = EventTag::new();
        tag.set_event_identifier(ContainerIdentifier::Sequence(1));
        let mut container = AttributeContainer::EventTag(tag);
        container.set_reference(ContainerIdentifier::Sequence(9));
        let (_, id) = container.reference().unwrap();
        assert_eq!(id, &ContainerIdentifier::Sequence(9));
    }

    #[test]
    fn tag_labels_deduplicate() {
        let mut tag = EventTag::new();
        tag.add_label("malware");
        tag.add_label("malware");
        tag.add_label("reviewed");
        assert_eq!(tag.labels, vec!["malware", "reviewed"]);
    }

    #[test]
    fn attribute_value_untagged_roundtrip() {
        let mut data = EventData::new("windows:registry:key_value");
        data.set_attribute("key_path", AttributeValue::String("HKLM\\Run".into()));
        data.set_attribute("value_count", AttributeValue::Integer(4));
        data.set_attribute("is_default", AttributeValue::Bool(false));
        data.set_attribute("raw", AttributeValue::Bytes(vec![1, 2, 3]));

        let json = serde_json::to_string(&data).unwrap();
        let parsed: EventData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, data);
    }
}
