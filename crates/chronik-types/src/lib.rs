//! Foundation types for chronik.
//!
//! This crate provides the container, identifier, and temporal types used
//! throughout the timeline storage system. Every other chronik crate depends
//! on `chronik-types`.
//!
//! # Key Types
//!
//! - [`AttributeContainer`] — tagged union over the known container kinds
//! - [`ContainerType`] — the container type registry
//! - [`ContainerIdentifier`] — backend-polymorphic container handle
//! - [`TimeRange`] — inclusive timestamp interval for range-pruned reads

pub mod container;
pub mod error;
pub mod identifier;
pub mod time;

pub use container::{
    AttributeContainer, AttributeValue, ContainerType, Event, EventData, EventDataStream,
    EventSource, EventTag, ExtractionWarning, SourceKind,
};
pub use error::TypeError;
pub use identifier::ContainerIdentifier;
pub use time::{now_micros, timestamp_from_rfc3339, TimeRange};
