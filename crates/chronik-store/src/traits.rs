use chronik_types::{AttributeContainer, ContainerIdentifier, ContainerType, Event, TimeRange};

use crate::error::StoreResult;
use crate::lifecycle::AccessMode;

/// Opaque per-container predicate applied by [`AttributeStore::containers`].
pub type ContainerFilter<'a> = dyn Fn(&AttributeContainer) -> bool + 'a;

/// Storage-engine contract shared by every backend.
///
/// All implementations must satisfy these invariants:
/// - Identifiers are assigned by the store at add time and are never reused.
/// - Adding one container type never blocks on another type's buffers.
/// - Positional reads resolve persisted rows first, then the still-buffered
///   tail, so readers see containers written but not yet flushed.
/// - Lookups by identifier are defensive: an absent identifier returns
///   `Ok(None)`, never an error.
/// - Mutating operations on a closed or read-only store fail with
///   `NotWritable`; closing a writable store flushes all buffers first.
/// - The store performs no locking. Callers serialize their own access;
///   cross-process handoff of file-backed stores is by atomic rename.
pub trait AttributeStore {
    /// Open the store. Fails with `AlreadyOpen` when it is already open and
    /// with `FormatVersion` when a file's declared version is outside the
    /// supported window.
    fn open(&mut self, mode: AccessMode) -> StoreResult<()>;

    /// Flush buffered data (when writable) and release resources. Fails
    /// with `NotOpen` if the store is not open.
    fn close(&mut self) -> StoreResult<()>;

    /// Persist (or buffer) a container and return its fresh identifier.
    fn add_container(
        &mut self,
        container: AttributeContainer,
    ) -> StoreResult<ContainerIdentifier>;

    /// Look up one container by its store-assigned identifier.
    fn container_by_identifier(
        &mut self,
        container_type: ContainerType,
        identifier: &ContainerIdentifier,
    ) -> StoreResult<Option<AttributeContainer>>;

    /// Positional access across flushed and buffered segments.
    fn container_by_index(
        &mut self,
        container_type: ContainerType,
        index: usize,
    ) -> StoreResult<Option<AttributeContainer>>;

    /// All containers of one type, in insertion order, optionally filtered.
    /// Every call restarts from the beginning.
    fn containers(
        &mut self,
        container_type: ContainerType,
        filter: Option<&ContainerFilter>,
    ) -> StoreResult<Vec<AttributeContainer>>;

    fn container_count(&mut self, container_type: ContainerType) -> StoreResult<usize>;

    fn has_containers(&mut self, container_type: ContainerType) -> StoreResult<bool> {
        Ok(self.container_count(container_type)? > 0)
    }

    /// Overwrite an existing row by its already-assigned identifier. Only
    /// legal for mutable container types (event tags).
    fn update_container(&mut self, container: &AttributeContainer) -> StoreResult<()>;

    /// All events in ascending timestamp order with a deterministic
    /// tie-break, optionally restricted to a time range.
    fn sorted_events<'a>(
        &'a mut self,
        range: Option<TimeRange>,
    ) -> StoreResult<Box<dyn Iterator<Item = StoreResult<Event>> + 'a>>;
}
