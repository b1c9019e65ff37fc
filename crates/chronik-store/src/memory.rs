use std::collections::BTreeMap;

use chronik_types::{
    AttributeContainer, ContainerIdentifier, ContainerType, Event, TimeRange,
};

use crate::error::{StoreError, StoreResult};
use crate::lifecycle::{AccessMode, StoreLifecycle};
use crate::traits::{AttributeStore, ContainerFilter};

/// In-memory attribute store.
///
/// Intended for tests, tooling, and short-lived scratch sessions; contents
/// do not survive the process. Containers are held per type in an ordered
/// map keyed by the identifier's `cache_key()`, which preserves insertion
/// order because sequence identifiers are monotonic. Reads return clones so
/// callers cannot mutate stored state in place.
#[derive(Debug, Default)]
pub struct MemoryStore {
    lifecycle: StoreLifecycle,
    containers: BTreeMap<ContainerType, BTreeMap<String, AttributeContainer>>,
    next_sequence: BTreeMap<ContainerType, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn typed(&self, container_type: ContainerType) -> Option<&BTreeMap<String, AttributeContainer>> {
        self.containers.get(&container_type)
    }
}

impl AttributeStore for MemoryStore {
    fn open(&mut self, mode: AccessMode) -> StoreResult<()> {
        self.lifecycle.set_open(mode)
    }

    fn close(&mut self) -> StoreResult<()> {
        self.lifecycle.set_closed()
    }

    fn add_container(
        &mut self,
        mut container: AttributeContainer,
    ) -> StoreResult<ContainerIdentifier> {
        self.lifecycle.ensure_writable()?;

        let container_type = container.container_type();
        let sequence = self.next_sequence.entry(container_type).or_insert(1);
        let identifier = ContainerIdentifier::Sequence(*sequence);
        *sequence += 1;

        container.set_identifier(identifier.clone());
        self.containers
            .entry(container_type)
            .or_default()
            .insert(identifier.cache_key(), container);
        Ok(identifier)
    }

    fn container_by_identifier(
        &mut self,
        container_type: ContainerType,
        identifier: &ContainerIdentifier,
    ) -> StoreResult<Option<AttributeContainer>> {
        self.lifecycle.ensure_open()?;
        Ok(self
            .typed(container_type)
            .and_then(|map| map.get(&identifier.cache_key()))
            .cloned())
    }

    fn container_by_index(
        &mut self,
        container_type: ContainerType,
        index: usize,
    ) -> StoreResult<Option<AttributeContainer>> {
        self.lifecycle.ensure_open()?;
        Ok(self
            .typed(container_type)
            .and_then(|map| map.values().nth(index))
            .cloned())
    }

    fn containers(
        &mut self,
        container_type: ContainerType,
        filter: Option<&ContainerFilter>,
    ) -> StoreResult<Vec<AttributeContainer>> {
        self.lifecycle.ensure_open()?;
        let Some(map) = self.typed(container_type) else {
            return Ok(Vec::new());
        };
        Ok(map
            .values()
            .filter(|container| filter.map_or(true, |keep| keep(container)))
            .cloned()
            .collect())
    }

    fn container_count(&mut self, container_type: ContainerType) -> StoreResult<usize> {
        self.lifecycle.ensure_open()?;
        Ok(self.typed(container_type).map_or(0, BTreeMap::len))
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

        let slot = self
            .containers
            .entry(container_type)
            .or_default()
            .get_mut(&identifier.cache_key())
            .ok_or_else(|| StoreError::UnknownIdentifier {
                container_type,
                identifier: identifier.clone(),
            })?;
        *slot = container.clone();
        Ok(())
    }

    fn sorted_events<'a>(
        &'a mut self,
        range: Option<TimeRange>,
    ) -> StoreResult<Box<dyn Iterator<Item = StoreResult<Event>> + 'a>> {
        self.lifecycle.ensure_open()?;

        let mut events: Vec<Event> = self
            .typed(ContainerType::Event)
            .into_iter()
            .flat_map(|map| map.values())
            .filter_map(|container| match container {
                AttributeContainer::Event(event) => Some(event.clone()),
                _ => None,
            })
            .filter(|event| range.map_or(true, |range| range.contains(event.timestamp)))
            .collect();
        // Stable sort: insertion order survives for equal timestamps.
        events.sort_by_key(|event| event.timestamp);

        Ok(Box::new(events.into_iter().map(Ok)))
    }
}
