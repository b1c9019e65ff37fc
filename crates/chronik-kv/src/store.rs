use uuid::Uuid;

use chronik_store::{
    AccessMode, AttributeStore, CompressionFormat, ContainerCodec, ContainerFilter, StorageScope,
    StoreError, StoreLifecycle, StoreResult,
};
use chronik_types::{AttributeContainer, ContainerIdentifier, ContainerType, Event, TimeRange};

use crate::client::KeyValueClient;

/// Attribute store backed by a key/value service.
///
/// Each container type maps to one hash named
/// `{session}-{task}-{container_type}` whose fields are identifier strings
/// and whose values are JSON payloads. A parallel sorted set
/// `{session}-{task}-sorted_event_identifier` scores event identifiers by
/// timestamp so chronological reads avoid scanning every container.
///
/// Identifiers are random 128-bit keys, so uncoordinated writers cannot
/// collide. All calls are synchronous; this is the only backend that talks
/// to a service rather than local files.
pub struct KvStore {
    client: Box<dyn KeyValueClient>,
    session: Uuid,
    task: Uuid,
    scope: StorageScope,
    lifecycle: StoreLifecycle,
    codec: ContainerCodec,
}

impl KvStore {
    pub fn new(client: Box<dyn KeyValueClient>, session: Uuid, task: Uuid) -> Self {
        Self {
            client,
            session,
            task,
            scope: StorageScope::Task,
            lifecycle: StoreLifecycle::new(),
            // Values are stored as plain JSON; the service handles its own
            // persistence encoding.
            codec: ContainerCodec::new(CompressionFormat::None),
        }
    }

    pub fn scope(&self) -> StorageScope {
        self.scope
    }

    fn hash_key(&self, container_type: ContainerType) -> String {
        format!("{}-{}-{}", self.session, self.task, container_type.name())
    }

    fn sorted_event_key(&self) -> String {
        format!("{}-{}-sorted_event_identifier", self.session, self.task)
    }

    /// Field names of one type's hash, sorted for deterministic positional
    /// access (random identifiers carry no insertion order server-side).
    fn sorted_fields(&mut self, container_type: ContainerType) -> StoreResult<Vec<String>> {
        let key = self.hash_key(container_type);
        let mut fields = self.client.hfields(&key)?;
        fields.sort();
        Ok(fields)
    }

    fn container_by_field(
        &mut self,
        container_type: ContainerType,
        field: &str,
    ) -> StoreResult<Option<AttributeContainer>> {
        let key = self.hash_key(container_type);
        let Some(payload) = self.client.hget(&key, field)? else {
            return Ok(None);
        };
        let identifier = ContainerIdentifier::Key(
            Uuid::parse_str(field)
                .map_err(|_| StoreError::Corrupt(format!("field {field} is not an identifier")))?,
        );
        let mut container = self
            .codec
            .decode(container_type, &payload)
            .map_err(|err| err.with_identifier(identifier.clone()))?;
        container.set_identifier(identifier);
        Ok(Some(container))
    }

    /// Remove every key this store owns. Deletion is explicit; identifiers
    /// of removed containers are never reused.
    pub fn purge(&mut self) -> StoreResult<()> {
        for container_type in ContainerType::ALL {
            let key = self.hash_key(container_type);
            self.client.delete(&key)?;
        }
        let sorted = self.sorted_event_key();
        self.client.delete(&sorted)?;
        Ok(())
    }
}

impl AttributeStore for KvStore {
    fn open(&mut self, mode: AccessMode) -> StoreResult<()> {
        self.lifecycle.set_open(mode)
    }

    fn close(&mut self) -> StoreResult<()> {
        // Writes are synchronous; nothing is buffered client-side.
        self.lifecycle.set_closed()
    }

    fn add_container(
        &mut self,
        mut container: AttributeContainer,
    ) -> StoreResult<ContainerIdentifier> {
        self.lifecycle.ensure_writable()?;

        let container_type = container.container_type();
        let identifier = ContainerIdentifier::new_key();
        container.set_identifier(identifier.clone());
        let payload = self.codec.encode(&container)?;

        let key = self.hash_key(container_type);
        let field = identifier.cache_key();
        self.client.hset(&key, &field, &payload)?;

        if let Some(timestamp) = container.timestamp() {
            let sorted = self.sorted_event_key();
            self.client.zadd(&sorted, &field, timestamp)?;
        }
        Ok(identifier)
    }

    fn container_by_identifier(
        &mut self,
        container_type: ContainerType,
        identifier: &ContainerIdentifier,
    ) -> StoreResult<Option<AttributeContainer>> {
        self.lifecycle.ensure_open()?;
        let ContainerIdentifier::Key(_) = identifier else {
            return Ok(None);
        };
        self.container_by_field(container_type, &identifier.cache_key())
    }

    fn container_by_index(
        &mut self,
        container_type: ContainerType,
        index: usize,
    ) -> StoreResult<Option<AttributeContainer>> {
        self.lifecycle.ensure_open()?;
        let fields = self.sorted_fields(container_type)?;
        let Some(field) = fields.get(index) else {
            return Ok(None);
        };
        let field = field.clone();
        self.container_by_field(container_type, &field)
    }

    fn containers(
        &mut self,
        container_type: ContainerType,
        filter: Option<&ContainerFilter>,
    ) -> StoreResult<Vec<AttributeContainer>> {
        self.lifecycle.ensure_open()?;
        let fields = self.sorted_fields(container_type)?;
        let mut results = Vec::with_capacity(fields.len());
        for field in fields {
            if let Some(container) = self.container_by_field(container_type, &field)? {
                if filter.map_or(true, |keep| keep(&container)) {
                    results.push(container);
                }
            }
        }
        Ok(results)
    }

    fn container_count(&mut self, container_type: ContainerType) -> StoreResult<usize> {
        self.lifecycle.ensure_open()?;
        let key = self.hash_key(container_type);
        self.client.hlen(&key)
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
        let ContainerIdentifier::Key(_) = &identifier else {
            return Err(StoreError::UnknownIdentifier {
                container_type,
                identifier,
            });
        };

        let key = self.hash_key(container_type);
        let field = identifier.cache_key();
        if self.client.hget(&key, &field)?.is_none() {
            return Err(StoreError::UnknownIdentifier {
                container_type,
                identifier,
            });
        }
        let payload = self.codec.encode(container)?;
        self.client.hset(&key, &field, &payload)
    }

    fn sorted_events<'a>(
        &'a mut self,
        range: Option<TimeRange>,
    ) -> StoreResult<Box<dyn Iterator<Item = StoreResult<Event>> + 'a>> {
        self.lifecycle.ensure_open()?;

        let (min, max) = match range {
            Some(range) => (range.start, range.end),
            None => (i64::MIN, i64::MAX),
        };
        let sorted = self.sorted_event_key();
        let members = self.client.zrangebyscore(&sorted, min, max)?;

        let mut events = Vec::with_capacity(members.len());
        for member in members {
            let Some(container) = self.container_by_field(ContainerType::Event, &member)? else {
                // Index entry without a payload; the hash was pruned.
                tracing::warn!(field = %member, "sorted index references a missing event");
                continue;
            };
            let AttributeContainer::Event(event) = container else {
                continue;
            };
            events.push(event);
        }
        Ok(Box::new(events.into_iter().map(Ok)))
    }
}
