use std::collections::HashMap;

use chronik_types::{ContainerIdentifier, ContainerType};

/// Identifier remapping built during one merge pass.
///
/// Maps a task store's local identifiers to the identifiers the session
/// store assigned for the same containers. Owned by a single merge pass
/// and discarded with it; never persisted.
#[derive(Debug, Default)]
pub struct RemapTable {
    map: HashMap<(ContainerType, ContainerIdentifier), ContainerIdentifier>,
}

impl RemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        container_type: ContainerType,
        local: ContainerIdentifier,
        session: ContainerIdentifier,
    ) {
        self.map.insert((container_type, local), session);
    }

    pub fn lookup(
        &self,
        container_type: ContainerType,
        local: &ContainerIdentifier,
    ) -> Option<&ContainerIdentifier> {
        self.map.get(&(container_type, local.clone()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
