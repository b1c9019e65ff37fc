use crate::error::{StoreError, StoreResult};

/// How a store is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// Whether a store holds the durable session result or one task's private
/// output. Recorded in backend metadata and validated on open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageScope {
    Session,
    Task,
}

impl StorageScope {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Task => "task",
        }
    }

    pub fn from_name(name: &str) -> StoreResult<Self> {
        match name {
            "session" => Ok(Self::Session),
            "task" => Ok(Self::Task),
            other => Err(StoreError::Metadata(format!(
                "unknown storage type: {other}"
            ))),
        }
    }
}

/// Open/close state guard shared by every backend.
///
/// Backends call the `ensure_*` methods at the top of each operation so the
/// lifecycle errors are uniform across implementations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreLifecycle {
    state: State,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum State {
    #[default]
    Closed,
    Open {
        read_only: bool,
    },
}

impl StoreLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to open. Fails if already open.
    pub fn set_open(&mut self, mode: AccessMode) -> StoreResult<()> {
        if matches!(self.state, State::Open { .. }) {
            return Err(StoreError::AlreadyOpen);
        }
        self.state = State::Open {
            read_only: mode == AccessMode::ReadOnly,
        };
        Ok(())
    }

    /// Transition to closed. Fails if not open.
    pub fn set_closed(&mut self) -> StoreResult<()> {
        if !matches!(self.state, State::Open { .. }) {
            return Err(StoreError::NotOpen);
        }
        self.state = State::Closed;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open { .. })
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.state, State::Open { read_only: true })
    }

    /// Guard for read operations.
    pub fn ensure_open(&self) -> StoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StoreError::NotOpen)
        }
    }

    /// Guard for mutating operations. A closed store is not writable.
    pub fn ensure_writable(&self) -> StoreResult<()> {
        match self.state {
            State::Open { read_only: false } => Ok(()),
            _ => Err(StoreError::NotWritable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_open_fails() {
        let mut lifecycle = StoreLifecycle::new();
        lifecycle.set_open(AccessMode::ReadWrite).unwrap();
        assert!(matches!(
            lifecycle.set_open(AccessMode::ReadWrite),
            Err(StoreError::AlreadyOpen)
        ));
    }

    #[test]
    fn close_without_open_fails() {
        let mut lifecycle = StoreLifecycle::new();
        assert!(matches!(lifecycle.set_closed(), Err(StoreError::NotOpen)));
    }

    #[test]
    fn closed_store_is_not_writable() {
        let lifecycle = StoreLifecycle::new();
        assert!(matches!(
            lifecycle.ensure_writable(),
            Err(StoreError::NotWritable)
        ));
    }

    #[test]
    fn read_only_store_is_not_writable() {
        let mut lifecycle = StoreLifecycle::new();
        lifecycle.set_open(AccessMode::ReadOnly).unwrap();
        assert!(lifecycle.ensure_open().is_ok());
        assert!(matches!(
            lifecycle.ensure_writable(),
            Err(StoreError::NotWritable)
        ));
    }

    #[test]
    fn reopen_after_close() {
        let mut lifecycle = StoreLifecycle::new();
        lifecycle.set_open(AccessMode::ReadWrite).unwrap();
        lifecycle.set_closed().unwrap();
        lifecycle.set_open(AccessMode::ReadOnly).unwrap();
        assert!(lifecycle.is_read_only());
    }

    #[test]
    fn scope_names_roundtrip() {
        assert_eq!(
            StorageScope::from_name(StorageScope::Task.name()).unwrap(),
            StorageScope::Task
        );
        assert!(StorageScope::from_name("bogus").is_err());
    }
}
