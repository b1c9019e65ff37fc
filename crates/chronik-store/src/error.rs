use chronik_types::{ContainerIdentifier, ContainerType};

/// Errors from attribute store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `open()` called on a store that is already open.
    #[error("store is already open")]
    AlreadyOpen,

    /// An operation that requires an open store was called on a closed one.
    #[error("store is not open")]
    NotOpen,

    /// A mutating operation was attempted on a closed or read-only store.
    #[error("store is not writable")]
    NotWritable,

    /// A container could not be encoded, or decoded at a point where no
    /// identifier is known yet. Backends attach the identifier via
    /// [`StoreError::with_identifier`] where they have one.
    #[error("{container_type} container could not be serialized: {reason}")]
    Serialization {
        container_type: ContainerType,
        reason: String,
    },

    /// A stored container payload could not be decoded.
    #[error("{container_type} container {identifier} could not be deserialized: {reason}")]
    Deserialization {
        container_type: ContainerType,
        identifier: ContainerIdentifier,
        reason: String,
    },

    /// The file's declared format version is outside the supported window.
    /// Fatal at open time; the store is never partially opened.
    #[error("unsupported format version {found}: {reason}")]
    FormatVersion { found: u32, reason: String },

    /// Transient platform file-locking condition. Retried a bounded number
    /// of times before being propagated.
    #[error("storage file is locked: {0}")]
    LockedFile(String),

    /// An update or lookup used an identifier the store never assigned.
    #[error("{container_type} container {identifier} is not stored")]
    UnknownIdentifier {
        container_type: ContainerType,
        identifier: ContainerIdentifier,
    },

    /// A container that requires an identifier (update) does not have one.
    #[error("{0} container has no identifier")]
    MissingIdentifier(ContainerType),

    /// `update_container` called for a type whose rows are immutable.
    #[error("{0} containers are immutable")]
    Immutable(ContainerType),

    /// The store's metadata is missing or malformed.
    #[error("invalid store metadata: {0}")]
    Metadata(String),

    /// On-disk data is structurally malformed.
    #[error("corrupt store data: {0}")]
    Corrupt(String),

    /// Failure reported by the underlying storage service or library.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Upgrade a payload [`Serialization`](Self::Serialization) error into a
    /// [`Deserialization`](Self::Deserialization) error carrying the
    /// identifier of the row it came from. Other errors pass through.
    pub fn with_identifier(self, identifier: ContainerIdentifier) -> Self {
        match self {
            Self::Serialization {
                container_type,
                reason,
            } => Self::Deserialization {
                container_type,
                identifier,
                reason,
            },
            other => other,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
