use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Backend-polymorphic handle locating a container within one store.
///
/// An identifier is only meaningful inside the store instance that assigned
/// it; moving containers between stores requires remapping. Identifiers are
/// never reused after deletion.
///
/// Variants correspond to the storage backends:
/// - [`Sequence`](Self::Sequence) — monotonically increasing counter of the
///   in-memory store.
/// - [`Stream`](Self::Stream) — (stream number, entry index) inside one
///   numbered stream of the segmented binary file format.
/// - [`Row`](Self::Row) — (table name, row id) of the row-store file format.
/// - [`Key`](Self::Key) — random 128-bit value used as a key/value field
///   name, collision-free across uncoordinated writers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContainerIdentifier {
    Sequence(u64),
    Stream { stream: u32, entry: u32 },
    Row { table: String, row: i64 },
    Key(Uuid),
}

impl ContainerIdentifier {
    /// Generate a fresh random key identifier.
    pub fn new_key() -> Self {
        Self::Key(Uuid::new_v4())
    }

    /// Fixed-width string form whose lexicographic order matches the
    /// identifier's assignment order within one variant.
    ///
    /// Used as the key of the in-memory store's ordered map and as the
    /// field name of the key/value backend.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Sequence(value) => format!("{value:020}"),
            Self::Stream { stream, entry } => format!("{stream:010}.{entry:010}"),
            Self::Row { table, row } => format!("{table}.{row:019}"),
            Self::Key(uuid) => uuid.simple().to_string(),
        }
    }
}

impl fmt::Display for ContainerIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence(value) => write!(f, "seq:{value}"),
            Self::Stream { stream, entry } => write!(f, "stream:{stream}:{entry}"),
            Self::Row { table, row } => write!(f, "row:{table}:{row}"),
            Self::Key(uuid) => write!(f, "key:{uuid}"),
        }
    }
}
