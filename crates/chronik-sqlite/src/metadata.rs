use rusqlite::Connection;

use chronik_store::{
    AccessMode, CompressionFormat, SerializationFormat, StorageScope, StoreError, StoreResult,
};

/// Version written into new files.
pub const FORMAT_VERSION: u32 = 8;

/// Oldest version that may be opened for writing as-is.
pub const APPEND_COMPATIBLE_FORMAT_VERSION: u32 = 8;

/// Oldest version that an upgrade tool can migrate in place. Older files
/// must be regenerated from the evidence.
pub const UPGRADE_COMPATIBLE_FORMAT_VERSION: u32 = 7;

/// Oldest version that may still be opened read-only.
pub const READ_COMPATIBLE_FORMAT_VERSION: u32 = 6;

/// Contents of the `metadata` table, validated on every open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageMetadata {
    pub format_version: u32,
    pub compression: CompressionFormat,
    pub serialization: SerializationFormat,
    pub scope: StorageScope,
}

impl StorageMetadata {
    /// Metadata for a freshly created file.
    pub fn current(compression: CompressionFormat, scope: StorageScope) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            compression,
            serialization: SerializationFormat::Json,
            scope,
        }
    }

    /// Read and parse the `metadata` table.
    pub fn read(conn: &Connection) -> StoreResult<Self> {
        let mut stmt = conn
            .prepare("SELECT key, value FROM metadata")
            .map_err(|err| StoreError::Metadata(err.to_string()))?;
        let mut rows = stmt
            .query([])
            .map_err(|err| StoreError::Metadata(err.to_string()))?;

        let mut format_version = None;
        let mut compression = None;
        let mut serialization = None;
        let mut scope = None;
        while let Some(row) = rows
            .next()
            .map_err(|err| StoreError::Metadata(err.to_string()))?
        {
            let key: String = row
                .get(0)
                .map_err(|err| StoreError::Metadata(err.to_string()))?;
            let value: String = row
                .get(1)
                .map_err(|err| StoreError::Metadata(err.to_string()))?;
            match key.as_str() {
                "format_version" => {
                    format_version = Some(value.parse::<u32>().map_err(|_| {
                        StoreError::Metadata(format!("format_version is not a number: {value}"))
                    })?);
                }
                "compression_format" => compression = Some(CompressionFormat::from_name(&value)?),
                "serialization_format" => {
                    serialization = Some(SerializationFormat::from_name(&value)?);
                }
                "storage_type" => scope = Some(StorageScope::from_name(&value)?),
                _ => {}
            }
        }

        Ok(Self {
            format_version: format_version
                .ok_or_else(|| StoreError::Metadata("missing format_version".into()))?,
            compression: compression
                .ok_or_else(|| StoreError::Metadata("missing compression_format".into()))?,
            serialization: serialization
                .ok_or_else(|| StoreError::Metadata("missing serialization_format".into()))?,
            scope: scope.ok_or_else(|| StoreError::Metadata("missing storage_type".into()))?,
        })
    }

    /// Insert the metadata rows into a freshly created file.
    pub fn write(&self, conn: &Connection) -> StoreResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT)",
            [],
        )
        .map_err(|err| StoreError::Backend(err.to_string()))?;
        let pairs = [
            ("format_version", self.format_version.to_string()),
            ("compression_format", self.compression.name().to_string()),
            ("serialization_format", self.serialization.name().to_string()),
            ("storage_type", self.scope.name().to_string()),
        ];
        for (key, value) in pairs {
            conn.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        }
        Ok(())
    }

    /// Validate the file against the three compatibility thresholds and the
    /// expected storage scope. Failures are fatal; the store is never
    /// partially opened.
    pub fn validate(&self, mode: AccessMode, expected_scope: StorageScope) -> StoreResult<()> {
        if self.format_version > FORMAT_VERSION {
            return Err(StoreError::FormatVersion {
                found: self.format_version,
                reason: format!("newer than supported version {FORMAT_VERSION}"),
            });
        }
        match mode {
            AccessMode::ReadWrite => {
                if self.format_version < APPEND_COMPATIBLE_FORMAT_VERSION {
                    let reason = if self.format_version >= UPGRADE_COMPATIBLE_FORMAT_VERSION {
                        format!(
                            "older than append-compatible version \
                             {APPEND_COMPATIBLE_FORMAT_VERSION}; upgrade the file first"
                        )
                    } else {
                        format!(
                            "older than upgrade-compatible version \
                             {UPGRADE_COMPATIBLE_FORMAT_VERSION}; regenerate the file"
                        )
                    };
                    return Err(StoreError::FormatVersion {
                        found: self.format_version,
                        reason,
                    });
                }
            }
            AccessMode::ReadOnly => {
                if self.format_version < READ_COMPATIBLE_FORMAT_VERSION {
                    return Err(StoreError::FormatVersion {
                        found: self.format_version,
                        reason: format!(
                            "older than read-compatible version {READ_COMPATIBLE_FORMAT_VERSION}"
                        ),
                    });
                }
            }
        }
        if self.scope != expected_scope {
            return Err(StoreError::Metadata(format!(
                "storage_type is {}, expected {}",
                self.scope.name(),
                expected_scope.name()
            )));
        }
        Ok(())
    }
}
