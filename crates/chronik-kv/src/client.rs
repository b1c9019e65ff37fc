use std::collections::BTreeMap;

use redis::Commands;

use chronik_store::{StoreError, StoreResult};

/// Synchronous key/value service operations the backend needs: hashes for
/// container payloads and one sorted set for the chronological index.
///
/// The trait seam exists so stores can be constructed against an in-process
/// fake in tests and tooling; production uses [`RedisClient`].
pub trait KeyValueClient: Send {
    fn hset(&mut self, key: &str, field: &str, value: &[u8]) -> StoreResult<()>;

    fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>>;

    fn hlen(&mut self, key: &str) -> StoreResult<usize>;

    /// Field names of a hash, in service order (unspecified).
    fn hfields(&mut self, key: &str) -> StoreResult<Vec<String>>;

    fn zadd(&mut self, key: &str, member: &str, score: i64) -> StoreResult<()>;

    /// Members with `min <= score <= max`, ordered by score with the
    /// service's lexicographic member tie-break.
    fn zrangebyscore(&mut self, key: &str, min: i64, max: i64) -> StoreResult<Vec<String>>;

    /// Remove a key outright. Removal is explicit; keys are never recycled
    /// into fresh identifiers.
    fn delete(&mut self, key: &str) -> StoreResult<()>;
}

fn to_backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Client for a real Redis-compatible service.
pub struct RedisClient {
    connection: redis::Connection,
}

impl RedisClient {
    /// Connect to the service at `url`, e.g. `redis://127.0.0.1:6379`.
    pub fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(to_backend)?;
        let connection = client.get_connection().map_err(to_backend)?;
        Ok(Self { connection })
    }
}

impl KeyValueClient for RedisClient {
    fn hset(&mut self, key: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        let _: () = self.connection.hset(key, field, value).map_err(to_backend)?;
        Ok(())
    }

    fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        self.connection.hget(key, field).map_err(to_backend)
    }

    fn hlen(&mut self, key: &str) -> StoreResult<usize> {
        self.connection.hlen(key).map_err(to_backend)
    }

    fn hfields(&mut self, key: &str) -> StoreResult<Vec<String>> {
        self.connection.hkeys(key).map_err(to_backend)
    }

    fn zadd(&mut self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        let _: () = self.connection.zadd(key, member, score).map_err(to_backend)?;
        Ok(())
    }

    fn zrangebyscore(&mut self, key: &str, min: i64, max: i64) -> StoreResult<Vec<String>> {
        self.connection
            .zrangebyscore(key, min, max)
            .map_err(to_backend)
    }

    fn delete(&mut self, key: &str) -> StoreResult<()> {
        let _: () = self.connection.del(key).map_err(to_backend)?;
        Ok(())
    }
}

/// In-process fake with Redis semantics, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryClient {
    hashes: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    sorted_sets: BTreeMap<String, BTreeMap<String, i64>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys across hashes and sorted sets.
    pub fn key_count(&self) -> usize {
        self.hashes.len() + self.sorted_sets.len()
    }
}

impl KeyValueClient for MemoryClient {
    fn hset(&mut self, key: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_vec());
        Ok(())
    }

    fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    fn hlen(&mut self, key: &str) -> StoreResult<usize> {
        Ok(self.hashes.get(key).map_or(0, BTreeMap::len))
    }

    fn hfields(&mut self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .hashes
            .get(key)
            .map_or_else(Vec::new, |hash| hash.keys().cloned().collect()))
    }

    fn zadd(&mut self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        self.sorted_sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    fn zrangebyscore(&mut self, key: &str, min: i64, max: i64) -> StoreResult<Vec<String>> {
        let Some(set) = self.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(&i64, &String)> = set
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(member, score)| (score, member))
            .collect();
        members.sort();
        Ok(members.into_iter().map(|(_, member)| member.clone()).collect())
    }

    fn delete(&mut self, key: &str) -> StoreResult<()> {
        self.hashes.remove(key);
        self.sorted_sets.remove(key);
        Ok(())
    }
}
