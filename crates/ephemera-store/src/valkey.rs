//! Valkey/Redis adapter for the store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;

use crate::error::StoreError;
use crate::path;
use crate::traits::Store;

/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 256;

/// Valkey/Redis store backend.
#[derive(Clone)]
pub struct ValkeyStore {
    pool: Pool,
    namespace: Option<String>,
}

impl ValkeyStore {
    /// Create a new Valkey store and check the connection.
    pub async fn new(
        url: &str,
        namespace: Option<String>,
        pool_size: usize,
    ) -> Result<Self, StoreError> {
        let config = Config::from_url(url);
        let pool = config
            .builder()
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { pool, namespace })
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    fn prefixed_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{key}"),
            None => key.to_owned(),
        }
    }

    fn strip_namespace<'a>(&self, key: &'a str) -> &'a str {
        match &self.namespace {
            Some(ns) => key
                .strip_prefix(ns.as_str())
                .and_then(|k| k.strip_prefix(':'))
                .unwrap_or(key),
            None => key,
        }
    }
}

/// Escape glob metacharacters so a key prefix is matched literally by SCAN.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl Store for ValkeyStore {
    async fn set_value(&self, path: &str, value: &str) -> Result<(), StoreError> {
        let key = self.prefixed_key(path::validate(path)?);
        let mut conn = self.conn().await?;

        conn.set::<_, _, ()>(&key, value)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn value(&self, path: &str) -> Result<Option<String>, StoreError> {
        let key = self.prefixed_key(path::validate(path)?);
        let mut conn = self.conn().await?;

        conn.get(&key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn values(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let scan = path::scan_prefix(prefix);
        let pattern = format!("{}*", escape_glob(&self.prefixed_key(&scan)));
        let mut conn = self.conn().await?;

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut *conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }

        // Keys may disappear between SCAN and MGET.
        let fetched: Vec<Option<String>> = conn
            .mget(&keys)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let entries = keys
            .iter()
            .zip(fetched)
            .filter_map(|(key, value)| {
                let rel = path::relative(&scan, self.strip_namespace(key))?;
                value.map(|v| (rel.to_owned(), v))
            })
            .collect();

        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let key = self.prefixed_key(path::validate(path)?);
        let mut conn = self.conn().await?;

        let deleted: i64 = conn
            .del(&key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(deleted > 0)
    }

    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError> {
        let key = self.prefixed_key(path::validate(path)?);
        let mut conn = self.conn().await?;

        let script = redis::Script::new(
            r"
            local current = redis.call('GET', KEYS[1])
            if ARGV[1] == '0' then
                if current == false then
                    redis.call('SET', KEYS[1], ARGV[3])
                    return 1
                end
                return 0
            end
            if current == ARGV[2] then
                redis.call('SET', KEYS[1], ARGV[3])
                return 1
            end
            return 0
            ",
        );

        let (present, expected_value) = match expected {
            Some(v) => ("1", v),
            None => ("0", ""),
        };

        let result: i64 = script
            .key(&key)
            .arg(present)
            .arg(expected_value)
            .arg(new)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(result == 1)
    }
}

impl std::fmt::Debug for ValkeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(escape_glob("a/b*[c]?"), "a/b\\*\\[c\\]\\?");
        assert_eq!(escape_glob("plain/path/"), "plain/path/");
    }
}
