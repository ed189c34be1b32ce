use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::path;
use crate::traits::Store;

/// In-process store backed by an ordered map.
///
/// Clones share the same underlying data, so a clone handed to another
/// component observes every write.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn set_value(&self, path: &str, value: &str) -> Result<(), StoreError> {
        let key = path::validate(path)?;
        let mut data = self.data.write().await;
        data.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn value(&self, path: &str) -> Result<Option<String>, StoreError> {
        let key = path::validate(path)?;
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn values(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let scan = path::scan_prefix(prefix);
        let data = self.data.read().await;

        let entries = data
            .range(scan.clone()..)
            .take_while(|(k, _)| k.starts_with(&scan))
            .filter_map(|(k, v)| path::relative(&scan, k).map(|rel| (rel.to_owned(), v.clone())))
            .collect();

        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let key = path::validate(path)?;
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some())
    }

    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError> {
        let key = path::validate(path)?;
        let mut data = self.data.write().await;

        if data.get(key).map(String::as_str) != expected {
            return Ok(false);
        }

        data.insert(key.to_owned(), new.to_owned());
        Ok(true)
    }
}
