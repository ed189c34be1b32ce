use std::sync::Arc;

use tracing::info;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::traits::Store;

#[cfg(feature = "memory")]
use crate::memory::MemoryStore;

#[cfg(feature = "valkey")]
use crate::valkey::ValkeyStore;

/// Build the store backend selected by `config`.
///
/// Fails with [`StoreError::UnsupportedBackend`] when the backend's cargo
/// feature is not enabled.
pub async fn from_config(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config {
        #[cfg(feature = "memory")]
        StoreConfig::Memory => {
            info!("using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }

        #[cfg(feature = "valkey")]
        StoreConfig::Valkey {
            url,
            namespace,
            pool_size,
        } => {
            let store = ValkeyStore::new(url, namespace.clone(), *pool_size).await?;
            info!(namespace = ?namespace, "connected to Valkey store");
            Ok(Arc::new(store))
        }

        #[allow(unreachable_patterns)]
        other => Err(StoreError::UnsupportedBackend(format!(
            "backend not enabled in this build: {other:?}"
        ))),
    }
}
