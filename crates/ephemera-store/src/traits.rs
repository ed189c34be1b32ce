use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;

/// Hierarchical key/value store.
///
/// Paths are slash-separated. Writes through [`Store::set_value`] and
/// [`Store::delete`] are unconditional; use [`Store::compare_and_swap`] when a
/// write must only happen if nobody else changed the value in between.
#[async_trait]
pub trait Store: Send + Sync {
    /// Write `value` at `path`, replacing any previous value.
    async fn set_value(&self, path: &str, value: &str) -> Result<(), StoreError>;

    /// Read the value at `path`, or `None` if the key is absent.
    async fn value(&self, path: &str) -> Result<Option<String>, StoreError>;

    /// Recursively scan every entry below `prefix`.
    ///
    /// Results are keyed by the path relative to `prefix` (for example
    /// `web/pr-42` for `root/instances/web/pr-42` scanned under
    /// `root/instances`), so leaves with the same name in different subtrees
    /// stay distinct.
    async fn values(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError>;

    /// Remove the value at `path`. Returns whether a value was present.
    async fn delete(&self, path: &str) -> Result<bool, StoreError>;

    /// Atomically replace the value at `path` with `new` if the current value
    /// equals `expected` (`None` meaning "absent").
    ///
    /// Returns `false` without writing when the current value differs.
    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError>;
}
