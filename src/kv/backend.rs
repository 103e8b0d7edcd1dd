//! Backend trait for the KV layer.
//!
//! Defines the capability set every coordination-store driver implements,
//! so callers never depend on a specific wire protocol.

use super::error::{Error, Result};
use super::types::KeyValue;
use async_trait::async_trait;

/// Backend trait for hierarchical key-value storage.
///
/// All backends must be thread-safe (`Send + Sync`) for use with tokio.
/// Each call is one independent request; implementations perform no
/// retries of their own.
///
/// # Example
///
/// ```ignore
/// use coordkv::kv::{KvBackend, MemoryBackend};
///
/// let backend = MemoryBackend::new();
/// backend.set("services/web/1", "10.0.0.1:80", 0).await?;
/// let kv = backend.get_val("services/web/1").await?;
/// ```
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Stores `value` at `key`, creating intermediate path segments.
    ///
    /// A `ttl` of `0` means the key never expires; otherwise it expires
    /// after `ttl` seconds.
    ///
    /// # Errors
    ///
    /// Returns the store's error when the write fails.
    async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()>;

    /// Reads a single entry without recursion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] when `key` is absent, or a
    /// connectivity/pass-through error.
    async fn get_val(&self, key: &str) -> Result<KeyValue>;

    /// Reads every entry under `key`.
    ///
    /// With `sort = true`, backends that can order by key return entries in
    /// ascending lexical key order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] when nothing lives under `key`. An
    /// error is never paired with a partial list.
    async fn get_list(&self, key: &str, sort: bool) -> Result<Vec<KeyValue>>;

    /// Deletes a single key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] when nothing was deleted, and
    /// [`Error::Unsupported`] for backends without delete.
    async fn delete(&self, key: &str) -> Result<()> {
        let _ = key;
        Err(Error::Unsupported {
            backend: self.name(),
            operation: "delete",
        })
    }

    /// Deletes every key starting with `prefix`, returning how many went.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] when nothing was deleted, and
    /// [`Error::Unsupported`] for backends without delete.
    async fn delete_list(&self, prefix: &str) -> Result<u64> {
        let _ = prefix;
        Err(Error::Unsupported {
            backend: self.name(),
            operation: "delete_list",
        })
    }

    /// Releases the underlying connection. Later calls may fail with
    /// [`Error::ClientClosed`].
    async fn close(&self) {}
}
