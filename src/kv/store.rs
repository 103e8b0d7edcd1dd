//! High-level `KvStore` handle and backend factory.
//!
//! Callers pick a [`BackendKind`] at construction time and get back a
//! `KvStore` that hides which driver is underneath.

use super::backend::KvBackend;
use super::error::Result;
use super::etcd_v2::EtcdV2Backend;
use super::etcd_v3::EtcdV3Backend;
use super::memory::MemoryBackend;
use super::types::{ConnectOptions, KeyValue};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Which backend driver a store is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// In-process simulation; endpoints and credentials are ignored.
    Memory,
    /// etcd v2 keys API (TTL on the write).
    EtcdV2,
    /// etcd v3 JSON gateway (lease-backed TTLs, prefix delete).
    EtcdV3,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::EtcdV2 => "etcd-v2",
            Self::EtcdV3 => "etcd-v3",
        })
    }
}

/// Hierarchical key-value store handle.
///
/// Wraps a `KvBackend` and exposes the same operations regardless of the
/// driver underneath.
///
/// # Thread Safety
///
/// `KvStore` is `Clone` and can be shared across threads. Clones share the
/// backend, and with it the connection or in-memory map.
///
/// # Example
///
/// ```ignore
/// use coordkv::kv::{BackendKind, KvStore};
///
/// let servers = vec!["http://localhost:2379".to_string()];
/// let store = KvStore::open(&servers, BackendKind::EtcdV3).await?;
///
/// store.set("services/web/1", "10.0.0.1:80", 30).await?;
/// for kv in store.get_list("services/", true).await? {
///     println!("{kv}");
/// }
/// ```
#[derive(Clone)]
pub struct KvStore {
    backend: Arc<dyn KvBackend>,
}

impl KvStore {
    /// Builds a store for `servers` without credentials.
    ///
    /// # Errors
    ///
    /// Returns [`super::Error::ConstructionFailed`] when the backend cannot be
    /// set up. The host process is never terminated.
    pub async fn open(servers: &[String], kind: BackendKind) -> Result<Self> {
        Self::connect(kind, ConnectOptions::new(servers)).await
    }

    /// Builds a store for `servers`, authenticating as `username`.
    ///
    /// An empty `username` behaves like [`KvStore::open`].
    ///
    /// # Errors
    ///
    /// Returns [`super::Error::ConstructionFailed`] when the backend cannot be
    /// set up or the credentials are rejected.
    pub async fn open_with_auth(
        servers: &[String],
        kind: BackendKind,
        username: &str,
        password: &str,
    ) -> Result<Self> {
        let options = ConnectOptions::new(servers).with_credentials(username, password);
        Self::connect(kind, options).await
    }

    /// Builds a store from full connection options.
    ///
    /// # Errors
    ///
    /// Returns [`super::Error::ConstructionFailed`] when the backend cannot be
    /// set up.
    pub async fn connect(kind: BackendKind, options: ConnectOptions) -> Result<Self> {
        let store = match kind {
            BackendKind::Memory => Self::memory(),
            BackendKind::EtcdV2 => Self::custom(EtcdV2Backend::connect(&options)?),
            BackendKind::EtcdV3 => Self::custom(EtcdV3Backend::connect(&options).await?),
        };
        info!(
            backend = %kind,
            endpoints = ?options.endpoints,
            auth = options.credentials.is_some(),
            "KV store ready"
        );
        Ok(store)
    }

    /// Creates a new `KvStore` backed by an in-memory simulation.
    ///
    /// Ideal for tests. All data is lost when the last clone is dropped.
    pub fn memory() -> Self {
        Self::custom(MemoryBackend::new())
    }

    /// Creates a new `KvStore` with a custom backend.
    pub fn custom<B: KvBackend>(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Creates a new `KvStore` from a boxed backend.
    pub fn from_boxed(backend: Box<dyn KvBackend>) -> Self {
        Self {
            backend: Arc::from(backend),
        }
    }

    /// Name of the driver underneath.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Stores `value` at `key`; `ttl` of `0` never expires.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when the write fails.
    pub async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        self.backend.set(key, value, ttl).await
    }

    /// Reads a single entry.
    ///
    /// # Errors
    ///
    /// Returns [`super::Error::KeyNotFound`] when `key` is absent.
    pub async fn get_val(&self, key: &str) -> Result<KeyValue> {
        self.backend.get_val(key).await
    }

    /// Reads every entry under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`super::Error::KeyNotFound`] when nothing lives under `key`.
    pub async fn get_list(&self, key: &str, sort: bool) -> Result<Vec<KeyValue>> {
        self.backend.get_list(key, sort).await
    }

    /// Deletes a single key.
    ///
    /// # Errors
    ///
    /// Returns [`super::Error::KeyNotFound`] when nothing was deleted.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await
    }

    /// Deletes every key under `prefix`, returning the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`super::Error::KeyNotFound`] when nothing was deleted.
    pub async fn delete_list(&self, prefix: &str) -> Result<u64> {
        self.backend.delete_list(prefix).await
    }

    /// Closes the underlying client.
    pub async fn close(&self) {
        self.backend.close().await;
    }
}

impl fmt::Debug for KvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}
