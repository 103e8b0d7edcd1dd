//! etcd v3 (lease protocol) backend.
//!
//! TTLs are expressed as leases: a TTL-bearing write first grants a lease,
//! then attaches the write to it. When the write fails the lease is revoked
//! so it does not outlive the key it was meant for. A crash between grant
//! and put leaves the lease to expire on its own.
//!
//! Unlike the v2 driver this protocol has no directory nodes, so
//! `has_children` is always reported as `false`.

mod client;

#[cfg(test)]
mod tests;

pub use client::{GatewayClient, RangeOptions, RawKv, V3Client, prefix_range_end};

use super::backend::KvBackend;
use super::error::{Error, Result};
use super::types::{ConnectOptions, KeyValue};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

const BACKEND: &str = "etcd-v3";

/// etcd v3 driver, generic over the RPC client.
///
/// # Example
///
/// ```ignore
/// use coordkv::kv::{ConnectOptions, EtcdV3Backend, KvBackend};
///
/// let options = ConnectOptions::new(&["http://localhost:2379".to_string()]);
/// let backend = EtcdV3Backend::connect(&options).await?;
/// backend.set("services/web/1", "10.0.0.1:80", 30).await?;
/// let removed = backend.delete_list("services/").await?;
/// ```
pub struct EtcdV3Backend<C = GatewayClient> {
    client: C,
}

impl EtcdV3Backend<GatewayClient> {
    /// Connects over the JSON gateway.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionFailed`] when the client cannot be set up.
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        let client = GatewayClient::connect(options).await.inspect_err(|e| {
            warn!(error = %e, "could not instantiate etcd v3 client");
        })?;
        Ok(Self { client })
    }
}

impl<C: V3Client> EtcdV3Backend<C> {
    /// Wraps an existing client.
    pub fn with_client(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn put_with_lease(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        let ttl = i64::try_from(ttl)
            .map_err(|_| Error::Protocol(format!("ttl {ttl} exceeds the lease range")))?;

        let lease = self.client.grant(ttl).await.inspect_err(|e| {
            error!(key = %key, ttl = ttl, error = %e, "could not grant lease");
        })?;
        debug!(key = %key, lease = %lease.id, ttl = lease.ttl, "granted lease");

        if let Err(put_err) = self
            .client
            .put(key.as_bytes(), value.as_bytes(), Some(lease.id))
            .await
        {
            warn!(key = %key, error = %put_err, "could not set key in etcd");
            if let Err(revoke_err) = self.client.revoke(lease.id).await {
                warn!(
                    lease = %lease.id,
                    error = %revoke_err,
                    "attempt to revoke lease failed"
                );
            }
            return Err(put_err);
        }
        Ok(())
    }
}

fn to_key_value(raw: RawKv) -> KeyValue {
    KeyValue::new(
        String::from_utf8_lossy(&raw.key),
        String::from_utf8_lossy(&raw.value),
        false,
    )
}

#[async_trait]
impl<C: V3Client> KvBackend for EtcdV3Backend<C> {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        debug!(key = %key, ttl = ttl, "etcd v3 set");
        if ttl == 0 {
            return self
                .client
                .put(key.as_bytes(), value.as_bytes(), None)
                .await
                .inspect_err(|e| warn!(key = %key, error = %e, "could not set key in etcd"));
        }
        self.put_with_lease(key, value, ttl).await
    }

    async fn get_val(&self, key: &str) -> Result<KeyValue> {
        let kvs = match self
            .client
            .range(key.as_bytes(), RangeOptions::default())
            .await
        {
            Ok(kvs) => kvs,
            Err(e @ Error::Cancelled(_)) => {
                warn!(key = %key, error = %e, "context cancelled, could not retrieve key");
                return Err(e);
            },
            Err(e @ Error::ClientClosed) => {
                warn!(key = %key, error = %e, "client connection closed, could not retrieve key");
                return Err(e);
            },
            Err(e) => {
                warn!(key = %key, error = %e, "could not retrieve key from etcd");
                return Err(e);
            },
        };

        match kvs.into_iter().next() {
            Some(raw) => Ok(KeyValue::new(
                key,
                String::from_utf8_lossy(&raw.value),
                false,
            )),
            None => {
                info!(key = %key, "could not retrieve key");
                Err(Error::key_not_found(key))
            },
        }
    }

    async fn get_list(&self, key: &str, sort: bool) -> Result<Vec<KeyValue>> {
        let options = RangeOptions { prefix: true, sort };
        let kvs = self
            .client
            .range(key.as_bytes(), options)
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "could not retrieve key from etcd"))?;

        if kvs.is_empty() {
            return Err(Error::key_not_found(key));
        }
        Ok(kvs.into_iter().map(to_key_value).collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let deleted = self
            .client
            .delete_range(key.as_bytes(), RangeOptions::default())
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "could not delete key from etcd"))?;

        if deleted == 0 {
            return Err(Error::key_not_found(key));
        }
        Ok(())
    }

    async fn delete_list(&self, prefix: &str) -> Result<u64> {
        let options = RangeOptions {
            prefix: true,
            sort: false,
        };
        let deleted = self
            .client
            .delete_range(prefix.as_bytes(), options)
            .await
            .inspect_err(|e| warn!(key = %prefix, error = %e, "could not delete keys from etcd"))?;

        debug!(prefix = %prefix, deleted = deleted, "deleted keys");
        if deleted == 0 {
            return Err(Error::key_not_found(prefix));
        }
        Ok(deleted)
    }

    async fn close(&self) {
        self.client.close().await;
    }
}
