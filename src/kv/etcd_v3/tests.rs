//! Tests for the etcd v3 driver against an in-process fake client.

use super::*;
use crate::kv::types::{Lease, LeaseId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Minimal etcd v3 keyspace with leases and failure injection.
#[derive(Default)]
struct FakeClient {
    kvs: Mutex<BTreeMap<Vec<u8>, (Vec<u8>, Option<LeaseId>)>>,
    leases: Mutex<HashMap<LeaseId, i64>>,
    next_lease: AtomicI64,
    fail_puts: Mutex<HashSet<Vec<u8>>>,
    fail_grant: AtomicBool,
    fail_revoke: AtomicBool,
    cancel_reads: AtomicBool,
    closed: AtomicBool,
}

impl FakeClient {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::ClientClosed)
        } else {
            Ok(())
        }
    }

    fn fail_put(&self, key: &str) {
        self.fail_puts.lock().insert(key.as_bytes().to_vec());
    }

    fn lease_count(&self) -> usize {
        self.leases.lock().len()
    }

    fn matches(key: &[u8], candidate: &[u8], prefix: bool) -> bool {
        if prefix {
            candidate.starts_with(key)
        } else {
            candidate == key
        }
    }
}

#[async_trait]
impl V3Client for FakeClient {
    async fn grant(&self, ttl: i64) -> Result<Lease> {
        self.check_open()?;
        if self.fail_grant.load(Ordering::SeqCst) {
            return Err(Error::could_not_connect("grant refused"));
        }
        let id = LeaseId(self.next_lease.fetch_add(1, Ordering::SeqCst) + 1);
        self.leases.lock().insert(id, ttl);
        Ok(Lease { id, ttl })
    }

    async fn revoke(&self, id: LeaseId) -> Result<()> {
        self.check_open()?;
        if self.fail_revoke.load(Ordering::SeqCst) {
            return Err(Error::could_not_connect("revoke refused"));
        }
        if self.leases.lock().remove(&id).is_none() {
            return Err(Error::LeaseNotFound { id });
        }
        self.kvs.lock().retain(|_, (_, lease)| *lease != Some(id));
        Ok(())
    }

    async fn put(&self, key: &[u8], value: &[u8], lease: Option<LeaseId>) -> Result<()> {
        self.check_open()?;
        if self.fail_puts.lock().contains(key) {
            return Err(Error::Backend {
                code: 9,
                message: "put rejected".into(),
            });
        }
        if let Some(id) = lease
            && !self.leases.lock().contains_key(&id)
        {
            return Err(Error::LeaseNotFound { id });
        }
        self.kvs
            .lock()
            .insert(key.to_vec(), (value.to_vec(), lease));
        Ok(())
    }

    async fn range(&self, key: &[u8], options: RangeOptions) -> Result<Vec<RawKv>> {
        self.check_open()?;
        if self.cancel_reads.load(Ordering::SeqCst) {
            return Err(Error::Cancelled("context canceled".into()));
        }
        // BTreeMap iterates in ascending key order already.
        Ok(self
            .kvs
            .lock()
            .iter()
            .filter(|(k, _)| Self::matches(key, k, options.prefix))
            .map(|(k, (v, lease))| RawKv {
                key: k.clone(),
                value: v.clone(),
                lease: *lease,
            })
            .collect())
    }

    async fn delete_range(&self, key: &[u8], options: RangeOptions) -> Result<u64> {
        self.check_open()?;
        let mut kvs = self.kvs.lock();
        let before = kvs.len();
        kvs.retain(|k, _| !Self::matches(key, k, options.prefix));
        Ok((before - kvs.len()) as u64)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn backend() -> EtcdV3Backend<FakeClient> {
    EtcdV3Backend::with_client(FakeClient::default())
}

#[tokio::test]
async fn test_get_single() {
    let kv = backend();

    kv.set("Foo", "Bar", 30).await.unwrap();
    let pair = kv.get_val("Foo").await.unwrap();
    assert_eq!(pair.value, "Bar");
    assert!(!pair.has_children);

    kv.set("FooShortTTL", "Bar", 0).await.unwrap();
    assert_eq!(kv.get_val("FooShortTTL").await.unwrap().value, "Bar");

    let err = kv.get_val("FooFoo").await.unwrap_err();
    assert!(err.is_key_not_found());
}

#[tokio::test]
async fn test_ttl_zero_skips_lease() {
    let kv = backend();
    kv.set("plain", "v", 0).await.unwrap();
    assert_eq!(kv.client().lease_count(), 0);

    kv.set("leased", "v", 10).await.unwrap();
    assert_eq!(kv.client().lease_count(), 1);
    let stored = kv.client().kvs.lock().get(b"leased".as_slice()).cloned();
    assert_eq!(stored.unwrap().1, Some(LeaseId(1)));
}

#[tokio::test]
async fn test_get_multiple() {
    let kv = backend();
    kv.set("Foo/1", "Bar/1", 30).await.unwrap();
    kv.set("Foo/2", "Bar/2", 30).await.unwrap();
    kv.set("Foo/3", "Bar/3", 30).await.unwrap();
    kv.set("Other/1", "x", 0).await.unwrap();

    let pairs = kv.get_list("Foo/", true).await.unwrap();
    assert_eq!(pairs.len(), 3);
    assert_eq!(pairs[0].key, "Foo/1");
    assert_eq!(pairs[2].value, "Bar/3");
    assert!(pairs.iter().all(|kv| !kv.has_children));
}

#[tokio::test]
async fn test_get_list_absent_prefix() {
    let kv = backend();
    let err = kv.get_list("nothing/", false).await.unwrap_err();
    assert!(err.is_key_not_found());
}

#[tokio::test]
async fn test_failed_put_revokes_lease() {
    let kv = backend();
    kv.client().fail_put("doomed");

    let err = kv.set("doomed", "v", 30).await.unwrap_err();
    // The caller sees the write failure, not a lease error.
    assert!(matches!(err, Error::Backend { code: 9, .. }));
    assert_eq!(kv.client().lease_count(), 0);

    // The granted lease can no longer back a write.
    let err = kv
        .client()
        .put(b"other", b"v", Some(LeaseId(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LeaseNotFound { id: LeaseId(1) }));
}

#[tokio::test]
async fn test_failed_revoke_still_returns_put_error() {
    let kv = backend();
    kv.client().fail_put("doomed");
    kv.client().fail_revoke.store(true, Ordering::SeqCst);

    let err = kv.set("doomed", "v", 30).await.unwrap_err();
    assert!(matches!(err, Error::Backend { code: 9, .. }));
    // Orphaned until it expires.
    assert_eq!(kv.client().lease_count(), 1);
}

#[tokio::test]
async fn test_grant_failure_is_returned() {
    let kv = backend();
    kv.client().fail_grant.store(true, Ordering::SeqCst);

    let err = kv.set("k", "v", 5).await.unwrap_err();
    assert!(err.is_connectivity());
    assert!(kv.client().kvs.lock().is_empty());
}

#[tokio::test]
async fn test_cancelled_read_is_not_key_not_found() {
    let kv = backend();
    kv.set("k", "v", 0).await.unwrap();
    kv.client().cancel_reads.store(true, Ordering::SeqCst);

    let err = kv.get_val("k").await.unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert!(!err.is_key_not_found());
}

#[tokio::test]
async fn test_closed_client() {
    let kv = backend();
    kv.set("k", "v", 0).await.unwrap();
    kv.close().await;

    let err = kv.get_val("k").await.unwrap_err();
    assert!(matches!(err, Error::ClientClosed));
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn test_del_single() {
    let kv = backend();

    let err = kv.delete("Foo").await.unwrap_err();
    assert!(err.is_key_not_found());

    kv.set("Foo", "Bar", 30).await.unwrap();
    kv.delete("Foo").await.unwrap();
    assert!(kv.get_val("Foo").await.unwrap_err().is_key_not_found());
}

#[tokio::test]
async fn test_del_multiple() {
    let kv = backend();
    kv.set("/DelMult/Foo/1", "Bar/1", 30).await.unwrap();
    kv.set("/DelMult/Foo/2", "Bar/2", 30).await.unwrap();
    kv.set("/DelMult/Foo/3", "Bar/3", 30).await.unwrap();
    kv.set("/Keep/1", "x", 0).await.unwrap();

    assert_eq!(kv.get_list("/DelMult", false).await.unwrap().len(), 3);

    let deleted = kv.delete_list("/DelMult").await.unwrap();
    assert_eq!(deleted, 3);
    assert!(kv.get_list("/DelMult", false).await.unwrap_err().is_key_not_found());
    assert_eq!(kv.get_val("/Keep/1").await.unwrap().value, "x");

    let err = kv.delete_list("/DelMult").await.unwrap_err();
    assert!(err.is_key_not_found());
}
