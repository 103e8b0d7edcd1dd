//! In-memory KV simulation backend.
//!
//! Reproduces the directory semantics of a hierarchical coordination store
//! on top of a flat map, for tests and as a reference implementation.

use super::backend::KvBackend;
use super::error::{Error, Result};
use super::types::{KeyValue, SEPARATOR};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type Entries = HashMap<String, Vec<KeyValue>>;

/// In-memory hierarchical key-value backend.
///
/// Each map key holds the sequence of entries recorded for it, most recent
/// last. Writing `a/b/c` appends a directory entry for `a/b` to the list at
/// `a/`, a directory entry for `a/b/c` to the list at `a/b/`, and the leaf
/// itself to the list at `a/b/c`. Reads return the last recorded entry, so
/// the most recent write wins.
///
/// # Thread Safety
///
/// `MemoryBackend` is `Clone`; clones share one map. Every operation holds
/// the mutex for its whole sequence, so readers never see a leaf whose
/// parent directories are not yet recorded.
///
/// TTLs are accepted and ignored: entries never expire.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<Entries>>,
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct map keys, directories included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Clears all entries from the store.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Records `key = value` and all of its ancestor directories.
fn record(entries: &mut Entries, key: &str, value: &str) {
    let segments: Vec<&str> = key.split(SEPARATOR).collect();
    let last = segments.len() - 1;
    let mut prefix = String::with_capacity(key.len() + 1);
    let mut parent: Option<String> = None;

    for (i, segment) in segments.iter().enumerate() {
        prefix.push_str(segment);

        let dir_entry = KeyValue::new(prefix.as_str(), value, true);
        if let Some(parent) = &parent {
            entries.entry(parent.clone()).or_default().push(dir_entry);
        } else if i == last {
            // Single-segment key: the root list learns about it.
            entries.entry(String::new()).or_default().push(dir_entry);
        }

        if i == last {
            entries
                .entry(prefix.clone())
                .or_default()
                .push(KeyValue::new(prefix.as_str(), value, false));
        }

        prefix.push(SEPARATOR);
        parent = Some(prefix.clone());
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        debug!(key = %key, ttl = ttl, "memory set");
        let mut entries = self.entries.lock();
        record(&mut entries, key, value);
        Ok(())
    }

    async fn get_val(&self, key: &str) -> Result<KeyValue> {
        let entries = self.entries.lock();

        // `a` names the directory recorded under `a/`.
        let children = if key.is_empty() || key.ends_with(SEPARATOR) {
            None
        } else {
            entries
                .get(&format!("{key}{SEPARATOR}"))
                .and_then(|list| list.last())
        };

        match (entries.get(key).and_then(|list| list.last()), children) {
            // A leaf that later gained descendants is a directory now.
            (Some(kv), Some(_)) if kv.key == key => {
                Ok(KeyValue::new(key, kv.value.as_str(), true))
            },
            (Some(kv), _) => Ok(kv.clone()),
            (None, Some(child)) => Ok(KeyValue::new(key, child.value.as_str(), true)),
            (None, None) => Err(Error::key_not_found(key)),
        }
    }

    async fn get_list(&self, key: &str, sort: bool) -> Result<Vec<KeyValue>> {
        let entries = self.entries.lock();
        let mut list = match entries.get(key) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return Err(Error::key_not_found(key)),
        };
        drop(entries);

        if sort {
            list.sort_by(|a, b| a.key.cmp(&b.key));
        }
        Ok(list)
    }
}
