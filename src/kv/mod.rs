//! Hierarchical key-value layer with pluggable coordination-store backends.
//!
//! Callers talk to a [`KvStore`]; the driver underneath is chosen with a
//! [`BackendKind`]:
//!
//! - **MemoryBackend**: in-process simulation of directory semantics (tests)
//! - **EtcdV2Backend**: etcd v2 keys API, TTL carried on the write
//! - **EtcdV3Backend**: etcd v3 with lease-backed TTLs and prefix delete
//!
//! All of them report failures through the same [`Error`] taxonomy.
//!
//! # Example
//!
//! ```ignore
//! use coordkv::kv::{BackendKind, KvStore};
//!
//! // In-memory (testing)
//! let store = KvStore::memory();
//! store.set("parent/child1", "child1val", 0).await?;
//! assert_eq!(store.get_list("parent/", false).await?.len(), 1);
//!
//! // etcd v3
//! let servers = vec!["http://localhost:2379".to_string()];
//! let store = KvStore::open_with_auth(&servers, BackendKind::EtcdV3, "root", "secret").await?;
//! ```
//!
//! # Custom Backends
//!
//! Implement the `KvBackend` trait and wrap it with [`KvStore::custom`].

mod backend;
mod error;
mod etcd_v2;
mod etcd_v3;
mod memory;
mod store;
mod types;


// Re-export the public API
pub use backend::KvBackend;
pub use error::{Error, Result};
pub use etcd_v2::EtcdV2Backend;
pub use etcd_v3::{EtcdV3Backend, GatewayClient, RangeOptions, RawKv, V3Client, prefix_range_end};
pub use memory::MemoryBackend;
pub use store::{BackendKind, KvStore};
pub use types::{ConnectOptions, Credentials, KeyValue, Lease, LeaseId, SEPARATOR};
