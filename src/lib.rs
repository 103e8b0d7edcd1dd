//! coordkv - hierarchical key-value client for coordination stores.
//!
//! The [`kv`] module is the core: a [`kv::KvStore`] handle over etcd v2,
//! etcd v3 or an in-memory simulation, with one error taxonomy for all of
//! them. [`httpclient`] is a retrying HTTP client for services that live
//! next to the store.

pub mod config;
pub mod constants;
pub mod httpclient;
pub mod kv;
pub mod logging;
