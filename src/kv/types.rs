//! Value types exchanged with every backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Path separator for hierarchical keys.
pub const SEPARATOR: char = '/';

/// The unit returned by queries to a key-value store.
///
/// A `KeyValue` is a snapshot taken at read time. It holds no reference to
/// the store it came from and is never refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// `/`-delimited path.
    pub key: String,
    pub value: String,
    /// True when at least one other key lives under `key/`.
    pub has_children: bool,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>, has_children: bool) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            has_children,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {} : {}", self.key, self.value, self.has_children)
    }
}

/// Opaque lease handle issued by a lease-protocol store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A granted lease. Keys attached to it expire with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub id: LeaseId,
    /// Remaining life in seconds as reported by the store.
    pub ttl: i64,
}

/// Username/password pair for stores with authentication enabled.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Builds credentials, returning `None` when `username` is empty.
    pub fn from_parts(username: &str, password: &str) -> Option<Self> {
        if username.is_empty() {
            None
        } else {
            Some(Self {
                username: username.to_string(),
                password: password.to_string(),
            })
        }
    }
}

// Keep passwords out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Settings shared by the network drivers.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Server endpoints, e.g. `http://localhost:2379`.
    pub endpoints: Vec<String>,
    pub credentials: Option<Credentials>,
    /// Time allowed to establish a connection.
    pub dial_timeout: Duration,
    /// Whole-request timeout. `None` leaves requests unbounded.
    pub request_timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn new(endpoints: &[String]) -> Self {
        Self {
            endpoints: endpoints.to_vec(),
            credentials: None,
            dial_timeout: Duration::from_secs(crate::constants::DEFAULT_DIAL_TIMEOUT_SECS),
            request_timeout: None,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Credentials::from_parts(username, password);
        self
    }

    #[must_use]
    pub const fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }
}
