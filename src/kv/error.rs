//! Portable error taxonomy for KV backends.
//!
//! Every driver normalizes its native failures into [`Error`] wherever the
//! underlying protocol lets it tell them apart. The two canonical kinds are
//! [`Error::KeyNotFound`] and [`Error::CouldNotConnect`]; callers must not
//! assume those two cover everything.

use super::types::LeaseId;

/// Result type for KV operations.
pub type Result<T> = std::result::Result<T, Error>;

/// KV errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The key (or prefix, for list/delete) has no matching entries.
    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    /// The store could not be reached.
    #[error("could not connect to KV store: {reason}")]
    CouldNotConnect { reason: String },

    /// Client setup failed. Returned instead of a usable store.
    #[error("failed to construct {backend} client: {reason}")]
    ConstructionFailed {
        backend: &'static str,
        reason: String,
    },

    /// The store or transport cancelled the operation.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// The client was closed before or during the call.
    #[error("client connection closed")]
    ClientClosed,

    /// The auth token was rejected, usually because it expired.
    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    /// The lease is unknown, expired or revoked.
    #[error("lease {id} not found")]
    LeaseNotFound { id: LeaseId },

    /// The backend does not implement the operation.
    #[error("{backend} backend does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// Store-specific failure passed through untranslated.
    #[error("store error {code}: {message}")]
    Backend { code: i64, message: String },

    /// The store answered with something we could not decode.
    #[error("malformed response: {0}")]
    Protocol(String),
}

impl Error {
    /// Create a key not found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Create a could not connect error.
    pub fn could_not_connect(reason: impl Into<String>) -> Self {
        Self::CouldNotConnect {
            reason: reason.into(),
        }
    }

    /// Create a construction failure for `backend`.
    pub fn construction_failed(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::ConstructionFailed {
            backend,
            reason: reason.into(),
        }
    }

    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }

    /// True for failures a caller may retry once connectivity returns.
    /// Absence is never one of them.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::CouldNotConnect { .. } | Self::Cancelled(_) | Self::ClientClosed
        )
    }

    /// True when the store no longer accepts the client's credentials and
    /// the store must be reopened.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated(_))
    }
}

/// Classifies transport failures from `reqwest`.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::could_not_connect(err.to_string())
        } else if err.is_decode() || err.is_body() {
            Self::Protocol(err.to_string())
        } else {
            Self::could_not_connect(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
