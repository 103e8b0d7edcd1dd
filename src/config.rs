//! Configuration types for coordkv.
//!
//! This module loads and validates `coordkv.toml`:
//!
//! - [`Config`] - Root configuration struct
//! - [`StoreConfig`] - Backend selection and connection settings
//! - [`LoggingConfig`] - Log level and output format
//! - [`HttpClientConfig`] - Retrying HTTP client settings
//!
//! Every section is optional and falls back to defaults suitable for a
//! local etcd.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::constants;
use crate::httpclient::HttpClientConfig;
use crate::kv::{BackendKind, ConnectOptions};

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// coordkv.toml configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub http: HttpClientConfig,
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub endpoints: Vec<String>,
    pub username: String,
    pub password: String,
    pub dial_timeout_secs: u64,
    /// `0` leaves requests unbounded.
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::EtcdV3,
            endpoints: vec![constants::DEFAULT_ENDPOINT.to_string()],
            username: String::new(),
            password: String::new(),
            dial_timeout_secs: constants::DEFAULT_DIAL_TIMEOUT_SECS,
            request_timeout_secs: 0,
        }
    }
}

impl StoreConfig {
    /// Connection options for [`crate::kv::KvStore::connect`].
    pub fn connect_options(&self) -> ConnectOptions {
        let request_timeout =
            (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs));
        ConnectOptions::new(&self.endpoints)
            .with_credentials(&self.username, &self.password)
            .with_dial_timeout(Duration::from_secs(self.dial_timeout_secs))
            .with_request_timeout(request_timeout)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load configuration from coordkv.toml in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if coordkv.toml cannot be read or contains invalid TOML.
    pub fn load() -> Result<Self> {
        Self::load_from(constants::CONFIG_FILE)
    }

    /// Load configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - Fields have invalid types or unknown enum values
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error listing every problem found:
    /// - No endpoints for a network backend
    /// - Endpoints that are not `http`/`https` URLs
    /// - Zero dial timeout
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Store
        let store = &self.store;
        if store.backend != BackendKind::Memory {
            if store.endpoints.is_empty() {
                errors.push(format!(
                    "store.endpoints cannot be empty for backend '{}'\n  \
                     Example: endpoints = [\"{}\"]",
                    store.backend,
                    constants::DEFAULT_ENDPOINT
                ));
            }

            for endpoint in &store.endpoints {
                match Url::parse(endpoint) {
                    Ok(url) if matches!(url.scheme(), "http" | "https") => {
                        if url.scheme() == "http" && !store.password.is_empty() {
                            warnings.push(format!(
                                "Password will be sent in plaintext to {endpoint}\n  \
                                 Recommendation: use an https:// endpoint"
                            ));
                        }
                    },
                    Ok(url) => errors.push(format!(
                        "Unsupported scheme '{}' in endpoint '{endpoint}' (expected http or https)",
                        url.scheme()
                    )),
                    Err(e) => errors.push(format!("Invalid endpoint '{endpoint}': {e}")),
                }
            }

            if store.dial_timeout_secs == 0 {
                errors.push("store.dial_timeout_secs cannot be 0 (default: 5)".to_string());
            }
        } else if !store.username.is_empty() {
            warnings.push("store.username is ignored by the memory backend".to_string());
        }

        // 2. HTTP client
        if self.http.num_try > constants::HTTP_NUM_TRY_WARN_THRESHOLD {
            warnings.push(format!(
                "http.num_try {} is very high (> {})\n  \
                 Backoff is capped at {}s per retry, so requests may hang for a long time",
                self.http.num_try,
                constants::HTTP_NUM_TRY_WARN_THRESHOLD,
                constants::HTTP_MAX_BACKOFF_SECS
            ));
        }
        if self.http.allow_unverified_tls {
            warnings.push("http.allow_unverified_tls disables certificate checks".to_string());
        }

        // Return errors if any
        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(ValidationResult { warnings })
    }
}
