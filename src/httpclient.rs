//! HTTP client with status-based retries and exponential backoff.
//!
//! Not used by the KV layer, which never retries on its own. Services that
//! call plain HTTP APIs next to the store use this instead.
//!
//! # Example
//!
//! ```rust,ignore
//! use coordkv::httpclient::HttpClientConfig;
//!
//! let client = HttpClientConfig { num_try: 3, ..Default::default() }.client()?;
//! let response = client.get("https://example.com/health").await?;
//! ```

use crate::constants;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Proxy, Request, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Scheme used by callers building URLs, e.g. `https`.
    pub protocol: String,
    /// Skip TLS certificate verification.
    pub allow_unverified_tls: bool,
    /// Retries after the first attempt for 5xx responses. `0` disables retry.
    pub num_try: usize,
    /// Explicit proxy. Empty means "take it from the environment".
    pub proxy_url: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            protocol: "https".to_string(),
            allow_unverified_tls: false,
            num_try: 0,
            proxy_url: String::new(),
        }
    }
}

impl HttpClientConfig {
    /// Client for regular requests, bounded by a 10 s timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy URL is invalid or the TLS backend
    /// cannot be initialized.
    pub fn client(&self) -> reqwest::Result<RetryingClient> {
        self.build(Some(Duration::from_secs(constants::HTTP_CLIENT_TIMEOUT_SECS)))
    }

    /// Client for server-sent events: same settings, no timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy URL is invalid or the TLS backend
    /// cannot be initialized.
    pub fn sse_client(&self) -> reqwest::Result<RetryingClient> {
        self.build(None)
    }

    fn build(&self, timeout: Option<Duration>) -> reqwest::Result<RetryingClient> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if self.allow_unverified_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        // reqwest reads HTTP(S)_PROXY itself unless told otherwise.
        if !self.proxy_url.is_empty() {
            builder = builder.proxy(Proxy::all(&self.proxy_url)?);
        }

        Ok(RetryingClient {
            inner: builder.build()?,
            num_try: self.num_try,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_secs(constants::HTTP_MAX_BACKOFF_SECS),
        })
    }
}

/// Why an attempt ended.
enum Attempt {
    /// 5xx status; worth another try. Carries the response in case it is the last.
    Retryable(Response),
    Failed(reqwest::Error),
}

/// `reqwest::Client` that retries 5xx responses with jittered backoff.
///
/// Transport errors are returned immediately. When retries run out, the
/// last 5xx response is returned as `Ok` so callers can inspect it.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    inner: reqwest::Client,
    num_try: usize,
    min_delay: Duration,
    max_delay: Duration,
}

impl RetryingClient {
    /// The wrapped client, for requests that must not be retried.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    #[must_use]
    pub const fn with_backoff(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    /// `GET url` with retries.
    ///
    /// # Errors
    ///
    /// Returns the transport error if a request could not be sent.
    pub async fn get(&self, url: &str) -> reqwest::Result<Response> {
        let request = self.inner.get(url).build()?;
        self.execute(request).await
    }

    /// Sends `request`, retrying on 5xx.
    ///
    /// Requests with streaming bodies cannot be cloned and are sent once.
    ///
    /// # Errors
    ///
    /// Returns the transport error if a request could not be sent.
    pub async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        let Some(template) = request.try_clone() else {
            debug!(url = %request.url(), "request body not cloneable, sending once");
            return self.inner.execute(request).await;
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.num_try)
            .with_jitter();

        let attempt = || async {
            // try_clone succeeded above, so it succeeds for every copy.
            let request = template.try_clone().expect("request body is cloneable");
            match self.inner.execute(request).await {
                Ok(response) if response.status().is_server_error() => {
                    Err(Attempt::Retryable(response))
                },
                Ok(response) => Ok(response),
                Err(e) => Err(Attempt::Failed(e)),
            }
        };

        let url = template.url().clone();
        let result = attempt
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(|a| matches!(a, Attempt::Retryable(_)))
            .notify(|a, dur| {
                if let Attempt::Retryable(response) = a {
                    warn!(
                        url = %url,
                        status = %response.status(),
                        next_delay = ?dur,
                        "server error, will retry"
                    );
                }
            })
            .await;

        match result {
            Ok(response) | Err(Attempt::Retryable(response)) => Ok(response),
            Err(Attempt::Failed(e)) => Err(e),
        }
    }
}
