//! etcd v2 (legacy protocol) backend.
//!
//! Talks to the `/v2/keys` HTTP API. TTLs travel on the write itself, so no
//! lease bookkeeping is needed.

use super::backend::KvBackend;
use super::error::{Error, Result};
use super::types::{ConnectOptions, Credentials, KeyValue, SEPARATOR};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

const BACKEND: &str = "etcd-v2";

/// etcd v2 error code for "Key not found".
const ERROR_KEY_NOT_FOUND: i64 = 100;

/// Node as returned by the v2 keys API.
#[derive(Debug, Deserialize)]
struct Node {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct KeysResponse {
    node: Node,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "errorCode")]
    error_code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: Option<String>,
}

/// etcd v2 driver over the HTTP keys API.
///
/// Requests go to the first endpoint. When an endpoint cannot be reached the
/// next one is tried; each endpoint is contacted at most once per call.
pub struct EtcdV2Backend {
    client: reqwest::Client,
    endpoints: Vec<Url>,
    credentials: Option<Credentials>,
}

impl EtcdV2Backend {
    /// Builds the HTTP client for `options.endpoints`.
    ///
    /// No request is made here; an unreachable cluster shows up on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionFailed`] when the endpoint list is empty,
    /// an endpoint is not an `http`/`https` URL, or the client cannot be built.
    pub fn connect(options: &ConnectOptions) -> Result<Self> {
        let endpoints = parse_endpoints(BACKEND, &options.endpoints)?;

        let mut builder = reqwest::Client::builder().connect_timeout(options.dial_timeout);
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::construction_failed(BACKEND, e.to_string()))?;

        debug!(endpoints = ?options.endpoints, "etcd v2 client ready");
        Ok(Self {
            client,
            endpoints,
            credentials: options.credentials.clone(),
        })
    }

    fn keys_url(base: &Url, key: &str) -> Result<Url> {
        let mut url = base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| Error::Protocol(format!("endpoint cannot be a base: {base}")))?;
            segments.pop_if_empty().push("v2").push("keys");
            segments.extend(key.trim_start_matches(SEPARATOR).split(SEPARATOR));
        }
        Ok(url)
    }

    /// Sends a request built by `build`, failing over across endpoints on
    /// connection errors only.
    async fn send<F>(&self, method: Method, key: &str, build: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let mut last_err = None;
        for endpoint in &self.endpoints {
            let url = Self::keys_url(endpoint, key)?;
            let mut request = self.client.request(method.clone(), url);
            if let Some(creds) = &self.credentials {
                request = request.basic_auth(&creds.username, Some(&creds.password));
            }

            match build(request).send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() => {
                    warn!(endpoint = %endpoint, error = %e, "etcd endpoint unreachable");
                    last_err = Some(e);
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(match last_err {
            Some(e) => Error::could_not_connect(e.to_string()),
            None => Error::could_not_connect("no endpoints configured"),
        })
    }

    async fn read(&self, key: &str, recursive: bool, sort: bool) -> Result<Node> {
        let response = self
            .send(Method::GET, key, |req| {
                if recursive {
                    req.query(&[("recursive", "true"), ("sorted", bool_str(sort))])
                } else {
                    req
                }
            })
            .await?;

        let body: KeysResponse = decode(key, response).await?;
        Ok(body.node)
    }
}

/// Parses and validates endpoint URLs.
pub(crate) fn parse_endpoints(backend: &'static str, endpoints: &[String]) -> Result<Vec<Url>> {
    if endpoints.is_empty() {
        return Err(Error::construction_failed(backend, "no endpoints given"));
    }

    endpoints
        .iter()
        .map(|raw| {
            let url = Url::parse(raw).map_err(|e| {
                Error::construction_failed(backend, format!("invalid endpoint '{raw}': {e}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::construction_failed(
                    backend,
                    format!("unsupported scheme in endpoint '{raw}'"),
                ));
            }
            Ok(url)
        })
        .collect()
}

const fn bool_str(b: bool) -> &'static str {
    if b { "true" } else { "false" }
}

/// Decodes a keys API response, mapping etcd error bodies.
async fn decode(key: &str, response: Response) -> Result<KeysResponse> {
    let status = response.status();
    let bytes = response.bytes().await?;

    if status.is_success() {
        return Ok(serde_json::from_slice(&bytes)?);
    }

    match serde_json::from_slice::<ApiError>(&bytes) {
        Ok(api) if api.error_code == ERROR_KEY_NOT_FOUND => Err(Error::key_not_found(key)),
        Ok(api) => Err(Error::Backend {
            code: api.error_code,
            message: match api.cause {
                Some(cause) => format!("{} ({cause})", api.message),
                None => api.message,
            },
        }),
        Err(_) if status == StatusCode::NOT_FOUND => Err(Error::key_not_found(key)),
        Err(_) => Err(Error::Backend {
            code: i64::from(status.as_u16()),
            message: String::from_utf8_lossy(&bytes).into_owned(),
        }),
    }
}

/// Direct children of a directory node; nested directories stay collapsed.
fn children(nodes: Vec<Node>) -> Vec<KeyValue> {
    nodes
        .into_iter()
        .map(|node| KeyValue::new(node.key, node.value.unwrap_or_default(), node.dir))
        .collect()
}

#[async_trait]
impl KvBackend for EtcdV2Backend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        let ttl_str = ttl.to_string();
        let response = self
            .send(Method::PUT, key, |req| {
                if ttl > 0 {
                    req.form(&[("value", value), ("ttl", ttl_str.as_str())])
                } else {
                    req.form(&[("value", value)])
                }
            })
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "could not set key in etcd"))?;

        decode(key, response)
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "could not set key in etcd"))?;
        Ok(())
    }

    async fn get_val(&self, key: &str) -> Result<KeyValue> {
        let node = self.read(key, false, false).await.inspect_err(|e| {
            if !e.is_key_not_found() {
                warn!(key = %key, error = %e, "could not retrieve key from etcd");
            }
        })?;

        Ok(KeyValue::new(key, node.value.unwrap_or_default(), node.dir))
    }

    async fn get_list(&self, key: &str, sort: bool) -> Result<Vec<KeyValue>> {
        let node = self.read(key, true, sort).await.inspect_err(|e| {
            if !e.is_key_not_found() {
                warn!(key = %key, error = %e, "could not list key from etcd");
            }
        })?;

        Ok(children(node.nodes))
    }
}
