//! Client seam for the etcd v3 driver and its JSON gateway implementation.
//!
//! The driver only needs a handful of RPCs. [`V3Client`] names them so the
//! lease lifecycle can be exercised against an in-process fake; the real
//! implementation, [`GatewayClient`], speaks the JSON gateway that etcd
//! serves next to gRPC on its client port.

use crate::kv::error::{Error, Result};
use crate::kv::etcd_v2::parse_endpoints;
use crate::kv::types::{ConnectOptions, Lease, LeaseId};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use url::Url;

const BACKEND: &str = "etcd-v3";

// gRPC status codes surfaced in gateway error bodies.
const GRPC_CANCELLED: i64 = 1;
const GRPC_NOT_FOUND: i64 = 5;
const GRPC_UNAVAILABLE: i64 = 14;
const GRPC_UNAUTHENTICATED: i64 = 16;

/// A raw key-value pair returned by a range request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawKv {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub lease: Option<LeaseId>,
}

/// Range/delete selector.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeOptions {
    /// Match every key starting with the given key.
    pub prefix: bool,
    /// Ascending key order.
    pub sort: bool,
}

/// The etcd v3 RPCs used by the driver.
#[async_trait]
pub trait V3Client: Send + Sync + 'static {
    /// Grants a lease living `ttl` seconds.
    async fn grant(&self, ttl: i64) -> Result<Lease>;

    /// Revokes a lease, deleting every key attached to it.
    async fn revoke(&self, id: LeaseId) -> Result<()>;

    /// Writes `key = value`, attached to `lease` when given.
    async fn put(&self, key: &[u8], value: &[u8], lease: Option<LeaseId>) -> Result<()>;

    /// Reads `key`, or every key under it when `options.prefix`.
    async fn range(&self, key: &[u8], options: RangeOptions) -> Result<Vec<RawKv>>;

    /// Deletes `key`, or every key under it; returns the deleted count.
    async fn delete_range(&self, key: &[u8], options: RangeOptions) -> Result<u64>;

    /// Closes the client. Later calls fail with [`Error::ClientClosed`].
    async fn close(&self);
}

/// The smallest key greater than every key starting with `prefix`.
///
/// An empty prefix selects the whole keyspace (`\0`).
pub fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

// --- gateway wire types -----------------------------------------------------

fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn unb64(field: &str, encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| Error::Protocol(format!("invalid base64 in {field}: {e}")))
}

/// int64 fields are rendered as JSON strings by the gateway.
fn de_i64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Str(String),
        Num(i64),
    }
    match Repr::deserialize(d)? {
        Repr::Num(n) => Ok(n),
        Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    name: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Serialize)]
struct GrantRequest {
    #[serde(rename = "TTL")]
    ttl: i64,
}

#[derive(Deserialize)]
struct GrantResponse {
    #[serde(rename = "ID", deserialize_with = "de_i64")]
    id: i64,
    #[serde(rename = "TTL", deserialize_with = "de_i64")]
    ttl: i64,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct RevokeRequest {
    #[serde(rename = "ID")]
    id: i64,
}

#[derive(Serialize)]
struct PutRequest {
    key: String,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    lease: Option<i64>,
}

#[derive(Serialize)]
struct RangeRequest {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    range_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort_order: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort_target: Option<&'static str>,
}

#[derive(Deserialize)]
struct WireKv {
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default, deserialize_with = "de_i64")]
    lease: i64,
}

#[derive(Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<WireKv>,
}

#[derive(Deserialize)]
struct DeleteRangeResponse {
    #[serde(default, deserialize_with = "de_i64")]
    deleted: i64,
}

#[derive(Deserialize)]
struct GatewayError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: String,
}

/// Turns a gateway error body into the portable taxonomy.
pub(crate) fn map_gateway_error(code: i64, message: String, lease: Option<LeaseId>) -> Error {
    if code == GRPC_CANCELLED {
        return Error::Cancelled(message);
    }
    if code == GRPC_UNAVAILABLE {
        return Error::could_not_connect(message);
    }
    if code == GRPC_UNAUTHENTICATED {
        return Error::Unauthenticated(message);
    }
    if code == GRPC_NOT_FOUND
        && message.contains("lease not found")
        && let Some(id) = lease
    {
        return Error::LeaseNotFound { id };
    }
    Error::Backend { code, message }
}

// --- client -----------------------------------------------------------------

/// [`V3Client`] over etcd's JSON gateway (`POST /v3/...`).
///
/// Like the v2 driver, a call moves on to the next endpoint only when the
/// current one cannot be reached.
///
/// The auth token is obtained once, in [`GatewayClient::connect`], and is
/// not refreshed. etcd expires simple tokens (300 s by default); after that
/// every call fails with [`Error::Unauthenticated`] and the store has to be
/// rebuilt.
pub struct GatewayClient {
    http: reqwest::Client,
    endpoints: Vec<Url>,
    token: Option<String>,
    closed: AtomicBool,
}

impl GatewayClient {
    /// Builds the client and, when credentials are given, exchanges them for
    /// an auth token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionFailed`] when the endpoints are invalid,
    /// the HTTP client cannot be built, or authentication is rejected.
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        let endpoints = parse_endpoints(BACKEND, &options.endpoints)?;

        let mut builder = reqwest::Client::builder().connect_timeout(options.dial_timeout);
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| Error::construction_failed(BACKEND, e.to_string()))?;

        let mut client = Self {
            http,
            endpoints,
            token: None,
            closed: AtomicBool::new(false),
        };

        if let Some(creds) = &options.credentials {
            let auth: AuthResponse = client
                .call(
                    "/v3/auth/authenticate",
                    &AuthRequest {
                        name: &creds.username,
                        password: &creds.password,
                    },
                    None,
                )
                .await
                .map_err(|e| Error::construction_failed(BACKEND, format!("authentication: {e}")))?;
            client.token = Some(auth.token);
        }

        Ok(client)
    }

    async fn send<Req>(&self, path: &str, body: &Req) -> Result<reqwest::Response>
    where
        Req: Serialize + Sync,
    {
        let mut last_err = None;
        for endpoint in &self.endpoints {
            let url = endpoint
                .join(path)
                .map_err(|e| Error::Protocol(e.to_string()))?;
            let mut request = self.http.post(url).json(body);
            if let Some(token) = &self.token {
                request = request.header(AUTHORIZATION, token.as_str());
            }

            match request.send().await {
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

    async fn call<Req, Resp>(&self, path: &str, body: &Req, lease: Option<LeaseId>) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ClientClosed);
        }

        let response = self.send(path, body).await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            return Ok(serde_json::from_slice(&bytes)?);
        }

        match serde_json::from_slice::<GatewayError>(&bytes) {
            Ok(err) => {
                let message = if err.message.is_empty() {
                    err.error
                } else {
                    err.message
                };
                Err(map_gateway_error(err.code, message, lease))
            },
            Err(_) => Err(Error::Backend {
                code: i64::from(status.as_u16()),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            }),
        }
    }
}

fn range_request(key: &[u8], options: RangeOptions) -> RangeRequest {
    RangeRequest {
        key: b64(key),
        range_end: options.prefix.then(|| b64(&prefix_range_end(key))),
        sort_order: options.sort.then_some("ASCEND"),
        sort_target: options.sort.then_some("KEY"),
    }
}

#[async_trait]
impl V3Client for GatewayClient {
    async fn grant(&self, ttl: i64) -> Result<Lease> {
        let resp: GrantResponse = self
            .call("/v3/lease/grant", &GrantRequest { ttl }, None)
            .await?;
        if let Some(message) = resp.error.filter(|m| !m.is_empty()) {
            return Err(Error::Backend { code: 0, message });
        }
        Ok(Lease {
            id: LeaseId(resp.id),
            ttl: resp.ttl,
        })
    }

    async fn revoke(&self, id: LeaseId) -> Result<()> {
        let _: serde_json::Value = self
            .call("/v3/lease/revoke", &RevokeRequest { id: id.0 }, Some(id))
            .await?;
        Ok(())
    }

    async fn put(&self, key: &[u8], value: &[u8], lease: Option<LeaseId>) -> Result<()> {
        let body = PutRequest {
            key: b64(key),
            value: b64(value),
            lease: lease.map(|id| id.0),
        };
        let _: serde_json::Value = self.call("/v3/kv/put", &body, lease).await?;
        Ok(())
    }

    async fn range(&self, key: &[u8], options: RangeOptions) -> Result<Vec<RawKv>> {
        let resp: RangeResponse = self
            .call("/v3/kv/range", &range_request(key, options), None)
            .await?;

        resp.kvs
            .into_iter()
            .map(|kv| {
                Ok(RawKv {
                    key: unb64("key", &kv.key)?,
                    value: unb64("value", &kv.value)?,
                    lease: (kv.lease != 0).then_some(LeaseId(kv.lease)),
                })
            })
            .collect()
    }

    async fn delete_range(&self, key: &[u8], options: RangeOptions) -> Result<u64> {
        let body = RangeRequest {
            sort_order: None,
            sort_target: None,
            ..range_request(key, options)
        };
        let resp: DeleteRangeResponse = self.call("/v3/kv/deleterange", &body, None).await?;
        u64::try_from(resp.deleted)
            .map_err(|_| Error::Protocol(format!("negative deleted count {}", resp.deleted)))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(endpoints = self.endpoints.len(), "etcd v3 client closed");
        } else {
            warn!("etcd v3 client closed twice");
        }
    }
}
