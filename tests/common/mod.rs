//! Fake etcd servers for integration tests.
//!
//! Both fakes listen on an ephemeral localhost port and keep their keyspace
//! in memory. They implement just enough of the real APIs for the drivers.

#![allow(dead_code)]

use axum::Router;
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// An endpoint nothing listens on.
pub const DEAD_ENDPOINT: &str = "http://127.0.0.1:1";

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to read local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server failed");
    });
    format!("http://{addr}")
}

// =============================================================================
// etcd v2 keys API
// =============================================================================

#[derive(Default)]
pub struct V2State {
    /// Leaf keys (with leading `/`) to values.
    pub leaves: BTreeMap<String, String>,
    /// TTL received with each write, if any.
    pub ttls: HashMap<String, String>,
    /// Basic-auth headers seen.
    pub auth_headers: Vec<String>,
}

pub type SharedV2 = Arc<Mutex<V2State>>;

/// Starts a fake v2 server; returns its base URL and state.
pub async fn start_v2() -> (String, SharedV2) {
    let state = SharedV2::default();
    let app = Router::new()
        .route("/v2/keys/{*key}", get(v2_get).put(v2_put))
        .with_state(state.clone());
    (serve(app).await, state)
}

fn v2_normalize(key: &str) -> String {
    format!("/{}", key.trim_matches('/'))
}

fn v2_not_found(key: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(json!({"errorCode": 100, "message": "Key not found", "cause": key, "index": 1})),
    )
        .into_response()
}

fn v2_dir(leaves: &BTreeMap<String, String>, dir: &str, recursive: bool) -> Value {
    let prefix = format!("{dir}/");
    let mut children: BTreeMap<String, bool> = BTreeMap::new();
    for key in leaves.keys().filter(|k| k.starts_with(&prefix)) {
        let rest = &key[prefix.len()..];
        let (segment, is_dir) = match rest.split_once('/') {
            Some((segment, _)) => (segment, true),
            None => (rest, false),
        };
        children.insert(format!("{prefix}{segment}"), is_dir);
    }

    let nodes: Vec<Value> = children
        .into_iter()
        .map(|(key, is_dir)| {
            if is_dir {
                if recursive {
                    v2_dir(leaves, &key, true)
                } else {
                    json!({"key": key, "dir": true})
                }
            } else {
                json!({"key": key, "value": leaves[&key]})
            }
        })
        .collect();

    json!({"key": dir, "dir": true, "nodes": nodes})
}

async fn v2_get(
    State(state): State<SharedV2>,
    Path(key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut state = state.lock().unwrap();
    if let Some(auth) = headers.get("authorization") {
        state.auth_headers.push(auth.to_str().unwrap().to_string());
    }

    let key = v2_normalize(&key);
    let recursive = query.get("recursive").is_some_and(|v| v == "true");

    if let Some(value) = state.leaves.get(&key) {
        return axum::Json(json!({"action": "get", "node": {"key": key, "value": value}}))
            .into_response();
    }

    let prefix = format!("{key}/");
    if state.leaves.keys().any(|k| k.starts_with(&prefix)) {
        let node = v2_dir(&state.leaves, &key, recursive);
        return axum::Json(json!({"action": "get", "node": node})).into_response();
    }

    v2_not_found(&key)
}

async fn v2_put(
    State(state): State<SharedV2>,
    Path(key): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut state = state.lock().unwrap();
    let key = v2_normalize(&key);
    let value = form.get("value").cloned().unwrap_or_default();

    if let Some(ttl) = form.get("ttl") {
        state.ttls.insert(key.clone(), ttl.clone());
    }
    state.leaves.insert(key.clone(), value.clone());

    (
        StatusCode::CREATED,
        axum::Json(json!({"action": "set", "node": {"key": key, "value": value}})),
    )
        .into_response()
}

// =============================================================================
// etcd v3 JSON gateway
// =============================================================================

#[derive(Default)]
pub struct V3State {
    pub kvs: BTreeMap<Vec<u8>, (Vec<u8>, i64)>,
    pub leases: HashMap<i64, i64>,
    pub next_lease: i64,
    /// Puts to these keys are rejected with PERMISSION_DENIED.
    pub deny_puts: HashSet<Vec<u8>>,
    /// Range requests are answered with CANCELLED.
    pub cancel_ranges: bool,
    pub revoked: Vec<i64>,
    /// Accepted username/password.
    pub user: Option<(String, String)>,
    /// Previously issued tokens are no longer accepted.
    pub expire_tokens: bool,
}

pub type SharedV3 = Arc<Mutex<V3State>>;

const TOKEN: &str = "fake-token";

/// Starts a fake v3 gateway; returns its base URL and state.
pub async fn start_v3() -> (String, SharedV3) {
    let state = SharedV3::default();
    let app = Router::new()
        .route("/v3/auth/authenticate", post(v3_auth))
        .route("/v3/lease/grant", post(v3_grant))
        .route("/v3/lease/revoke", post(v3_revoke))
        .route("/v3/kv/put", post(v3_put))
        .route("/v3/kv/range", post(v3_range))
        .route("/v3/kv/deleterange", post(v3_delete_range))
        .with_state(state.clone());
    (serve(app).await, state)
}

fn grpc_error(status: StatusCode, code: i64, message: &str) -> Response {
    (
        status,
        axum::Json(json!({"error": message, "code": code, "message": message})),
    )
        .into_response()
}

fn decode(body: &Value, field: &str) -> Option<Vec<u8>> {
    body.get(field)
        .and_then(Value::as_str)
        .map(|s| STANDARD.decode(s).expect("test client sent bad base64"))
}

fn int_field(body: &Value, field: &str) -> i64 {
    match body.get(field) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}

fn authorized(state: &V3State, headers: &HeaderMap) -> bool {
    state.user.is_none()
        || (!state.expire_tokens
            && headers
                .get("authorization")
                .is_some_and(|v| v.to_str().ok() == Some(TOKEN)))
}

fn in_range(key: &[u8], start: &[u8], end: Option<&[u8]>) -> bool {
    match end {
        None => key == start,
        Some([0]) => key >= start,
        Some(end) => key >= start && key < end,
    }
}

async fn v3_auth(State(state): State<SharedV3>, axum::Json(body): axum::Json<Value>) -> Response {
    let state = state.lock().unwrap();
    let name = body["name"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();
    match &state.user {
        Some((u, p)) if u == name && p == password => {
            axum::Json(json!({"header": {}, "token": TOKEN})).into_response()
        },
        _ => grpc_error(
            StatusCode::BAD_REQUEST,
            3,
            "etcdserver: authentication failed, invalid user ID or password",
        ),
    }
}

async fn v3_grant(
    State(state): State<SharedV3>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return grpc_error(StatusCode::UNAUTHORIZED, 16, "etcdserver: invalid auth token");
    }
    state.next_lease += 1;
    let id = state.next_lease;
    let ttl = int_field(&body, "TTL");
    state.leases.insert(id, ttl);
    axum::Json(json!({"header": {}, "ID": id.to_string(), "TTL": ttl.to_string()})).into_response()
}

async fn v3_revoke(
    State(state): State<SharedV3>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return grpc_error(StatusCode::UNAUTHORIZED, 16, "etcdserver: invalid auth token");
    }
    let id = int_field(&body, "ID");
    if state.leases.remove(&id).is_none() {
        return grpc_error(StatusCode::NOT_FOUND, 5, "etcdserver: requested lease not found");
    }
    state.revoked.push(id);
    state.kvs.retain(|_, (_, lease)| *lease != id);
    axum::Json(json!({"header": {}})).into_response()
}

async fn v3_put(
    State(state): State<SharedV3>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return grpc_error(StatusCode::UNAUTHORIZED, 16, "etcdserver: invalid auth token");
    }
    let key = decode(&body, "key").unwrap_or_default();
    let value = decode(&body, "value").unwrap_or_default();
    let lease = int_field(&body, "lease");

    if state.deny_puts.contains(&key) {
        return grpc_error(StatusCode::FORBIDDEN, 7, "etcdserver: permission denied");
    }
    if lease != 0 && !state.leases.contains_key(&lease) {
        return grpc_error(StatusCode::NOT_FOUND, 5, "etcdserver: requested lease not found");
    }
    state.kvs.insert(key, (value, lease));
    axum::Json(json!({"header": {"revision": "2"}})).into_response()
}

async fn v3_range(
    State(state): State<SharedV3>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return grpc_error(StatusCode::UNAUTHORIZED, 16, "etcdserver: invalid auth token");
    }
    if state.cancel_ranges {
        return grpc_error(StatusCode::REQUEST_TIMEOUT, 1, "context canceled");
    }
    let start = decode(&body, "key").unwrap_or_default();
    let end = decode(&body, "range_end");

    let kvs: Vec<Value> = state
        .kvs
        .iter()
        .filter(|(k, _)| in_range(k, &start, end.as_deref()))
        .map(|(k, (v, lease))| {
            json!({
                "key": STANDARD.encode(k),
                "value": STANDARD.encode(v),
                "lease": lease.to_string(),
            })
        })
        .collect();

    if kvs.is_empty() {
        // The gateway omits empty repeated fields.
        axum::Json(json!({"header": {}})).into_response()
    } else {
        let count = kvs.len().to_string();
        axum::Json(json!({"header": {}, "kvs": kvs, "count": count})).into_response()
    }
}

async fn v3_delete_range(
    State(state): State<SharedV3>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return grpc_error(StatusCode::UNAUTHORIZED, 16, "etcdserver: invalid auth token");
    }
    let start = decode(&body, "key").unwrap_or_default();
    let end = decode(&body, "range_end");

    let before = state.kvs.len();
    state.kvs.retain(|k, _| !in_range(k, &start, end.as_deref()));
    let deleted = before - state.kvs.len();

    if deleted == 0 {
        axum::Json(json!({"header": {}})).into_response()
    } else {
        axum::Json(json!({"header": {}, "deleted": deleted.to_string()})).into_response()
    }
}
