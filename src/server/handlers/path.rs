//! Management passthrough for the media server's path API.
//!
//! Every endpoint requires a bearer capability token scoped to media
//! access; the upstream management credential never leaves this service.
//! Paths backed by an HLS playlist are served by the stream proxy rather
//! than the media server, so create/patch/get requests for them are
//! answered locally instead of being forwarded.

use axum::{
    extract::{Path, Query, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, Method},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::{
    auth::{self, Access, ResourceScope, Scope},
    lease::is_hls_path,
    proxy::ForwardSpec,
    server::{
        params::{AuthParams, CreatePathBody, PatchPathBody},
        AppState,
    },
    Error, Result,
};

/// Recording defaults applied whenever a path is created or patched
/// through this API.
const RECORD_DEFAULTS: [(&str, &str); 5] = [
    ("recordPath", "/opt/mediamtx/recordings/%path/%Y-%m-%d_%H-%M-%S-%f"),
    ("recordFormat", "fmp4"),
    ("recordPartDuration", "1s"),
    ("recordSegmentDuration", "1h"),
    ("recordDeleteAfter", "7d"),
];

/// Drop the bearer fallback parameter before a query string is relayed
/// upstream.
fn strip_token(query: Option<String>) -> Option<String> {
    let query = query?;
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.starts_with("token="))
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept.join("&"))
    }
}

fn guard(state: &AppState, headers: &HeaderMap, token: Option<&str>) -> Result<()> {
    let scope = [ResourceScope::access(Access::Media)];
    auth::authorize(
        &state.config.signing_secret,
        headers,
        token,
        Scope::Resources(&scope),
    )?;
    Ok(())
}

async fn forward_management(
    state: &AppState,
    method: Method,
    suffix: &str,
    query: Option<String>,
    body: Option<Value>,
) -> Result<Response> {
    let mut url = state.media.endpoint(suffix)?;
    if let Some(query) = query {
        url.set_query(Some(&query));
    }

    let mut spec = ForwardSpec::get(url);
    spec.method = method;
    spec.headers = state.media.headers()?;

    if let Some(body) = body {
        spec.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let encoded = serde_json::to_vec(&body).map_err(|e| Error::Internal(e.to_string()))?;
        spec.body = Some(Bytes::from(encoded));
    }

    state.client.forward(spec).await
}

/// Handle GET /path requests.
pub async fn list_paths(
    State(state): State<AppState>,
    Query(params): Query<AuthParams>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response> {
    guard(&state, &headers, params.token.as_deref())?;
    forward_management(&state, Method::GET, "v3/paths/list", strip_token(query), None).await
}

/// Handle GET /path/{path} requests.
pub async fn get_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<AuthParams>,
    headers: HeaderMap,
) -> Result<Response> {
    guard(&state, &headers, params.token.as_deref())?;

    let lease = state.leases.get(&path).await?;
    if lease.is_hls() {
        // The media server has never heard of this path; report it as a
        // ready source so players treat it like any other.
        return Ok(Json(json!({
            "name": path,
            "confName": path,
            "source": { "id": path, "type": "hls" },
            "ready": true,
            "readyTime": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "tracks": [],
            "bytesReceived": 0,
            "bytesSent": 0,
            "readers": [],
        }))
        .into_response());
    }

    forward_management(
        &state,
        Method::GET,
        &format!("v3/paths/get/{}", path),
        None,
        None,
    )
    .await
}

/// Handle POST /path requests.
pub async fn create_path(
    State(state): State<AppState>,
    Query(params): Query<AuthParams>,
    headers: HeaderMap,
    Json(body): Json<CreatePathBody>,
) -> Result<Response> {
    guard(&state, &headers, params.token.as_deref())?;

    if body.source.as_deref().is_some_and(is_hls_path) {
        return Ok(Json(json!({
            "name": body.name,
            "source": body.source,
            "sourceOnDemand": true,
            "record": false,
        }))
        .into_response());
    }

    let mut config = Map::new();
    config.insert("name".into(), json!(body.name));
    if let Some(source) = &body.source {
        config.insert("source".into(), json!(source));
        config.insert("sourceOnDemand".into(), json!(true));
    }
    config.insert("record".into(), json!(body.record));
    apply_record_defaults(&mut config);

    forward_management(
        &state,
        Method::POST,
        &format!("v3/config/paths/add/{}", body.name),
        None,
        Some(Value::Object(config)),
    )
    .await
}

/// Handle PATCH /path/{path} requests.
pub async fn update_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<AuthParams>,
    headers: HeaderMap,
    Json(body): Json<PatchPathBody>,
) -> Result<Response> {
    guard(&state, &headers, params.token.as_deref())?;

    if body.source.as_deref().is_some_and(is_hls_path) {
        return Ok(Json(json!({
            "name": body.name,
            "source": body.source,
            "sourceOnDemand": true,
            "record": false,
        }))
        .into_response());
    }

    let mut config = Map::new();
    if let Some(name) = &body.name {
        config.insert("name".into(), json!(name));
    }
    if let Some(source) = &body.source {
        config.insert("source".into(), json!(source));
        config.insert("sourceOnDemand".into(), json!(true));
    }
    if let Some(record) = body.record {
        config.insert("record".into(), json!(record));
    }
    apply_record_defaults(&mut config);

    forward_management(
        &state,
        Method::PATCH,
        &format!("v3/config/paths/patch/{}", path),
        None,
        Some(Value::Object(config)),
    )
    .await
}

/// Handle DELETE /path/{path} requests.
pub async fn delete_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<AuthParams>,
    headers: HeaderMap,
) -> Result<Response> {
    guard(&state, &headers, params.token.as_deref())?;

    forward_management(
        &state,
        Method::DELETE,
        &format!("v3/config/paths/delete/{}", path),
        None,
        None,
    )
    .await
}

/// Handle GET /v3/config/global/get requests.
pub async fn global_config(
    State(state): State<AppState>,
    Query(params): Query<AuthParams>,
    headers: HeaderMap,
) -> Result<Response> {
    guard(&state, &headers, params.token.as_deref())?;
    forward_management(&state, Method::GET, "v3/config/global/get", None, None).await
}

/// Handle GET /v3/recordings/get/{path} requests.
pub async fn recordings(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<AuthParams>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response> {
    guard(&state, &headers, params.token.as_deref())?;

    forward_management(
        &state,
        Method::GET,
        &format!("v3/recordings/get/{}", path),
        strip_token(query),
        None,
    )
    .await
}

fn apply_record_defaults(config: &mut Map<String, Value>) {
    for (key, value) in RECORD_DEFAULTS {
        config.insert(key.into(), json!(value));
    }
}
