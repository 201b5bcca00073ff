//! Northbound routes: health, filtered signals forwarding, and transparent
//! `/v2/*` `/v3/*` passthrough.

use crate::error::{CrowdSieveError, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::AppState;

/// Request bodies above 1 MiB are rejected with 413.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "timestamp": Utc::now()}))
}

pub async fn signals_v2(state: State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    signals("v2", state, headers, body).await
}

pub async fn signals_v3(state: State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    signals("v3", state, headers, body).await
}

async fn signals(version: &str, State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    if body.len() > MAX_BODY_BYTES {
        return Err(CrowdSieveError::InvalidInput("request body exceeds 1 MiB".to_string()));
    }

    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(validator) = &state.validator {
        let token = authorization
            .as_deref()
            .and_then(|a| a.strip_prefix("Bearer "))
            .ok_or(CrowdSieveError::Unauthorized)?;
        if matches!(validator.validate(token).await?, crate::validator::Outcome::Deny) {
            return Err(CrowdSieveError::Unauthorized);
        }
    }

    let user_agent = headers.get("user-agent").and_then(|v| v.to_str().ok()).map(str::to_string);
    let machine_id = headers.get("x-machine-id").and_then(|v| v.to_str().ok()).map(str::to_string);

    let resp = state
        .pipeline
        .process_batch(version, &body, authorization, user_agent, machine_id.as_deref())
        .await?;

    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::OK);
    Ok((status, [("content-type", resp.content_type)], Json(resp.body)).into_response())
}

pub async fn passthrough_v2(state: State<Arc<AppState>>, method: Method, Path(rest): Path<String>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    passthrough("v2", state, method, &rest, headers, body).await
}

pub async fn passthrough_v3(state: State<Arc<AppState>>, method: Method, Path(rest): Path<String>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    passthrough("v3", state, method, &rest, headers, body).await
}

/// Transparent byte-preserving passthrough for every other `/v2/*`, `/v3/*`
/// path. Copies a fixed header allowlist both ways and mirrors upstream
/// status verbatim.
async fn passthrough(
    version: &str,
    State(state): State<Arc<AppState>>,
    method: Method,
    rest: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    if body.len() > MAX_BODY_BYTES {
        return Err(CrowdSieveError::InvalidInput("request body exceeds 1 MiB".to_string()));
    }

    let url = format!("{}/{version}/{rest}", state.config.proxy.capi_url.trim_end_matches('/'));
    let mut req = state.http.request(method, &url).body(body.to_vec());

    for name in ["authorization", "content-type", "content-encoding", "user-agent", "accept"] {
        if let Some(v) = headers.get(name) {
            req = req.header(name, v.clone());
        }
    }

    let resp = req
        .timeout(Duration::from_millis(state.config.proxy.timeout_ms))
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                CrowdSieveError::UpstreamTimeout(format!("CAPI passthrough timed out: {e}"))
            } else {
                CrowdSieveError::UpstreamError(format!("CAPI passthrough failed: {e}"))
            }
        })?;

    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = resp
        .headers()
        .get("content-type")
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| CrowdSieveError::UpstreamError(format!("reading CAPI passthrough body: {e}")))?;

    Ok((status, [("content-type", content_type)], bytes).into_response())
}
