//! Security headers and the operator rate-limit exemption policy.
//!
//! `tower_governor` (used ambiently below, see [`build_router`]) applies a
//! flat per-IP quota across the whole surface the way the hub router it's
//! modeled on does. `/api/*` rate limiting additionally needs to exempt
//! localhost (outside production) and requests bearing the dashboard key —
//! a policy `GovernorLayer`'s key-extractor model doesn't express cleanly,
//! so that exemption is a small dedicated counter here.

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::AppState;

const WINDOW: Duration = Duration::from_secs(1);
const LIMIT_PER_WINDOW: u32 = 20;

pub struct OperatorRateLimiter {
    buckets: Mutex<HashMap<IpAddr, (u32, Instant)>>,
}

impl OperatorRateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn allow(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let entry = buckets.entry(ip).or_insert((0, now));
        if now.duration_since(entry.1) > WINDOW {
            *entry = (0, now);
        }
        if entry.0 >= LIMIT_PER_WINDOW {
            false
        } else {
            entry.0 += 1;
            true
        }
    }
}

impl Default for OperatorRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn operator_rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let exempt_localhost = !state.production && addr.ip().is_loopback();
    let exempt_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|key| super::auth::keys_match(key, state.config.operator.api_key.as_deref()));

    if exempt_localhost || exempt_key {
        return Ok(next.run(request).await);
    }

    if !state.operator_rate_limiter.allow(addr.ip()) {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(request).await)
}

/// Restrictive CSP always; HSTS only when running in production.
pub async fn security_headers(
    State(state): State<Arc<AppState>>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'self'"),
    );
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    if state.production {
        headers.insert(
            "strict-transport-security",
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_allows_up_to_the_window_limit() {
        let limiter = OperatorRateLimiter::new();
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        for _ in 0..LIMIT_PER_WINDOW {
            assert!(limiter.allow(ip));
        }
        assert!(!limiter.allow(ip));
    }

    #[test]
    fn limiter_tracks_ips_independently() {
        let limiter = OperatorRateLimiter::new();
        let a: IpAddr = "1.1.1.1".parse().unwrap();
        let b: IpAddr = "2.2.2.2".parse().unwrap();
        for _ in 0..LIMIT_PER_WINDOW {
            assert!(limiter.allow(a));
        }
        assert!(limiter.allow(b));
    }
}
