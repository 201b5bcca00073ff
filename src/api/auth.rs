//! Constant-time `X-API-Key` auth for the operator surface.
//!
//! Modeled on a `FromRequestParts` dashboard-key extractor that compares
//! keys with a plain `==`, but this surface calls for constant-time
//! comparison instead, so this uses `ring`'s `verify_slices_are_equal`.

use crate::error::CrowdSieveError;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use ring::constant_time::verify_slices_are_equal;
use std::sync::Arc;

use super::AppState;

pub struct DashboardAuth;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for DashboardAuth {
    type Rejection = CrowdSieveError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(CrowdSieveError::Unauthorized)?;

        if keys_match(provided, state.config.operator.api_key.as_deref()) {
            Ok(DashboardAuth)
        } else {
            Err(CrowdSieveError::Unauthorized)
        }
    }
}

/// `None` configured key never matches (a missing configured key is a
/// start-up fatal error in production; outside production it simply denies
/// every request at auth time).
pub fn keys_match(provided: &str, configured: Option<&str>) -> bool {
    match configured {
        Some(expected) if expected.len() == provided.len() => {
            verify_slices_are_equal(provided.as_bytes(), expected.as_bytes()).is_ok()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_keys_compare_equal() {
        assert!(keys_match("secret", Some("secret")));
    }

    #[test]
    fn mismatched_length_never_matches() {
        assert!(!keys_match("short", Some("longer-secret")));
    }

    #[test]
    fn missing_configured_key_never_matches() {
        assert!(!keys_match("anything", None));
    }
}
