//! LAPI client: machine auth, alert/decision push, and the bouncer-key
//! decision lookups the Operator API needs.

use crate::config::LapiServerConfig;
use crate::error::{CrowdSieveError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
    expire: DateTime<Utc>,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// One client per configured LAPI server. Machine tokens are cached in
/// memory and refreshed 10s before expiry.
pub struct LapiClient {
    server: LapiServerConfig,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Serialize)]
pub struct PushAlert {
    pub scenario: String,
    pub message: String,
    pub events_count: i64,
    pub start_at: DateTime<Utc>,
    pub stop_at: DateTime<Utc>,
    pub source: Value,
    pub decisions: Vec<Value>,
}

pub struct PushOutcome {
    pub server: String,
    pub ok: bool,
    pub detail: String,
}

impl LapiClient {
    pub fn new(server: LapiServerConfig) -> Self {
        Self {
            server,
            http: reqwest::Client::new(),
            token: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.server.name
    }

    async fn machine_token(&self) -> Result<String> {
        if let Some(cached) = self.token.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            if cached.expires_at - chrono::Duration::seconds(10) > Utc::now() {
                return Ok(cached.token.clone());
            }
        }

        let machine_id = self.server.machine_id.as_deref().ok_or_else(|| {
            CrowdSieveError::InvalidConfig(format!("lapi_servers[{}] missing machine_id", self.server.name))
        })?;
        let password = self.server.password.as_deref().ok_or_else(|| {
            CrowdSieveError::InvalidConfig(format!("lapi_servers[{}] missing password", self.server.name))
        })?;

        let url = format!("{}/v1/watchers/login", self.server.url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({"machine_id": machine_id, "password": password}))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| CrowdSieveError::UpstreamError(format!("lapi login failed for {}: {e}", self.server.name)))?;

        if !resp.status().is_success() {
            return Err(CrowdSieveError::UpstreamError(format!(
                "lapi login rejected for {}: {}",
                self.server.name,
                resp.status()
            )));
        }

        let body: LoginResponse = resp
            .json()
            .await
            .map_err(|e| CrowdSieveError::UpstreamError(format!("invalid lapi login response: {e}")))?;

        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(CachedToken {
            token: body.token.clone(),
            expires_at: body.expire,
        });
        Ok(body.token)
    }

    /// Push a batch of alerts (each carrying its own decisions) to this
    /// server. Errors here are per-server — callers fan out across servers
    /// and isolate failures.
    pub async fn push_alerts(&self, alerts: &[PushAlert]) -> Result<()> {
        let token = self.machine_token().await?;
        let url = format!("{}/v1/alerts", self.server.url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(alerts)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| CrowdSieveError::UpstreamError(format!("lapi push failed for {}: {e}", self.server.name)))?;

        if !resp.status().is_success() {
            return Err(CrowdSieveError::UpstreamError(format!(
                "lapi rejected alert push for {}: {}",
                self.server.name,
                resp.status()
            )));
        }
        Ok(())
    }

    /// `GET /v1/decisions?ip=<ip>` using the server's bouncer key (operator
    /// decision-search surface).
    pub async fn decisions_for_ip(&self, ip: &str) -> Result<Vec<Value>> {
        let url = format!("{}/v1/decisions", self.server.url.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .header("X-Api-Key", &self.server.api_key)
            .query(&[("ip", ip)])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| CrowdSieveError::UpstreamError(format!("lapi decisions query failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(CrowdSieveError::UpstreamError(format!(
                "lapi decisions query rejected: {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| CrowdSieveError::UpstreamError(format!("invalid lapi decisions response: {e}")))
    }

    /// `DELETE /v1/decisions/<id>` using the bouncer key (manual unban).
    pub async fn delete_decision(&self, id: &str) -> Result<()> {
        let url = format!("{}/v1/decisions/{id}", self.server.url.trim_end_matches('/'));
        let resp = self
            .http
            .delete(&url)
            .header("X-Api-Key", &self.server.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| CrowdSieveError::UpstreamError(format!("lapi decision delete failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(CrowdSieveError::UpstreamError(format!(
                "lapi decision delete rejected: {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Build one client per configured server, shared between the analyzer
/// engine and the operator API's decision-search/manual-ban handlers so
/// both reuse the same cached machine tokens.
pub fn build_clients(servers: &[LapiServerConfig]) -> HashMap<String, Arc<LapiClient>> {
    servers
        .iter()
        .map(|s| (s.name.clone(), Arc::new(LapiClient::new(s.clone()))))
        .collect()
}

/// Fan out an alert push to a set of named target servers in parallel,
/// isolating per-server failures so one slow LAPI can't serialize the rest.
pub async fn push_to_targets(
    clients: &HashMap<String, Arc<LapiClient>>,
    target_names: &[String],
    alerts: &[PushAlert],
) -> Vec<PushOutcome> {
    let futures = target_names.iter().map(|name| async move {
        let Some(client) = clients.get(name) else {
            return PushOutcome {
                server: name.clone(),
                ok: false,
                detail: "unknown lapi server".to_string(),
            };
        };
        match client.push_alerts(alerts).await {
            Ok(()) => PushOutcome {
                server: name.clone(),
                ok: true,
                detail: "ok".to_string(),
            },
            Err(e) => PushOutcome {
                server: name.clone(),
                ok: false,
                detail: e.to_string(),
            },
        }
    });
    futures::future::join_all(futures).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> LapiServerConfig {
        LapiServerConfig {
            name: "test".to_string(),
            url: "https://lapi.example".to_string(),
            api_key: "key".to_string(),
            machine_id: None,
            password: None,
        }
    }

    #[tokio::test]
    async fn missing_machine_id_is_invalid_config() {
        let client = LapiClient::new(server());
        let err = client.machine_token().await.unwrap_err();
        assert!(matches!(err, CrowdSieveError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn push_to_targets_isolates_unknown_server() {
        let clients = HashMap::new();
        let outcomes = push_to_targets(&clients, &["missing".to_string()], &[]).await;
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].ok);
    }
}
