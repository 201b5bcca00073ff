//! Signal Pipeline: validate → filter → persist → forward.
//!
//! `lastInsertedIds` is carried as an explicit local `Vec<i64>` through this
//! function, never a process-global.

mod alert_json;

use crate::config::ProxyConfig;
use crate::error::{CrowdSieveError, Result};
use crate::filters::FilterEngine;
use crate::storage::Store;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const MAX_ALERTS_PER_BATCH: usize = 1000;

pub struct SignalPipeline {
    store: Arc<dyn Store>,
    filters: Arc<FilterEngine>,
    http: reqwest::Client,
    proxy: ProxyConfig,
}

pub struct BatchResponse {
    pub status: u16,
    pub body: Value,
    pub content_type: String,
}

impl SignalPipeline {
    pub fn new(store: Arc<dyn Store>, filters: Arc<FilterEngine>, proxy: ProxyConfig) -> Self {
        Self {
            store,
            filters,
            http: reqwest::Client::new(),
            proxy,
        }
    }

    pub async fn process_batch(
        &self,
        version: &str,
        body: &[u8],
        authorization: Option<String>,
        user_agent: Option<String>,
        machine_id: Option<&str>,
    ) -> Result<BatchResponse> {
        let alerts_json: Vec<Value> = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Array(arr)) => arr,
            _ => return Err(CrowdSieveError::InvalidInput("body must be a JSON array".to_string())),
        };

        if alerts_json.len() > MAX_ALERTS_PER_BATCH {
            return Err(CrowdSieveError::InvalidInput(format!(
                "batch of {} exceeds MAX_ALERTS_PER_BATCH ({MAX_ALERTS_PER_BATCH})",
                alerts_json.len()
            )));
        }

        if alerts_json.is_empty() {
            return Ok(ok_message("OK"));
        }

        let mut parsed = Vec::with_capacity(alerts_json.len());
        for raw in &alerts_json {
            parsed.push(alert_json::parse_alert(raw, machine_id)?);
        }

        let mut new_alerts = Vec::with_capacity(parsed.len());
        let mut reasons_per_alert = Vec::with_capacity(parsed.len());
        let mut filtered_flags = Vec::with_capacity(parsed.len());

        for p in &parsed {
            let verdict = self.filters.evaluate(&p.raw);
            let reasons: Vec<Value> = verdict
                .matched
                .iter()
                .map(|m| json!({"filter": m.name, "reason": m.reason}))
                .collect();
            let mut alert = p.new_alert.clone();
            alert.filtered = verdict.filtered;
            alert.reasons = Value::Array(reasons.clone());
            filtered_flags.push(verdict.filtered);
            reasons_per_alert.push(reasons);
            new_alerts.push(alert);
        }

        // Storage is best-effort: a failure here is logged and MUST NOT fail
        // the request.
        let ids: Vec<i64> = match self.store.insert_alerts(&new_alerts).await {
            Ok(ids) => {
                for (idx, id) in ids.iter().enumerate() {
                    if !parsed[idx].decisions.is_empty() {
                        if let Err(e) = self.store.insert_decisions(*id, &parsed[idx].decisions).await {
                            tracing::error!(error = %e, alert_id = id, "failed to persist decisions");
                        }
                    }
                    if !parsed[idx].events.is_empty() {
                        if let Err(e) = self.store.insert_events(*id, &parsed[idx].events).await {
                            tracing::error!(error = %e, alert_id = id, "failed to persist events");
                        }
                    }
                }
                ids
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to persist alert batch");
                Vec::new()
            }
        };

        let survivors: Vec<(usize, &Value)> = parsed
            .iter()
            .enumerate()
            .filter(|(idx, _)| !filtered_flags[*idx])
            .map(|(idx, p)| (idx, &p.raw))
            .collect();

        if survivors.is_empty() {
            return Ok(ok_message("OK"));
        }

        if !self.proxy.forward_enabled {
            return Ok(ok_message("OK (forwarding disabled)"));
        }

        let survivor_ids: Vec<i64> = survivors
            .iter()
            .filter_map(|(idx, _)| ids.get(*idx).copied())
            .collect();
        let survivor_bodies: Vec<&Value> = survivors.iter().map(|(_, raw)| *raw).collect();

        let url = format!("{}/{version}/signals", self.proxy.capi_url.trim_end_matches('/'));
        let mut req = self
            .http
            .post(&url)
            .json(&survivor_bodies)
            .timeout(Duration::from_millis(self.proxy.timeout_ms))
            .header("user-agent", user_agent.unwrap_or_else(|| "crowdsieve/1.0".to_string()));
        if let Some(auth) = authorization {
            req = req.header("authorization", auth);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                CrowdSieveError::UpstreamTimeout(format!("CAPI signals forwarding timed out: {e}"))
            } else {
                CrowdSieveError::UpstreamError(format!("CAPI signals forwarding failed: {e}"))
            }
        })?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let upstream_body = resp.bytes().await.unwrap_or_default();

        if (200..300).contains(&status) {
            if let Err(e) = self.store.mark_forwarded(&survivor_ids, Utc::now()).await {
                tracing::error!(error = %e, "failed to mark alerts as forwarded");
            }
        }

        let body_value: Value = serde_json::from_slice(&upstream_body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&upstream_body).into_owned()));

        Ok(BatchResponse {
            status,
            body: body_value,
            content_type,
        })
    }
}

fn ok_message(message: &str) -> BatchResponse {
    BatchResponse {
        status: 200,
        body: json!({"message": message}),
        content_type: "application/json".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterMode, FiltersConfig, RawFilterRule};
    use crate::storage::sqlite::SqliteStore;

    async fn test_pipeline(forward_enabled: bool, capi_url: String) -> (SignalPipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(db_path.to_str().unwrap()).await.unwrap());
        let filters = Arc::new(FilterEngine::compile(&FiltersConfig {
            mode: FilterMode::Block,
            rules: vec![RawFilterRule {
                name: "drop-sim".to_string(),
                enabled: true,
                description: None,
                filter: serde_yaml::from_str("field: simulated\nop: eq\nvalue: true\n").unwrap(),
            }],
        }));
        let proxy = ProxyConfig {
            capi_url,
            forward_enabled,
            ..Default::default()
        };
        (SignalPipeline::new(store, filters, proxy), dir)
    }

    #[tokio::test]
    async fn empty_batch_returns_ok_without_storing() {
        let (pipeline, _dir) = test_pipeline(true, "https://unused.example".to_string()).await;
        let resp = pipeline
            .process_batch("v2", b"[]", None, None, None)
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let (pipeline, _dir) = test_pipeline(true, "https://unused.example".to_string()).await;
        let alerts: Vec<Value> = (0..1001)
            .map(|_| json!({"scenario": "x", "source": {"scope": "ip", "value": "1.1.1.1"}}))
            .collect();
        let body = serde_json::to_vec(&alerts).unwrap();
        let err = pipeline
            .process_batch("v2", &body, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CrowdSieveError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn non_array_body_is_rejected() {
        let (pipeline, _dir) = test_pipeline(true, "https://unused.example".to_string()).await;
        let err = pipeline
            .process_batch("v2", b"{}", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CrowdSieveError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn all_filtered_batch_skips_capi() {
        let (pipeline, _dir) = test_pipeline(true, "https://unused.example".to_string()).await;
        let alerts = vec![json!({"scenario": "x", "simulated": true, "source": {"scope": "ip", "value": "1.1.1.1"}})];
        let body = serde_json::to_vec(&alerts).unwrap();
        let resp = pipeline.process_batch("v2", &body, None, None, None).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["message"], "OK");
    }

    #[tokio::test]
    async fn forwarding_disabled_short_circuits() {
        let (pipeline, _dir) = test_pipeline(false, "https://unused.example".to_string()).await;
        let alerts = vec![json!({"scenario": "x", "source": {"scope": "ip", "value": "1.1.1.1"}})];
        let body = serde_json::to_vec(&alerts).unwrap();
        let resp = pipeline.process_batch("v2", &body, None, None, None).await.unwrap();
        assert_eq!(resp.body["message"], "OK (forwarding disabled)");
    }
}
