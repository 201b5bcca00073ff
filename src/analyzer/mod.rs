//! The analyzer engine: loads per-analyzer configs, runs each on its own
//! schedule, and turns brute-force detections into LAPI ban decisions.

pub mod config;
pub mod detect;
pub mod lapi_client;
pub mod loki;
pub mod scheduler;

use crate::config::AnalyzersConfig;
use crate::error::{CrowdSieveError, Result};
use crate::storage::models::{FinishedAnalyzerRun, NewAnalyzerResult, NewAnalyzerRun, RunStatus};
use crate::storage::Store;
use chrono::Utc;
use lapi_client::{LapiClient, PushAlert};
use loki::LokiClient;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct AnalyzerEngine {
    configs: HashMap<String, config::AnalyzerConfig>,
    sources: HashMap<String, crate::config::SourceConfig>,
    whitelist: Vec<String>,
    default_interval: String,
    default_lookback: String,
    default_targets: Vec<String>,
    store: Arc<dyn Store>,
    loki: LokiClient,
    loki_timeout: Duration,
    lapi_clients: Arc<HashMap<String, Arc<LapiClient>>>,
}

impl AnalyzerEngine {
    /// Load every `*.yaml` under `analyzers.config_dir`. Per-file parse
    /// errors are logged and skipped, never fatal to the whole load —
    /// the same non-fatal merge behavior `filters.d` uses.
    ///
    /// `lapi_clients` is shared with the operator API so both reuse the same
    /// cached machine tokens per server. `loki_timeout` is `proxy.timeout_ms`,
    /// shared with the rest of the upstream HTTP surface.
    pub fn load(
        analyzers: &AnalyzersConfig,
        lapi_clients: Arc<HashMap<String, Arc<LapiClient>>>,
        store: Arc<dyn Store>,
        loki_timeout: Duration,
    ) -> Self {
        let (loaded, errors) = config::load_all(std::path::Path::new(&analyzers.config_dir));
        for e in &errors {
            tracing::warn!(error = %e, "dropping unparsable analyzer config");
        }

        let configs = loaded.into_iter().map(|c| (c.id.clone(), c)).collect();

        Self {
            configs,
            sources: analyzers.sources.clone(),
            whitelist: analyzers.whitelist.clone(),
            default_interval: analyzers.default_interval.clone(),
            default_lookback: analyzers.default_lookback.clone(),
            default_targets: analyzers.default_targets.clone(),
            store,
            loki: LokiClient::new(),
            loki_timeout,
            lapi_clients,
        }
    }

    pub fn analyzer_ids(&self) -> Vec<String> {
        self.configs
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn interval_secs(&self, analyzer_id: &str) -> Option<u64> {
        let cfg = self.configs.get(analyzer_id)?;
        let interval = if cfg.schedule.interval.is_empty() {
            &self.default_interval
        } else {
            &cfg.schedule.interval
        };
        crate::duration::parse_duration(interval).map(|d| d.as_secs().max(1))
    }

    /// Run one analyzer end to end: fetch logs, detect, whitelist, push,
    /// persist. Every outcome — success or failure — is persisted to the
    /// `analyzer_runs` table before returning; failures fail fast but are never silently dropped.
    pub async fn run_once(&self, analyzer_id: &str) -> Result<()> {
        let cfg = self
            .configs
            .get(analyzer_id)
            .ok_or_else(|| CrowdSieveError::NotFound(format!("unknown analyzer: {analyzer_id}")))?;
        if !cfg.enabled {
            return Ok(());
        }

        let started_at = Utc::now();
        let run_id = self
            .store
            .start_analyzer_run(&NewAnalyzerRun {
                analyzer_id: analyzer_id.to_string(),
                started_at,
            })
            .await?;

        match self.execute(cfg).await {
            Ok((logs_fetched, detections, outcomes, whitelisted_count)) => {
                let alerts_generated = detections.len() as i64;
                let decisions_pushed = outcomes.iter().filter(|o| o.ok).count() as i64;
                let results: Vec<NewAnalyzerResult> = detections
                    .iter()
                    .map(|d| NewAnalyzerResult {
                        source_ip: d.key.clone(),
                        distinct_count: d.distinct_count,
                        total_count: d.total_count,
                        first_seen: d.first_seen,
                        last_seen: d.last_seen,
                        decision_pushed: decisions_pushed > 0,
                    })
                    .collect();
                if !results.is_empty() {
                    self.store.insert_analyzer_results(run_id, &results).await?;
                }

                let push_outcomes: Value = json!(outcomes
                    .iter()
                    .map(|o| json!({"server": o.server, "ok": o.ok, "detail": o.detail}))
                    .collect::<Vec<_>>());

                self.store
                    .finish_analyzer_run(
                        run_id,
                        &FinishedAnalyzerRun {
                            ended_at: Utc::now(),
                            status: RunStatus::Success,
                            logs_fetched,
                            alerts_generated,
                            decisions_pushed,
                            error_message: None,
                            detections: json!({
                                "whitelisted_count": whitelisted_count,
                                "items": detections
                                    .iter()
                                    .map(|d| json!({"key": d.key, "distinct_count": d.distinct_count}))
                                    .collect::<Vec<_>>(),
                            }),
                            push_outcomes,
                        },
                    )
                    .await?;
                Ok(())
            }
            Err(e) => {
                self.store
                    .finish_analyzer_run(
                        run_id,
                        &FinishedAnalyzerRun {
                            ended_at: Utc::now(),
                            status: RunStatus::Error,
                            logs_fetched: 0,
                            alerts_generated: 0,
                            decisions_pushed: 0,
                            error_message: Some(e.to_string()),
                            detections: json!({"whitelisted_count": 0, "items": []}),
                            push_outcomes: json!([]),
                        },
                    )
                    .await?;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        cfg: &config::AnalyzerConfig,
    ) -> Result<(i64, Vec<detect::Detection>, Vec<lapi_client::PushOutcome>, usize)> {
        let source = self.sources.get(&cfg.source.source_ref).ok_or_else(|| {
            CrowdSieveError::InvalidConfig(format!("unknown source ref: {}", cfg.source.source_ref))
        })?;

        let lookback_str = if cfg.schedule.lookback.is_empty() {
            &self.default_lookback
        } else {
            &cfg.schedule.lookback
        };
        let lookback = crate::duration::parse_duration(lookback_str)
            .ok_or_else(|| CrowdSieveError::InvalidConfig(format!("invalid lookback: {lookback_str}")))?;

        let entries = self
            .loki
            .fetch(
                source,
                &cfg.source.query,
                lookback,
                cfg.source.max_lines,
                self.loki_timeout,
                &cfg.extraction.fields,
            )
            .await?;
        let logs_fetched = entries.len() as i64;

        let mut detections = detect::group_and_threshold(&entries, &cfg.detection);
        let before_whitelist = detections.len();
        detections.retain(|d| !detect::is_whitelisted(&d.key, &self.whitelist));
        let whitelisted_count = before_whitelist - detections.len();

        if detections.is_empty() {
            return Ok((logs_fetched, detections, Vec::new(), whitelisted_count));
        }

        let duration = crate::duration::parse_duration(&cfg.decision.duration)
            .ok_or_else(|| CrowdSieveError::InvalidConfig(format!("invalid decision duration: {}", cfg.decision.duration)))?;
        let now = Utc::now();
        let alerts: Vec<PushAlert> = detections
            .iter()
            .map(|d| PushAlert {
                scenario: cfg.decision.scenario.clone(),
                message: cfg.decision.reason.clone(),
                events_count: d.total_count,
                start_at: d.first_seen,
                stop_at: d.last_seen,
                source: json!({"scope": cfg.decision.scope, "value": d.key}),
                decisions: vec![json!({
                    "type": cfg.decision.decision_type,
                    "scope": cfg.decision.scope,
                    "value": d.key,
                    "duration": format!("{}s", duration.as_secs()),
                    "scenario": cfg.decision.scenario,
                    "until": now + chrono::Duration::from_std(duration).unwrap_or_default(),
                })],
            })
            .collect();

        let target_names = match &cfg.targets {
            config::Targets::All(_) => self.lapi_clients.keys().cloned().collect::<Vec<_>>(),
            config::Targets::Named(names) if names.is_empty() => self.default_targets.clone(),
            config::Targets::Named(names) => names.clone(),
        };

        let outcomes = lapi_client::push_to_targets(&self.lapi_clients, &target_names, &alerts).await;

        Ok((logs_fetched, detections, outcomes, whitelisted_count))
    }
}
