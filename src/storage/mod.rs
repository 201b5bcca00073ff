//! Storage layer: one async trait over two backends — an embedded SQLite
//! file store and a networked Postgres store.
//!
//! Both backends are sqlx drivers, both natively async, chosen over a
//! sync embedded store so WAL mode, `foreign_keys=ON`, a busy timeout, and
//! file-permission hardening can all be expressed as PRAGMAs rather than
//! needing a sync-wrapping layer in the trait; see DESIGN.md for the
//! tradeoff.

pub mod models;
pub mod postgres;
pub mod sqlite;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::*;

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a batch in input order, returning ids in the same order.
    /// This is the per-batch `lastInsertedIds` state the pipeline needs —
    /// callers hold the returned `Vec` locally and pass it into
    /// [`Store::mark_forwarded`]; nothing here is process-global.
    async fn insert_alerts(&self, alerts: &[NewAlert]) -> Result<Vec<i64>>;

    async fn mark_forwarded(&self, ids: &[i64], forwarded_at: DateTime<Utc>) -> Result<()>;

    async fn get_alert(&self, id: i64) -> Result<Option<Alert>>;

    async fn list_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>>;

    async fn stats(&self) -> Result<Stats>;

    async fn stats_distribution(&self, since: DateTime<Utc>) -> Result<Vec<DistributionPoint>>;

    async fn insert_decisions(&self, alert_id: i64, decisions: &[NewDecision]) -> Result<()>;

    async fn insert_events(&self, alert_id: i64, events: &[NewEvent]) -> Result<()>;

    async fn get_validated_client(&self, token_hash: &str) -> Result<Option<ValidatedClient>>;

    async fn upsert_validated_client(
        &self,
        token_hash: &str,
        machine_id: Option<&str>,
        validated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn touch_validated_client(&self, token_hash: &str, accessed_at: DateTime<Utc>) -> Result<()>;

    async fn evict_expired_validated_clients(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn start_analyzer_run(&self, run: &NewAnalyzerRun) -> Result<i64>;

    async fn finish_analyzer_run(&self, run_id: i64, finished: &FinishedAnalyzerRun) -> Result<()>;

    async fn insert_analyzer_results(&self, run_id: i64, results: &[NewAnalyzerResult]) -> Result<()>;

    async fn latest_analyzer_run(&self, analyzer_id: &str) -> Result<Option<AnalyzerRun>>;
}
