//! Data model. Alerts own their decisions and events; runs own
//! their results. Column semantics are shared between backends — only the
//! SQL dialect differs (see [`super::sqlite`] / [`super::postgres`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: i64,
    pub uuid: Option<String>,
    pub machine_id: Option<String>,
    pub scenario: String,
    pub scenario_hash: Option<String>,
    pub scenario_version: Option<String>,
    pub message: Option<String>,
    pub event_count: i64,
    pub start_at: Option<DateTime<Utc>>,
    pub stop_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub forwarded_at: Option<DateTime<Utc>>,
    pub source_scope: String,
    pub source_value: String,
    pub source_ip: Option<String>,
    pub source_asn: Option<i64>,
    pub source_as_name: Option<String>,
    pub source_country: Option<String>,
    pub geo_country_code: Option<String>,
    pub geo_country_name: Option<String>,
    pub geo_city: Option<String>,
    pub geo_region: Option<String>,
    pub geo_lat: Option<f64>,
    pub geo_lon: Option<f64>,
    pub geo_timezone: Option<String>,
    pub geo_isp: Option<String>,
    pub geo_org: Option<String>,
    pub simulated: bool,
    pub filtered: bool,
    pub forwarded_to_capi: bool,
    pub has_decisions: bool,
    pub reasons: Value,
    pub raw_json: Value,
}

/// The shape the signal pipeline builds before insertion — no id, no
/// forwarding state yet.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub uuid: Option<String>,
    pub machine_id: Option<String>,
    pub scenario: String,
    pub scenario_hash: Option<String>,
    pub scenario_version: Option<String>,
    pub message: Option<String>,
    pub event_count: i64,
    pub start_at: Option<DateTime<Utc>>,
    pub stop_at: Option<DateTime<Utc>>,
    pub source_scope: String,
    pub source_value: String,
    pub source_ip: Option<String>,
    pub source_asn: Option<i64>,
    pub source_as_name: Option<String>,
    pub source_country: Option<String>,
    pub geo_country_code: Option<String>,
    pub geo_country_name: Option<String>,
    pub geo_city: Option<String>,
    pub geo_region: Option<String>,
    pub geo_lat: Option<f64>,
    pub geo_lon: Option<f64>,
    pub geo_timezone: Option<String>,
    pub geo_isp: Option<String>,
    pub geo_org: Option<String>,
    pub simulated: bool,
    pub filtered: bool,
    pub reasons: Value,
    pub raw_json: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub id: i64,
    pub alert_id: i64,
    pub uuid: Option<String>,
    pub origin: String,
    pub decision_type: String,
    pub scope: String,
    pub value: String,
    pub duration: String,
    pub scenario: Option<String>,
    pub simulated: bool,
    pub until: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDecision {
    pub uuid: Option<String>,
    pub origin: String,
    pub decision_type: String,
    pub scope: String,
    pub value: String,
    pub duration: String,
    pub scenario: Option<String>,
    pub simulated: bool,
    pub until: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: i64,
    pub alert_id: i64,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedClient {
    pub token_hash: String,
    pub machine_id: Option<String>,
    pub validated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerRun {
    pub id: i64,
    pub analyzer_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: Option<RunStatus>,
    pub logs_fetched: i64,
    pub alerts_generated: i64,
    pub decisions_pushed: i64,
    pub error_message: Option<String>,
    pub detections: Value,
    pub push_outcomes: Value,
}

#[derive(Debug, Clone)]
pub struct NewAnalyzerRun {
    pub analyzer_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FinishedAnalyzerRun {
    pub ended_at: DateTime<Utc>,
    pub status: RunStatus,
    pub logs_fetched: i64,
    pub alerts_generated: i64,
    pub decisions_pushed: i64,
    pub error_message: Option<String>,
    pub detections: Value,
    pub push_outcomes: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerResult {
    pub id: i64,
    pub run_id: i64,
    pub source_ip: String,
    pub distinct_count: i64,
    pub total_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub decision_pushed: bool,
}

#[derive(Debug, Clone)]
pub struct NewAnalyzerResult {
    pub source_ip: String,
    pub distinct_count: i64,
    pub total_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub decision_pushed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    pub limit: i64,
    pub offset: i64,
    pub scenario: Option<String>,
    pub country: Option<String>,
    pub machine_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Stats {
    pub total_alerts: i64,
    pub filtered_alerts: i64,
    pub forwarded_alerts: i64,
    pub total_decisions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionPoint {
    pub bucket: DateTime<Utc>,
    pub count: i64,
}
