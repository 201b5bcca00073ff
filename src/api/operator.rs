//! Operator API: read-only alert/stat queries, decision search across
//! LAPIs, manual ban submission, analyzer inspection.

use crate::analyzer::lapi_client::LapiClient;
use crate::duration::parse_duration_no_days;
use crate::error::{CrowdSieveError, Result};
use crate::storage::models::AlertQuery;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::Arc;

use super::AppState;

const MAX_LIMIT: i64 = 1000;
const MIN_LIMIT: i64 = 1;
const DEFAULT_LIMIT: i64 = 100;
const MAX_SCENARIO_LEN: usize = 200;
const MAX_BAN_REASON_LEN: usize = 500;

#[derive(Debug, Deserialize)]
pub struct AlertListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub scenario: Option<String>,
    pub country: Option<String>,
    pub machine_id: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
}

fn bounded_date(raw: &str) -> Result<DateTime<Utc>> {
    let parsed: DateTime<Utc> = raw
        .parse()
        .map_err(|_| CrowdSieveError::InvalidInput(format!("invalid date: {raw}")))?;
    let floor = Utc.from_utc_datetime(&NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap());
    let ceiling = Utc::now() + chrono::Duration::hours(24);
    if parsed < floor || parsed > ceiling {
        return Err(CrowdSieveError::InvalidInput(format!(
            "date out of bounds [2020-01-01, now+24h]: {raw}"
        )));
    }
    Ok(parsed)
}

fn build_query(params: AlertListParams) -> Result<AlertQuery> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
        return Err(CrowdSieveError::InvalidInput(format!("limit must be in [1,1000]: {limit}")));
    }
    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        return Err(CrowdSieveError::InvalidInput("offset must be >= 0".to_string()));
    }
    if let Some(s) = &params.scenario {
        if s.len() > MAX_SCENARIO_LEN {
            return Err(CrowdSieveError::InvalidInput("scenario filter too long".to_string()));
        }
    }
    if let Some(c) = &params.country {
        if c.len() != 2 || !c.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(CrowdSieveError::InvalidInput(format!("country must match ^[A-Z]{{2}}$: {c}")));
        }
    }
    let since = params.since.as_deref().map(bounded_date).transpose()?;
    let until = params.until.as_deref().map(bounded_date).transpose()?;

    Ok(AlertQuery {
        limit,
        offset,
        scenario: params.scenario,
        country: params.country,
        machine_id: params.machine_id,
        since,
        until,
    })
}

pub async fn list_alerts(_auth: super::auth::DashboardAuth, State(state): State<Arc<AppState>>, Query(params): Query<AlertListParams>) -> Result<Json<Value>> {
    let query = build_query(params)?;
    let alerts = state.store.list_alerts(&query).await?;
    Ok(Json(json!({"alerts": alerts})))
}

pub async fn get_alert(_auth: super::auth::DashboardAuth, State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<Value>> {
    let alert = state
        .store
        .get_alert(id)
        .await?
        .ok_or_else(|| CrowdSieveError::NotFound(format!("alert {id}")))?;
    Ok(Json(json!(alert)))
}

pub async fn stats(_auth: super::auth::DashboardAuth, State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    Ok(Json(json!(state.store.stats().await?)))
}

#[derive(Debug, Deserialize)]
pub struct DistributionParams {
    pub period: Option<String>,
}

pub async fn stats_distribution(_auth: super::auth::DashboardAuth, State(state): State<Arc<AppState>>, Query(params): Query<DistributionParams>) -> Result<Json<Value>> {
    let since = match params.period.as_deref() {
        Some("7d") | None => Utc::now() - chrono::Duration::days(7),
        Some("30d") => Utc::now() - chrono::Duration::days(30),
        Some("all") => DateTime::<Utc>::MIN_UTC,
        Some(other) => return Err(CrowdSieveError::InvalidInput(format!("invalid period: {other}"))),
    };
    let points = state.store.stats_distribution(since).await?;
    Ok(Json(json!({"distribution": points})))
}

/// Looks up the most recent stored geo enrichment for `ip` rather than
/// performing a live lookup — the GeoIP library itself is an external
/// collaborator this repository doesn't implement.
pub async fn ip_info(_auth: super::auth::DashboardAuth, State(state): State<Arc<AppState>>, Path(ip): Path<String>) -> Result<Json<Value>> {
    ip.parse::<IpAddr>()
        .map_err(|_| CrowdSieveError::InvalidInput(format!("invalid ip: {ip}")))?;
    let alerts = state
        .store
        .list_alerts(&AlertQuery {
            limit: MAX_LIMIT,
            ..Default::default()
        })
        .await?;
    let hit = alerts.into_iter().find(|a| a.source_ip.as_deref() == Some(ip.as_str()));
    match hit {
        Some(a) => Ok(Json(json!({
            "ip": ip,
            "country_code": a.geo_country_code,
            "country_name": a.geo_country_name,
            "city": a.geo_city,
            "region": a.geo_region,
            "asn": a.source_asn,
            "as_name": a.source_as_name,
            "isp": a.geo_isp,
            "org": a.geo_org,
        }))),
        None => Ok(Json(json!({"ip": ip, "known": false}))),
    }
}

pub async fn lapi_servers(_auth: super::auth::DashboardAuth, State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"servers": state.lapi_clients.keys().collect::<Vec<_>>()}))
}

#[derive(Debug, Deserialize)]
pub struct DecisionSearchParams {
    pub ip: String,
}

#[derive(Debug, Serialize)]
struct DecisionSearchResponse {
    shared: Vec<Value>,
    results: Vec<ServerDecisions>,
}

#[derive(Debug, Serialize)]
struct ServerDecisions {
    server: String,
    healthy: bool,
    decisions: Vec<Value>,
    error: Option<String>,
}

const SHARED_ORIGINS: [&str; 4] = ["capi", "lists", "crowdsec", "capi"];

pub async fn search_decisions(_auth: super::auth::DashboardAuth, State(state): State<Arc<AppState>>, Query(params): Query<DecisionSearchParams>) -> Result<Json<Value>> {
    params
        .ip
        .parse::<IpAddr>()
        .map_err(|_| CrowdSieveError::InvalidInput(format!("invalid ip: {}", params.ip)))?;

    let mut per_server: Vec<ServerDecisions> = Vec::with_capacity(state.lapi_clients.len());
    let futures = state.lapi_clients.iter().map(|(name, client)| {
        let ip = params.ip.clone();
        async move { (name.clone(), client.decisions_for_ip(&ip).await) }
    });
    for (name, result) in futures::future::join_all(futures).await {
        match result {
            Ok(decisions) => per_server.push(ServerDecisions {
                server: name,
                healthy: true,
                decisions,
                error: None,
            }),
            Err(e) => per_server.push(ServerDecisions {
                server: name,
                healthy: false,
                decisions: Vec::new(),
                error: Some(e.to_string()),
            }),
        }
    }

    let healthy: Vec<&ServerDecisions> = per_server.iter().filter(|s| s.healthy).collect();
    let mut shared = Vec::new();
    if !healthy.is_empty() {
        for decision in &healthy[0].decisions {
            let triple = (
                decision.get("scenario").cloned(),
                decision.get("type").cloned(),
                decision.get("value").cloned(),
            );
            let origin_matches = decision
                .get("origin")
                .and_then(|o| o.as_str())
                .is_some_and(|o| SHARED_ORIGINS.iter().any(|s| o.to_lowercase().contains(s)));
            let present_everywhere = healthy.iter().all(|server| {
                server.decisions.iter().any(|d| {
                    (d.get("scenario").cloned(), d.get("type").cloned(), d.get("value").cloned()) == triple
                })
            });
            if origin_matches && present_everywhere && !shared.contains(decision) {
                shared.push(decision.clone());
            }
        }
    }

    for server in &mut per_server {
        server.decisions.retain(|d| !shared.contains(d));
    }

    Ok(Json(json!(DecisionSearchResponse {
        shared,
        results: per_server,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteDecisionParams {
    pub server: String,
}

pub async fn delete_decision(
    _auth: super::auth::DashboardAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<DeleteDecisionParams>,
) -> Result<Json<Value>> {
    let client = state
        .lapi_clients
        .get(&params.server)
        .ok_or_else(|| CrowdSieveError::NotFound(format!("unknown lapi server: {}", params.server)))?;
    client.delete_decision(&id).await?;
    Ok(Json(json!({"message": "deleted"})))
}

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub server: String,
    pub ip: String,
    pub duration: String,
    pub reason: String,
}

fn valid_server_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub async fn manual_ban(_auth: super::auth::DashboardAuth, State(state): State<Arc<AppState>>, Json(req): Json<BanRequest>) -> Result<Json<Value>> {
    req.ip
        .parse::<IpAddr>()
        .map_err(|_| CrowdSieveError::InvalidInput(format!("invalid ip: {}", req.ip)))?;
    if parse_duration_no_days(&req.duration).is_none() {
        return Err(CrowdSieveError::InvalidInput(format!("invalid duration: {}", req.duration)));
    }
    if !valid_server_name(&req.server) {
        return Err(CrowdSieveError::InvalidInput(format!("invalid server name: {}", req.server)));
    }
    if req.reason.len() > MAX_BAN_REASON_LEN {
        return Err(CrowdSieveError::InvalidInput("reason too long".to_string()));
    }

    let client: &LapiClient = state
        .lapi_clients
        .get(&req.server)
        .ok_or_else(|| CrowdSieveError::NotFound(format!("unknown lapi server: {}", req.server)))?;

    let until = Utc::now() + parse_duration_no_days(&req.duration).unwrap_or_default();
    let decision = json!({
        "origin": "crowdsieve",
        "scenario": "crowdsieve/manual",
        "scope": "ip",
        "type": "ban",
        "value": req.ip,
        "duration": req.duration,
        "reason": req.reason,
        "until": until,
    });
    client
        .push_alerts(&[crate::analyzer::lapi_client::PushAlert {
            scenario: "crowdsieve/manual".to_string(),
            message: req.reason.clone(),
            events_count: 1,
            start_at: Utc::now(),
            stop_at: Utc::now(),
            source: json!({"scope": "ip", "value": req.ip}),
            decisions: vec![decision],
        }])
        .await?;

    Ok(Json(json!({"message": "ban submitted"})))
}

pub async fn list_analyzers(_auth: super::auth::DashboardAuth, State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"analyzers": state.analyzer_engine.analyzer_ids()}))
}

pub async fn run_analyzer(_auth: super::auth::DashboardAuth, State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<Value>> {
    let Some(scheduler) = &state.scheduler else {
        return Err(CrowdSieveError::NotFound("analyzers are disabled".to_string()));
    };
    use crate::analyzer::scheduler::RunNowOutcome;
    match scheduler.run_now(&id).await {
        RunNowOutcome::Started => Ok(Json(json!({"message": "run started"}))),
        RunNowOutcome::AlreadyRunning => Ok(Json(json!({"message": "run already in progress, skipped"}))),
        RunNowOutcome::UnknownAnalyzer => Err(CrowdSieveError::NotFound(format!("unknown analyzer: {id}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_out_of_bounds_is_invalid_input() {
        let params = AlertListParams {
            limit: Some(5000),
            offset: None,
            scenario: None,
            country: None,
            machine_id: None,
            since: None,
            until: None,
        };
        assert!(build_query(params).is_err());
    }

    #[test]
    fn bad_country_code_is_invalid_input() {
        let params = AlertListParams {
            limit: None,
            offset: None,
            scenario: None,
            country: Some("usa".to_string()),
            machine_id: None,
            since: None,
            until: None,
        };
        assert!(build_query(params).is_err());
    }

    #[test]
    fn valid_server_name_rejects_special_characters() {
        assert!(valid_server_name("lapi-1"));
        assert!(!valid_server_name("lapi 1"));
        assert!(!valid_server_name(""));
    }
}
