//! Embedded backend: SQLite via `sqlx`, in WAL mode with foreign keys and a
//! busy timeout, file permissions locked down.
//!
//! Pool construction follows the same `create_pool` + `sqlx::migrate!`
//! shape as the relational backend, generalized from Postgres-only to also
//! cover this dialect.

use super::models::*;
use super::Store;
use crate::error::{CrowdSieveError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(path: &str) -> Result<Self> {
        let db_path = Path::new(path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CrowdSieveError::StorageError(format!("creating {}: {e}", parent.display())))?;
                harden_dir_permissions(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;

        sqlx::migrate!("./src/storage/migrations/embedded")
            .run(&pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;

        harden_file_permissions(db_path)?;

        Ok(Self { pool })
    }
}

#[cfg(unix)]
fn harden_dir_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| CrowdSieveError::StorageError(format!("chmod {}: {e}", dir.display())))
}

#[cfg(not(unix))]
fn harden_dir_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn harden_file_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if path.exists() {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| CrowdSieveError::StorageError(format!("chmod {}: {e}", path.display())))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn harden_file_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CrowdSieveError::StorageError(format!("bad timestamp {s}: {e}")))
}

fn row_to_alert(row: &sqlx::sqlite::SqliteRow) -> Result<Alert> {
    let map_err = |e: sqlx::Error| CrowdSieveError::StorageError(e.to_string());
    let reasons_raw: String = row.try_get("reasons").map_err(map_err)?;
    let raw_json_raw: String = row.try_get("raw_json").map_err(map_err)?;
    let received_at: String = row.try_get("received_at").map_err(map_err)?;
    let start_at: Option<String> = row.try_get("start_at").map_err(map_err)?;
    let stop_at: Option<String> = row.try_get("stop_at").map_err(map_err)?;
    let forwarded_at: Option<String> = row.try_get("forwarded_at").map_err(map_err)?;

    Ok(Alert {
        id: row.try_get("id").map_err(map_err)?,
        uuid: row.try_get("uuid").map_err(map_err)?,
        machine_id: row.try_get("machine_id").map_err(map_err)?,
        scenario: row.try_get("scenario").map_err(map_err)?,
        scenario_hash: row.try_get("scenario_hash").map_err(map_err)?,
        scenario_version: row.try_get("scenario_version").map_err(map_err)?,
        message: row.try_get("message").map_err(map_err)?,
        event_count: row.try_get("event_count").map_err(map_err)?,
        start_at: start_at.map(|s| parse_ts(&s)).transpose()?,
        stop_at: stop_at.map(|s| parse_ts(&s)).transpose()?,
        received_at: parse_ts(&received_at)?,
        forwarded_at: forwarded_at.map(|s| parse_ts(&s)).transpose()?,
        source_scope: row.try_get("source_scope").map_err(map_err)?,
        source_value: row.try_get("source_value").map_err(map_err)?,
        source_ip: row.try_get("source_ip").map_err(map_err)?,
        source_asn: row.try_get("source_asn").map_err(map_err)?,
        source_as_name: row.try_get("source_as_name").map_err(map_err)?,
        source_country: row.try_get("source_country").map_err(map_err)?,
        geo_country_code: row.try_get("geo_country_code").map_err(map_err)?,
        geo_country_name: row.try_get("geo_country_name").map_err(map_err)?,
        geo_city: row.try_get("geo_city").map_err(map_err)?,
        geo_region: row.try_get("geo_region").map_err(map_err)?,
        geo_lat: row.try_get("geo_lat").map_err(map_err)?,
        geo_lon: row.try_get("geo_lon").map_err(map_err)?,
        geo_timezone: row.try_get("geo_timezone").map_err(map_err)?,
        geo_isp: row.try_get("geo_isp").map_err(map_err)?,
        geo_org: row.try_get("geo_org").map_err(map_err)?,
        simulated: row.try_get::<i64, _>("simulated").map_err(map_err)? != 0,
        filtered: row.try_get::<i64, _>("filtered").map_err(map_err)? != 0,
        forwarded_to_capi: row.try_get::<i64, _>("forwarded_to_capi").map_err(map_err)? != 0,
        has_decisions: row.try_get::<i64, _>("has_decisions").map_err(map_err)? != 0,
        reasons: serde_json::from_str(&reasons_raw).unwrap_or(Value::Null),
        raw_json: serde_json::from_str(&raw_json_raw).unwrap_or(Value::Null),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_alerts(&self, alerts: &[NewAlert]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(alerts.len());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;

        for a in alerts {
            let has_decisions = false;
            let id: i64 = sqlx::query_scalar(
                r#"INSERT INTO alerts (
                    uuid, machine_id, scenario, scenario_hash, scenario_version, message, event_count,
                    start_at, stop_at, received_at, source_scope, source_value, source_ip, source_asn,
                    source_as_name, source_country, geo_country_code, geo_country_name, geo_city,
                    geo_region, geo_lat, geo_lon, geo_timezone, geo_isp, geo_org, simulated, filtered,
                    forwarded_to_capi, has_decisions, reasons, raw_json
                ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,0,?,?,?)
                RETURNING id"#,
            )
            .bind(&a.uuid)
            .bind(&a.machine_id)
            .bind(&a.scenario)
            .bind(&a.scenario_hash)
            .bind(&a.scenario_version)
            .bind(&a.message)
            .bind(a.event_count)
            .bind(a.start_at.map(fmt_ts))
            .bind(a.stop_at.map(fmt_ts))
            .bind(fmt_ts(Utc::now()))
            .bind(&a.source_scope)
            .bind(&a.source_value)
            .bind(&a.source_ip)
            .bind(a.source_asn)
            .bind(&a.source_as_name)
            .bind(&a.source_country)
            .bind(&a.geo_country_code)
            .bind(&a.geo_country_name)
            .bind(&a.geo_city)
            .bind(&a.geo_region)
            .bind(a.geo_lat)
            .bind(a.geo_lon)
            .bind(&a.geo_timezone)
            .bind(&a.geo_isp)
            .bind(&a.geo_org)
            .bind(a.simulated as i64)
            .bind(a.filtered as i64)
            .bind(has_decisions as i64)
            .bind(a.reasons.to_string())
            .bind(a.raw_json.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
            ids.push(id);
        }

        tx.commit()
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(ids)
    }

    async fn mark_forwarded(&self, ids: &[i64], forwarded_at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let ts = fmt_ts(forwarded_at);
        for id in ids {
            sqlx::query("UPDATE alerts SET forwarded_to_capi = 1, forwarded_at = ? WHERE id = ?")
                .bind(&ts)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        }
        Ok(())
    }

    async fn get_alert(&self, id: i64) -> Result<Option<Alert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        row.as_ref().map(row_to_alert).transpose()
    }

    async fn list_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>> {
        let mut sql = "SELECT * FROM alerts WHERE 1=1".to_string();
        if query.scenario.is_some() {
            sql.push_str(" AND scenario = ?");
        }
        if query.country.is_some() {
            sql.push_str(" AND geo_country_code = ?");
        }
        if query.machine_id.is_some() {
            sql.push_str(" AND machine_id = ?");
        }
        if query.since.is_some() {
            sql.push_str(" AND received_at >= ?");
        }
        if query.until.is_some() {
            sql.push_str(" AND received_at <= ?");
        }
        sql.push_str(" ORDER BY received_at DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql);
        if let Some(s) = &query.scenario {
            q = q.bind(s);
        }
        if let Some(c) = &query.country {
            q = q.bind(c);
        }
        if let Some(m) = &query.machine_id {
            q = q.bind(m);
        }
        if let Some(since) = query.since {
            q = q.bind(fmt_ts(since));
        }
        if let Some(until) = query.until {
            q = q.bind(fmt_ts(until));
        }
        q = q.bind(query.limit).bind(query.offset);

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        rows.iter().map(row_to_alert).collect()
    }

    async fn stats(&self) -> Result<Stats> {
        let row = sqlx::query(
            "SELECT COUNT(*) as total, \
             SUM(CASE WHEN filtered = 1 THEN 1 ELSE 0 END) as filtered, \
             SUM(CASE WHEN forwarded_to_capi = 1 THEN 1 ELSE 0 END) as forwarded \
             FROM alerts",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;

        let decisions_row = sqlx::query("SELECT COUNT(*) as total FROM decisions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;

        Ok(Stats {
            total_alerts: row.try_get::<i64, _>("total").unwrap_or(0),
            filtered_alerts: row.try_get::<Option<i64>, _>("filtered").ok().flatten().unwrap_or(0),
            forwarded_alerts: row.try_get::<Option<i64>, _>("forwarded").ok().flatten().unwrap_or(0),
            total_decisions: decisions_row.try_get::<i64, _>("total").unwrap_or(0),
        })
    }

    async fn stats_distribution(&self, since: DateTime<Utc>) -> Result<Vec<DistributionPoint>> {
        let rows = sqlx::query(
            "SELECT substr(received_at, 1, 10) as bucket, COUNT(*) as count \
             FROM alerts WHERE received_at >= ? GROUP BY bucket ORDER BY bucket",
        )
        .bind(fmt_ts(since))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;

        rows.iter()
            .map(|r| {
                let bucket_str: String = r.try_get("bucket").map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
                Ok(DistributionPoint {
                    bucket: parse_ts(&format!("{bucket_str}T00:00:00Z"))?,
                    count: r.try_get("count").map_err(|e| CrowdSieveError::StorageError(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn insert_decisions(&self, alert_id: i64, decisions: &[NewDecision]) -> Result<()> {
        if decisions.is_empty() {
            return Ok(());
        }
        for d in decisions {
            sqlx::query(
                "INSERT INTO decisions (alert_id, uuid, origin, decision_type, scope, value, duration, scenario, simulated, until) \
                 VALUES (?,?,?,?,?,?,?,?,?,?)",
            )
            .bind(alert_id)
            .bind(&d.uuid)
            .bind(&d.origin)
            .bind(&d.decision_type)
            .bind(&d.scope)
            .bind(&d.value)
            .bind(&d.duration)
            .bind(&d.scenario)
            .bind(d.simulated as i64)
            .bind(fmt_ts(d.until))
            .execute(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        }
        sqlx::query("UPDATE alerts SET has_decisions = 1 WHERE id = ?")
            .bind(alert_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn insert_events(&self, alert_id: i64, events: &[NewEvent]) -> Result<()> {
        for e in events {
            sqlx::query("INSERT INTO events (alert_id, timestamp, metadata) VALUES (?,?,?)")
                .bind(alert_id)
                .bind(fmt_ts(e.timestamp))
                .bind(e.metadata.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        }
        Ok(())
    }

    async fn get_validated_client(&self, token_hash: &str) -> Result<Option<ValidatedClient>> {
        let row = sqlx::query("SELECT * FROM validated_clients WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        let Some(row) = row else { return Ok(None) };
        let map_err = |e: sqlx::Error| CrowdSieveError::StorageError(e.to_string());
        let validated_at: String = row.try_get("validated_at").map_err(map_err)?;
        let expires_at: String = row.try_get("expires_at").map_err(map_err)?;
        let last_accessed_at: String = row.try_get("last_accessed_at").map_err(map_err)?;
        Ok(Some(ValidatedClient {
            token_hash: row.try_get("token_hash").map_err(map_err)?,
            machine_id: row.try_get("machine_id").map_err(map_err)?,
            validated_at: parse_ts(&validated_at)?,
            expires_at: parse_ts(&expires_at)?,
            last_accessed_at: parse_ts(&last_accessed_at)?,
            access_count: row.try_get("access_count").map_err(map_err)?,
        }))
    }

    async fn upsert_validated_client(
        &self,
        token_hash: &str,
        machine_id: Option<&str>,
        validated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO validated_clients (token_hash, machine_id, validated_at, expires_at, last_accessed_at, access_count) \
             VALUES (?,?,?,?,?,1) \
             ON CONFLICT(token_hash) DO UPDATE SET \
               machine_id = excluded.machine_id, \
               validated_at = excluded.validated_at, \
               expires_at = excluded.expires_at, \
               last_accessed_at = excluded.last_accessed_at, \
               access_count = validated_clients.access_count + 1",
        )
        .bind(token_hash)
        .bind(machine_id)
        .bind(fmt_ts(validated_at))
        .bind(fmt_ts(expires_at))
        .bind(fmt_ts(validated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn touch_validated_client(&self, token_hash: &str, accessed_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE validated_clients SET last_accessed_at = ?, access_count = access_count + 1 WHERE token_hash = ?",
        )
        .bind(fmt_ts(accessed_at))
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn evict_expired_validated_clients(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM validated_clients WHERE expires_at < ?")
            .bind(fmt_ts(now))
            .execute(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn start_analyzer_run(&self, run: &NewAnalyzerRun) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO analyzer_runs (analyzer_id, started_at) VALUES (?, ?) RETURNING id",
        )
        .bind(&run.analyzer_id)
        .bind(fmt_ts(run.started_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(id)
    }

    async fn finish_analyzer_run(&self, run_id: i64, finished: &FinishedAnalyzerRun) -> Result<()> {
        let status = match finished.status {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        };
        sqlx::query(
            "UPDATE analyzer_runs SET ended_at = ?, status = ?, logs_fetched = ?, alerts_generated = ?, \
             decisions_pushed = ?, error_message = ?, detections = ?, push_outcomes = ? WHERE id = ?",
        )
        .bind(fmt_ts(finished.ended_at))
        .bind(status)
        .bind(finished.logs_fetched)
        .bind(finished.alerts_generated)
        .bind(finished.decisions_pushed)
        .bind(&finished.error_message)
        .bind(finished.detections.to_string())
        .bind(finished.push_outcomes.to_string())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn insert_analyzer_results(&self, run_id: i64, results: &[NewAnalyzerResult]) -> Result<()> {
        for r in results {
            sqlx::query(
                "INSERT INTO analyzer_results (run_id, source_ip, distinct_count, total_count, first_seen, last_seen, decision_pushed) \
                 VALUES (?,?,?,?,?,?,?)",
            )
            .bind(run_id)
            .bind(&r.source_ip)
            .bind(r.distinct_count)
            .bind(r.total_count)
            .bind(fmt_ts(r.first_seen))
            .bind(fmt_ts(r.last_seen))
            .bind(r.decision_pushed as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        }
        Ok(())
    }

    async fn latest_analyzer_run(&self, analyzer_id: &str) -> Result<Option<AnalyzerRun>> {
        let row = sqlx::query(
            "SELECT * FROM analyzer_runs WHERE analyzer_id = ? ORDER BY started_at DESC LIMIT 1",
        )
        .bind(analyzer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        let Some(row) = row else { return Ok(None) };
        let map_err = |e: sqlx::Error| CrowdSieveError::StorageError(e.to_string());
        let started_at: String = row.try_get("started_at").map_err(map_err)?;
        let ended_at: Option<String> = row.try_get("ended_at").map_err(map_err)?;
        let status: Option<String> = row.try_get("status").map_err(map_err)?;
        let detections: String = row.try_get("detections").map_err(map_err)?;
        let push_outcomes: String = row.try_get("push_outcomes").map_err(map_err)?;
        Ok(Some(AnalyzerRun {
            id: row.try_get("id").map_err(map_err)?,
            analyzer_id: row.try_get("analyzer_id").map_err(map_err)?,
            started_at: parse_ts(&started_at)?,
            ended_at: ended_at.map(|s| parse_ts(&s)).transpose()?,
            status: status.map(|s| match s.as_str() {
                "success" => RunStatus::Success,
                _ => RunStatus::Error,
            }),
            logs_fetched: row.try_get("logs_fetched").map_err(map_err)?,
            alerts_generated: row.try_get("alerts_generated").map_err(map_err)?,
            decisions_pushed: row.try_get("decisions_pushed").map_err(map_err)?,
            error_message: row.try_get("error_message").map_err(map_err)?,
            detections: serde_json::from_str(&detections).unwrap_or(Value::Null),
            push_outcomes: serde_json::from_str(&push_outcomes).unwrap_or(Value::Null),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_tmp() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crowdsieve.db");
        let store = SqliteStore::open(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    fn sample_alert() -> NewAlert {
        NewAlert {
            uuid: Some("abc".to_string()),
            machine_id: Some("machine-1".to_string()),
            scenario: "crowdsecurity/ssh-bf".to_string(),
            scenario_hash: None,
            scenario_version: None,
            message: None,
            event_count: 1,
            start_at: None,
            stop_at: None,
            source_scope: "ip".to_string(),
            source_value: "1.2.3.4".to_string(),
            source_ip: Some("1.2.3.4".to_string()),
            source_asn: None,
            source_as_name: None,
            source_country: None,
            geo_country_code: Some("US".to_string()),
            geo_country_name: None,
            geo_city: None,
            geo_region: None,
            geo_lat: None,
            geo_lon: None,
            geo_timezone: None,
            geo_isp: None,
            geo_org: None,
            simulated: false,
            filtered: false,
            reasons: Value::Array(vec![]),
            raw_json: serde_json::json!({"scenario": "crowdsecurity/ssh-bf"}),
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_roundtrips_raw_json() {
        let (store, _dir) = open_tmp().await;
        let ids = store.insert_alerts(&[sample_alert()]).await.unwrap();
        assert_eq!(ids.len(), 1);
        let fetched = store.get_alert(ids[0]).await.unwrap().unwrap();
        assert_eq!(fetched.raw_json, serde_json::json!({"scenario": "crowdsecurity/ssh-bf"}));
    }

    #[tokio::test]
    async fn mark_forwarded_sets_flag() {
        let (store, _dir) = open_tmp().await;
        let ids = store.insert_alerts(&[sample_alert()]).await.unwrap();
        store.mark_forwarded(&ids, Utc::now()).await.unwrap();
        let fetched = store.get_alert(ids[0]).await.unwrap().unwrap();
        assert!(fetched.forwarded_to_capi);
        assert!(fetched.forwarded_at.is_some());
    }

    #[tokio::test]
    async fn decisions_cascade_delete_with_alert() {
        let (store, _dir) = open_tmp().await;
        let ids = store.insert_alerts(&[sample_alert()]).await.unwrap();
        store
            .insert_decisions(
                ids[0],
                &[NewDecision {
                    uuid: None,
                    origin: "crowdsieve".to_string(),
                    decision_type: "ban".to_string(),
                    scope: "ip".to_string(),
                    value: "1.2.3.4".to_string(),
                    duration: "4h".to_string(),
                    scenario: None,
                    simulated: false,
                    until: Utc::now(),
                }],
            )
            .await
            .unwrap();
        let fetched = store.get_alert(ids[0]).await.unwrap().unwrap();
        assert!(fetched.has_decisions);
    }

    #[tokio::test]
    async fn validated_client_upsert_then_touch() {
        let (store, _dir) = open_tmp().await;
        let now = Utc::now();
        store
            .upsert_validated_client("hash1", Some("m1"), now, now + chrono::Duration::hours(1))
            .await
            .unwrap();
        store.touch_validated_client("hash1", now).await.unwrap();
        let client = store.get_validated_client("hash1").await.unwrap().unwrap();
        assert_eq!(client.access_count, 2);
    }
}
