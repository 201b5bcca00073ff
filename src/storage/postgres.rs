//! Relational backend: Postgres via `sqlx`, grounded directly on the
//! teacher's `hub::db::create_pool` / `run_migrations` pair.

use super::models::*;
use super::Store;
use crate::error::{CrowdSieveError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;

        sqlx::migrate!("./src/storage/migrations/relational")
            .run(&pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;

        Ok(Self { pool })
    }
}

fn row_to_alert(row: &sqlx::postgres::PgRow) -> Result<Alert> {
    let map_err = |e: sqlx::Error| CrowdSieveError::StorageError(e.to_string());
    Ok(Alert {
        id: row.try_get("id").map_err(map_err)?,
        uuid: row.try_get("uuid").map_err(map_err)?,
        machine_id: row.try_get("machine_id").map_err(map_err)?,
        scenario: row.try_get("scenario").map_err(map_err)?,
        scenario_hash: row.try_get("scenario_hash").map_err(map_err)?,
        scenario_version: row.try_get("scenario_version").map_err(map_err)?,
        message: row.try_get("message").map_err(map_err)?,
        event_count: row.try_get("event_count").map_err(map_err)?,
        start_at: row.try_get("start_at").map_err(map_err)?,
        stop_at: row.try_get("stop_at").map_err(map_err)?,
        received_at: row.try_get("received_at").map_err(map_err)?,
        forwarded_at: row.try_get("forwarded_at").map_err(map_err)?,
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
        simulated: row.try_get("simulated").map_err(map_err)?,
        filtered: row.try_get("filtered").map_err(map_err)?,
        forwarded_to_capi: row.try_get("forwarded_to_capi").map_err(map_err)?,
        has_decisions: row.try_get("has_decisions").map_err(map_err)?,
        reasons: row.try_get("reasons").map_err(map_err)?,
        raw_json: row.try_get("raw_json").map_err(map_err)?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn insert_alerts(&self, alerts: &[NewAlert]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(alerts.len());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;

        for a in alerts {
            let id: i64 = sqlx::query_scalar(
                r#"INSERT INTO alerts (
                    uuid, machine_id, scenario, scenario_hash, scenario_version, message, event_count,
                    start_at, stop_at, received_at, source_scope, source_value, source_ip, source_asn,
                    source_as_name, source_country, geo_country_code, geo_country_name, geo_city,
                    geo_region, geo_lat, geo_lon, geo_timezone, geo_isp, geo_org, simulated, filtered,
                    forwarded_to_capi, has_decisions, reasons, raw_json
                ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,now(),$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24,$25,$26,false,false,$27,$28)
                RETURNING id"#,
            )
            .bind(&a.uuid)
            .bind(&a.machine_id)
            .bind(&a.scenario)
            .bind(&a.scenario_hash)
            .bind(&a.scenario_version)
            .bind(&a.message)
            .bind(a.event_count)
            .bind(a.start_at)
            .bind(a.stop_at)
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
            .bind(a.simulated)
            .bind(a.filtered)
            .bind(&a.reasons)
            .bind(&a.raw_json)
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
        sqlx::query("UPDATE alerts SET forwarded_to_capi = true, forwarded_at = $1 WHERE id = ANY($2)")
            .bind(forwarded_at)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn get_alert(&self, id: i64) -> Result<Option<Alert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        row.as_ref().map(row_to_alert).transpose()
    }

    async fn list_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>> {
        let mut sql = "SELECT * FROM alerts WHERE 1=1".to_string();
        let mut idx = 1;
        let mut clauses = Vec::new();
        if query.scenario.is_some() {
            clauses.push(format!(" AND scenario = ${idx}"));
            idx += 1;
        }
        if query.country.is_some() {
            clauses.push(format!(" AND geo_country_code = ${idx}"));
            idx += 1;
        }
        if query.machine_id.is_some() {
            clauses.push(format!(" AND machine_id = ${idx}"));
            idx += 1;
        }
        if query.since.is_some() {
            clauses.push(format!(" AND received_at >= ${idx}"));
            idx += 1;
        }
        if query.until.is_some() {
            clauses.push(format!(" AND received_at <= ${idx}"));
            idx += 1;
        }
        for c in &clauses {
            sql.push_str(c);
        }
        sql.push_str(&format!(" ORDER BY received_at DESC LIMIT ${idx} OFFSET ${}", idx + 1));

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
            q = q.bind(since);
        }
        if let Some(until) = query.until {
            q = q.bind(until);
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
             COUNT(*) FILTER (WHERE filtered) as filtered, \
             COUNT(*) FILTER (WHERE forwarded_to_capi) as forwarded \
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
            total_alerts: row.try_get("total").unwrap_or(0),
            filtered_alerts: row.try_get("filtered").unwrap_or(0),
            forwarded_alerts: row.try_get("forwarded").unwrap_or(0),
            total_decisions: decisions_row.try_get("total").unwrap_or(0),
        })
    }

    async fn stats_distribution(&self, since: DateTime<Utc>) -> Result<Vec<DistributionPoint>> {
        let rows = sqlx::query(
            "SELECT date_trunc('day', received_at) as bucket, COUNT(*) as count \
             FROM alerts WHERE received_at >= $1 GROUP BY bucket ORDER BY bucket",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        rows.iter()
            .map(|r| {
                Ok(DistributionPoint {
                    bucket: r.try_get("bucket").map_err(|e| CrowdSieveError::StorageError(e.to_string()))?,
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
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
            )
            .bind(alert_id)
            .bind(&d.uuid)
            .bind(&d.origin)
            .bind(&d.decision_type)
            .bind(&d.scope)
            .bind(&d.value)
            .bind(&d.duration)
            .bind(&d.scenario)
            .bind(d.simulated)
            .bind(d.until)
            .execute(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        }
        sqlx::query("UPDATE alerts SET has_decisions = true WHERE id = $1")
            .bind(alert_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn insert_events(&self, alert_id: i64, events: &[NewEvent]) -> Result<()> {
        for e in events {
            sqlx::query("INSERT INTO events (alert_id, timestamp, metadata) VALUES ($1,$2,$3)")
                .bind(alert_id)
                .bind(e.timestamp)
                .bind(&e.metadata)
                .execute(&self.pool)
                .await
                .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        }
        Ok(())
    }

    async fn get_validated_client(&self, token_hash: &str) -> Result<Option<ValidatedClient>> {
        let row = sqlx::query_as::<_, PgValidatedClientRow>(
            "SELECT * FROM validated_clients WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(row.map(Into::into))
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
             VALUES ($1,$2,$3,$4,$5,1) \
             ON CONFLICT (token_hash) DO UPDATE SET \
               machine_id = excluded.machine_id, \
               validated_at = excluded.validated_at, \
               expires_at = excluded.expires_at, \
               last_accessed_at = excluded.last_accessed_at, \
               access_count = validated_clients.access_count + 1",
        )
        .bind(token_hash)
        .bind(machine_id)
        .bind(validated_at)
        .bind(expires_at)
        .bind(validated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn touch_validated_client(&self, token_hash: &str, accessed_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE validated_clients SET last_accessed_at = $1, access_count = access_count + 1 WHERE token_hash = $2",
        )
        .bind(accessed_at)
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn evict_expired_validated_clients(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM validated_clients WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn start_analyzer_run(&self, run: &NewAnalyzerRun) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO analyzer_runs (analyzer_id, started_at) VALUES ($1, $2) RETURNING id",
        )
        .bind(&run.analyzer_id)
        .bind(run.started_at)
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
            "UPDATE analyzer_runs SET ended_at = $1, status = $2, logs_fetched = $3, alerts_generated = $4, \
             decisions_pushed = $5, error_message = $6, detections = $7, push_outcomes = $8 WHERE id = $9",
        )
        .bind(finished.ended_at)
        .bind(status)
        .bind(finished.logs_fetched)
        .bind(finished.alerts_generated)
        .bind(finished.decisions_pushed)
        .bind(&finished.error_message)
        .bind(&finished.detections)
        .bind(&finished.push_outcomes)
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
                 VALUES ($1,$2,$3,$4,$5,$6,$7)",
            )
            .bind(run_id)
            .bind(&r.source_ip)
            .bind(r.distinct_count)
            .bind(r.total_count)
            .bind(r.first_seen)
            .bind(r.last_seen)
            .bind(r.decision_pushed)
            .execute(&self.pool)
            .await
            .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        }
        Ok(())
    }

    async fn latest_analyzer_run(&self, analyzer_id: &str) -> Result<Option<AnalyzerRun>> {
        let row = sqlx::query(
            "SELECT * FROM analyzer_runs WHERE analyzer_id = $1 ORDER BY started_at DESC LIMIT 1",
        )
        .bind(analyzer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrowdSieveError::StorageError(e.to_string()))?;
        let Some(row) = row else { return Ok(None) };
        let map_err = |e: sqlx::Error| CrowdSieveError::StorageError(e.to_string());
        let status: Option<String> = row.try_get("status").map_err(map_err)?;
        Ok(Some(AnalyzerRun {
            id: row.try_get("id").map_err(map_err)?,
            analyzer_id: row.try_get("analyzer_id").map_err(map_err)?,
            started_at: row.try_get("started_at").map_err(map_err)?,
            ended_at: row.try_get("ended_at").map_err(map_err)?,
            status: status.map(|s| match s.as_str() {
                "success" => RunStatus::Success,
                _ => RunStatus::Error,
            }),
            logs_fetched: row.try_get("logs_fetched").map_err(map_err)?,
            alerts_generated: row.try_get("alerts_generated").map_err(map_err)?,
            decisions_pushed: row.try_get("decisions_pushed").map_err(map_err)?,
            error_message: row.try_get("error_message").map_err(map_err)?,
            detections: row.try_get("detections").map_err(map_err)?,
            push_outcomes: row.try_get("push_outcomes").map_err(map_err)?,
        }))
    }
}

#[derive(sqlx::FromRow)]
struct PgValidatedClientRow {
    token_hash: String,
    machine_id: Option<String>,
    validated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    access_count: i64,
}

impl From<PgValidatedClientRow> for ValidatedClient {
    fn from(r: PgValidatedClientRow) -> Self {
        ValidatedClient {
            token_hash: r.token_hash,
            machine_id: r.machine_id,
            validated_at: r.validated_at,
            expires_at: r.expires_at,
            last_accessed_at: r.last_accessed_at,
            access_count: r.access_count,
        }
    }
}
