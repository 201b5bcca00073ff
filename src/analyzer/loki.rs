//! Fetches logs from a Loki-compatible log store.

use crate::config::SourceConfig;
use crate::error::{CrowdSieveError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub struct LogEntry {
    pub raw: String,
    pub timestamp: DateTime<Utc>,
    pub fields: Value,
}

pub struct LokiClient {
    http: reqwest::Client,
}

impl LokiClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub async fn fetch(
        &self,
        source: &SourceConfig,
        query: &str,
        lookback: Duration,
        max_lines: usize,
        timeout: Duration,
        extraction_fields: &std::collections::HashMap<String, String>,
    ) -> Result<Vec<LogEntry>> {
        let end = Utc::now();
        let start = end - chrono::Duration::from_std(lookback).unwrap_or_default();

        let url = format!("{}/loki/api/v1/query_range", source.grafana_url.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&source.token)
            .query(&[
                ("query", query.to_string()),
                ("start", (start.timestamp_nanos_opt().unwrap_or(0)).to_string()),
                ("end", (end.timestamp_nanos_opt().unwrap_or(0)).to_string()),
                ("limit", max_lines.to_string()),
                ("direction", "forward".to_string()),
            ])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CrowdSieveError::UpstreamTimeout(format!("loki fetch timed out: {e}"))
                } else {
                    CrowdSieveError::UpstreamError(format!("loki fetch failed: {e}"))
                }
            })?;

        if !resp.status().is_success() {
            return Err(CrowdSieveError::UpstreamError(format!(
                "loki returned {}",
                resp.status()
            )));
        }

        let payload: LokiQueryResponse = resp
            .json()
            .await
            .map_err(|e| CrowdSieveError::UpstreamError(format!("invalid loki response: {e}")))?;

        let mut entries = Vec::new();
        for stream in payload.data.result {
            for [ts_ns, line] in stream.values.iter().filter_map(|v| <[String; 2]>::try_from(v.clone()).ok()) {
                let timestamp = ts_ns
                    .parse::<i64>()
                    .ok()
                    .and_then(|ns| DateTime::from_timestamp(ns / 1_000_000_000, (ns % 1_000_000_000) as u32))
                    .unwrap_or(end);
                let fields = extract_fields(&line, extraction_fields);
                entries.push(LogEntry {
                    raw: line,
                    timestamp,
                    fields,
                });
                if entries.len() >= max_lines {
                    return Ok(entries);
                }
            }
        }

        Ok(entries)
    }
}

impl Default for LokiClient {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_fields(line: &str, mapping: &std::collections::HashMap<String, String>) -> Value {
    let Ok(parsed) = serde_json::from_str::<Value>(line) else {
        return Value::Null;
    };
    let mut out = serde_json::Map::new();
    for (output, input) in mapping {
        if let Some(v) = crate::filters::value::resolve(&parsed, input) {
            out.insert(output.clone(), v.clone());
        }
    }
    Value::Object(out)
}

#[derive(Deserialize)]
struct LokiQueryResponse {
    data: LokiData,
}

#[derive(Deserialize)]
struct LokiData {
    result: Vec<LokiStream>,
}

#[derive(Deserialize)]
struct LokiStream {
    values: Vec<Vec<String>>,
}
