//! Parses one CrowdSec-shaped alert object out of the raw JSON
//! body of a signals batch, and serializes survivors back for forwarding.

use crate::error::{CrowdSieveError, Result};
use crate::storage::models::{NewAlert, NewDecision, NewEvent};
use chrono::{DateTime, Utc};
use serde_json::Value;

pub struct ParsedAlert {
    pub new_alert: NewAlert,
    pub decisions: Vec<NewDecision>,
    pub events: Vec<NewEvent>,
    pub raw: Value,
}

pub fn parse_alert(raw: &Value, machine_id: Option<&str>) -> Result<ParsedAlert> {
    let obj = raw
        .as_object()
        .ok_or_else(|| CrowdSieveError::InvalidInput("alert must be a JSON object".to_string()))?;

    let scenario = obj
        .get("scenario")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CrowdSieveError::InvalidInput("alert.scenario is required".to_string()))?
        .to_string();

    let source = obj
        .get("source")
        .and_then(|v| v.as_object())
        .ok_or_else(|| CrowdSieveError::InvalidInput("alert.source is required".to_string()))?;
    let source_scope = source
        .get("scope")
        .and_then(|v| v.as_str())
        .unwrap_or("ip")
        .to_string();
    let source_value = source
        .get("value")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CrowdSieveError::InvalidInput("alert.source.value is required".to_string()))?
        .to_string();
    let source_ip = source.get("ip").and_then(|v| v.as_str()).map(str::to_string);

    let decisions = obj
        .get("decisions")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(parse_decision).collect())
        .unwrap_or_default();
    let events = obj
        .get("events")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(parse_event).collect())
        .unwrap_or_default();

    let new_alert = NewAlert {
        uuid: obj.get("uuid").and_then(|v| v.as_str()).map(str::to_string),
        machine_id: machine_id.map(str::to_string),
        scenario,
        scenario_hash: obj.get("scenario_hash").and_then(|v| v.as_str()).map(str::to_string),
        scenario_version: obj.get("scenario_version").and_then(|v| v.as_str()).map(str::to_string),
        message: obj.get("message").and_then(|v| v.as_str()).map(str::to_string),
        event_count: obj.get("events_count").and_then(|v| v.as_i64()).unwrap_or(0),
        start_at: obj.get("start_at").and_then(|v| v.as_str()).and_then(parse_rfc3339),
        stop_at: obj.get("stop_at").and_then(|v| v.as_str()).and_then(parse_rfc3339),
        source_scope,
        source_value,
        source_ip,
        source_asn: source.get("as_number").and_then(|v| v.as_i64()),
        source_as_name: source.get("as_name").and_then(|v| v.as_str()).map(str::to_string),
        source_country: source.get("cn").and_then(|v| v.as_str()).map(str::to_string),
        geo_country_code: None,
        geo_country_name: None,
        geo_city: None,
        geo_region: None,
        geo_lat: source.get("latitude").and_then(|v| v.as_f64()),
        geo_lon: source.get("longitude").and_then(|v| v.as_f64()),
        geo_timezone: None,
        geo_isp: None,
        geo_org: None,
        simulated: obj.get("simulated").and_then(|v| v.as_bool()).unwrap_or(false),
        filtered: false,
        reasons: Value::Array(vec![]),
        raw_json: raw.clone(),
    };

    Ok(ParsedAlert {
        new_alert,
        decisions,
        events,
        raw: raw.clone(),
    })
}

fn parse_decision(v: &Value) -> Option<NewDecision> {
    let obj = v.as_object()?;
    Some(NewDecision {
        uuid: obj.get("uuid").and_then(|v| v.as_str()).map(str::to_string),
        origin: obj.get("origin").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        decision_type: obj.get("type").and_then(|v| v.as_str()).unwrap_or("ban").to_string(),
        scope: obj.get("scope").and_then(|v| v.as_str()).unwrap_or("ip").to_string(),
        value: obj.get("value").and_then(|v| v.as_str())?.to_string(),
        duration: obj.get("duration").and_then(|v| v.as_str()).unwrap_or("4h").to_string(),
        scenario: obj.get("scenario").and_then(|v| v.as_str()).map(str::to_string),
        simulated: obj.get("simulated").and_then(|v| v.as_bool()).unwrap_or(false),
        until: obj
            .get("until")
            .and_then(|v| v.as_str())
            .and_then(parse_rfc3339)
            .unwrap_or_else(Utc::now),
    })
}

fn parse_event(v: &Value) -> Option<NewEvent> {
    let obj = v.as_object()?;
    Some(NewEvent {
        timestamp: obj
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(parse_rfc3339)
            .unwrap_or_else(Utc::now),
        metadata: obj.get("meta").cloned().unwrap_or(Value::Null),
    })
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_alert() {
        let raw = json!({
            "scenario": "crowdsecurity/ssh-bf",
            "source": {"scope": "ip", "value": "1.2.3.4"}
        });
        let parsed = parse_alert(&raw, Some("m1")).unwrap();
        assert_eq!(parsed.new_alert.scenario, "crowdsecurity/ssh-bf");
        assert_eq!(parsed.new_alert.machine_id.as_deref(), Some("m1"));
    }

    #[test]
    fn missing_scenario_is_invalid_input() {
        let raw = json!({"source": {"scope": "ip", "value": "1.2.3.4"}});
        let err = parse_alert(&raw, None).unwrap_err();
        assert!(matches!(err, CrowdSieveError::InvalidInput(_)));
    }

    #[test]
    fn embedded_decisions_and_events_parse() {
        let raw = json!({
            "scenario": "crowdsecurity/ssh-bf",
            "source": {"scope": "ip", "value": "1.2.3.4"},
            "decisions": [{"type": "ban", "scope": "ip", "value": "1.2.3.4", "duration": "4h", "origin": "crowdsec"}],
            "events": [{"timestamp": "2026-01-01T00:00:00Z", "meta": {"k": "v"}}]
        });
        let parsed = parse_alert(&raw, None).unwrap();
        assert_eq!(parsed.decisions.len(), 1);
        assert_eq!(parsed.events.len(), 1);
    }
}
