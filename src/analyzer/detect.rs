//! Group, threshold, and whitelist logic for one analyzer run.

use super::config::DetectionConfig;
use super::loki::LogEntry;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

pub struct Detection {
    pub key: String,
    pub distinct_count: i64,
    pub total_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

struct GroupState {
    count: i64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    distinct: HashSet<String>,
}

/// Group log entries by `detection.groupby`, apply the threshold, and sort
/// survivors by distinct count descending.
pub fn group_and_threshold(entries: &[LogEntry], detection: &DetectionConfig) -> Vec<Detection> {
    let mut groups: HashMap<String, GroupState> = HashMap::new();

    for entry in entries {
        let Some(key) = entry.fields.get(&detection.groupby).and_then(|v| v.as_str()) else {
            continue;
        };
        let state = groups.entry(key.to_string()).or_insert_with(|| GroupState {
            count: 0,
            first_seen: entry.timestamp,
            last_seen: entry.timestamp,
            distinct: HashSet::new(),
        });
        state.count += 1;
        state.first_seen = state.first_seen.min(entry.timestamp);
        state.last_seen = state.last_seen.max(entry.timestamp);
        if let Some(distinct_field) = &detection.distinct {
            if let Some(v) = entry.fields.get(distinct_field).and_then(|v| v.as_str()) {
                state.distinct.insert(v.to_string());
            }
        }
    }

    let mut detections: Vec<Detection> = groups
        .into_iter()
        .filter_map(|(key, state)| {
            let compare_value = if detection.distinct.is_some() {
                state.distinct.len() as i64
            } else {
                state.count
            };
            if !detection.operator.compare(compare_value, detection.threshold) {
                return None;
            }
            Some(Detection {
                key,
                distinct_count: state.distinct.len() as i64,
                total_count: state.count,
                first_seen: state.first_seen,
                last_seen: state.last_seen,
            })
        })
        .collect();

    detections.sort_by(|a, b| b.distinct_count.cmp(&a.distinct_count));
    detections
}

/// Whitelist entries are individual IPs or CIDR ranges, v4 and v6, exact
/// match for non-CIDR entries.
pub fn is_whitelisted(key: &str, whitelist: &[String]) -> bool {
    let Ok(ip) = key.parse::<IpAddr>() else {
        return whitelist.iter().any(|w| w == key);
    };
    whitelist.iter().any(|entry| {
        if let Ok(net) = entry.parse::<IpNet>() {
            net.contains(&ip)
        } else {
            entry == key
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::config::ThresholdOperator;
    use serde_json::json;

    fn entry(ts: i64, ip: &str, user: &str) -> LogEntry {
        LogEntry {
            raw: String::new(),
            timestamp: DateTime::from_timestamp(ts, 0).unwrap(),
            fields: json!({"source_ip": ip, "username": user}),
        }
    }

    #[test]
    fn cidr_whitelist_suppresses_analyzer_detections() {
        let entries = vec![
            entry(1, "10.0.0.1", "a"),
            entry(2, "10.0.0.1", "b"),
            entry(3, "10.0.0.1", "c"),
            entry(4, "8.8.8.8", "x"),
            entry(5, "8.8.8.8", "y"),
            entry(6, "8.8.8.8", "z"),
        ];
        let detection = DetectionConfig {
            groupby: "source_ip".to_string(),
            distinct: Some("username".to_string()),
            threshold: 2,
            operator: ThresholdOperator::Gte,
        };
        let mut detections = group_and_threshold(&entries, &detection);
        let whitelist = vec!["10.0.0.0/8".to_string()];
        detections.retain(|d| !is_whitelisted(&d.key, &whitelist));

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].key, "8.8.8.8");
    }

    #[test]
    fn exact_match_whitelist_for_non_cidr() {
        assert!(is_whitelisted("1.2.3.4", &["1.2.3.4".to_string()]));
        assert!(!is_whitelisted("1.2.3.5", &["1.2.3.4".to_string()]));
    }

    #[test]
    fn detections_sorted_by_distinct_count_descending() {
        let entries = vec![
            entry(1, "1.1.1.1", "a"),
            entry(2, "2.2.2.2", "a"),
            entry(3, "2.2.2.2", "b"),
            entry(4, "2.2.2.2", "c"),
        ];
        let detection = DetectionConfig {
            groupby: "source_ip".to_string(),
            distinct: Some("username".to_string()),
            threshold: 1,
            operator: ThresholdOperator::Gte,
        };
        let detections = group_and_threshold(&entries, &detection);
        assert_eq!(detections[0].key, "2.2.2.2");
    }
}
