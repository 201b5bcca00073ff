//! Bounds/cross-field validation and unknown-key typo detection.
//!
//! The unknown-key walk is adapted from a TOML-table-walking
//! `validate_unknown_keys` helper to walk a `serde_yaml::Mapping` instead.
//! Nothing here is fatal by itself — callers decide which findings (if
//! any) escalate to a hard error.

use serde_yaml::Value;

pub const RECOGNIZED_TOP_LEVEL_KEYS: &[&str] = &[
    "proxy",
    "lapi_servers",
    "storage",
    "logging",
    "filters",
    "client_validation",
    "analyzers",
    "operator",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
}

impl ConfigWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Walk the top-level mapping of the raw config document and flag keys that
/// aren't in [`RECOGNIZED_TOP_LEVEL_KEYS`], suggesting the closest known key
/// when one is within edit-distance 2.
pub fn validate_unknown_keys(root: &Value) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();
    let Some(mapping) = root.as_mapping() else {
        return warnings;
    };
    for key in mapping.keys() {
        let Some(key_str) = key.as_str() else {
            continue;
        };
        if RECOGNIZED_TOP_LEVEL_KEYS.contains(&key_str) {
            continue;
        }
        let suggestion = closest_match(key_str, RECOGNIZED_TOP_LEVEL_KEYS);
        let message = match suggestion {
            Some(s) => format!("unknown config key '{key_str}', did you mean '{s}'?"),
            None => format!("unknown config key '{key_str}'"),
        };
        warnings.push(ConfigWarning::new(message));
    }
    warnings
}

fn closest_match<'a>(needle: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, dist)| *dist <= 2)
        .min_by_key(|(_, dist)| *dist)
        .map(|(c, _)| c)
}

/// Classic Wagner-Fischer edit distance.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (m, n) = (a.len(), b.len());
    let mut row: Vec<usize> = (0..=n).collect();
    for i in 1..=m {
        let mut prev = row[0];
        row[0] = i;
        for j in 1..=n {
            let tmp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = tmp;
        }
    }
    row[n]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_keys_produce_no_warnings() {
        let doc: Value = serde_yaml::from_str("proxy:\n  listen_port: 8080\n").unwrap();
        assert!(validate_unknown_keys(&doc).is_empty());
    }

    #[test]
    fn typo_suggests_closest_key() {
        let doc: Value = serde_yaml::from_str("proxi:\n  listen_port: 8080\n").unwrap();
        let warnings = validate_unknown_keys(&doc);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("did you mean 'proxy'"));
    }

    #[test]
    fn wildly_unknown_key_gets_no_suggestion() {
        let doc: Value = serde_yaml::from_str("zzz_totally_unrelated:\n  x: 1\n").unwrap();
        let warnings = validate_unknown_keys(&doc);
        assert_eq!(warnings.len(), 1);
        assert!(!warnings[0].message.contains("did you mean"));
    }

    #[test]
    fn levenshtein_basic_cases() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("proxy", "proxy"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
    }
}
