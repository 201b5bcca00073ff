//! Field operators. Every matcher here is a total
//! function — non-numeric operands on a numeric comparison, or an
//! unresolved field, simply evaluate to `false` rather than failing. That is
//! what satisfies the "exception inside one rule is swallowed" requirement:
//! there is no fallible step left to swallow.

use super::value;
use globset::GlobSet;
use ipnet::IpNet;
use regex::Regex;
use serde_json::Value;
use std::net::IpAddr;

pub const MAX_REGEX_LEN: usize = 500;

#[derive(Debug)]
pub enum Matcher {
    Eq(Value),
    Ne(Value),
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Contains(Value),
    NotContains(Value),
    StartsWith(String),
    EndsWith(String),
    Empty,
    NotEmpty,
    /// `None` if every supplied glob failed to compile — matches nothing.
    Glob(Option<GlobSet>),
    /// Invalid/oversized patterns are dropped at compile time; an empty
    /// vec (all invalid) matches nothing.
    Regex(Vec<Regex>),
    Cidr(Vec<IpNet>),
}

pub fn matches(matcher: &Matcher, root: &Value, field: &str) -> bool {
    let resolved = value::resolve(root, field);

    match matcher {
        Matcher::Empty => value::is_empty(resolved),
        Matcher::NotEmpty => !value::is_empty(resolved),
        _ => {
            let Some(v) = resolved else {
                return false;
            };
            match matcher {
                Matcher::Eq(expected) => v == expected,
                Matcher::Ne(expected) => v != expected,
                Matcher::Gt(n) => as_f64(v).is_some_and(|x| x > *n),
                Matcher::Gte(n) => as_f64(v).is_some_and(|x| x >= *n),
                Matcher::Lt(n) => as_f64(v).is_some_and(|x| x < *n),
                Matcher::Lte(n) => as_f64(v).is_some_and(|x| x <= *n),
                Matcher::In(list) => list.contains(v),
                Matcher::NotIn(list) => !list.contains(v),
                Matcher::Contains(needle) => contains(v, needle),
                Matcher::NotContains(needle) => !contains(v, needle),
                Matcher::StartsWith(prefix) => v.as_str().is_some_and(|s| s.starts_with(prefix)),
                Matcher::EndsWith(suffix) => v.as_str().is_some_and(|s| s.ends_with(suffix)),
                Matcher::Glob(set) => {
                    let Some(set) = set else { return false };
                    v.as_str().is_some_and(|s| set.is_match(s))
                }
                Matcher::Regex(patterns) => {
                    let Some(s) = v.as_str() else { return false };
                    patterns.iter().any(|re| re.is_match(s))
                }
                Matcher::Cidr(nets) => {
                    let Some(s) = v.as_str() else { return false };
                    let Ok(ip) = s.parse::<IpAddr>() else {
                        return false;
                    };
                    nets.iter().any(|net| net.contains(&ip))
                }
                Matcher::Empty | Matcher::NotEmpty => unreachable!(),
            }
        }
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn contains(field: &Value, needle: &Value) -> bool {
    match field {
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Array(items) => items.contains(needle),
        _ => false,
    }
}

/// Compile a regex, rejecting anything over [`MAX_REGEX_LEN`] chars or that
/// otherwise fails to parse. Never returns `Err` to the caller — the filter
/// engine never aborts a rule load over a bad pattern.
pub fn compile_regex(pattern: &str) -> Option<Regex> {
    if pattern.chars().count() > MAX_REGEX_LEN {
        return None;
    }
    Regex::new(pattern).ok()
}

pub fn compile_cidr(pattern: &str) -> Option<IpNet> {
    pattern.parse().ok()
}

pub fn compile_globset(patterns: &[String]) -> Option<GlobSet> {
    let mut builder = globset::GlobSetBuilder::new();
    let mut any = false;
    for p in patterns {
        if let Ok(glob) = globset::Glob::new(p) {
            builder.add(glob);
            any = true;
        }
    }
    if !any {
        return None;
    }
    builder.build().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gt_on_non_numeric_field_is_false() {
        let root = json!({"count": "not-a-number"});
        assert!(!matches(&Matcher::Gt(1.0), &root, "count"));
    }

    #[test]
    fn eq_on_missing_field_is_false() {
        let root = json!({});
        assert!(!matches(&Matcher::Eq(json!(true)), &root, "simulated"));
    }

    #[test]
    fn cidr_v4_membership() {
        let net: IpNet = "10.0.0.0/8".parse().unwrap();
        let root = json!({"ip": "10.1.2.3"});
        assert!(matches(&Matcher::Cidr(vec![net]), &root, "ip"));
    }

    #[test]
    fn cidr_cross_family_is_false() {
        let net: IpNet = "10.0.0.0/8".parse().unwrap();
        let root = json!({"ip": "::1"});
        assert!(!matches(&Matcher::Cidr(vec![net]), &root, "ip"));
    }

    #[test]
    fn regex_over_500_chars_is_rejected() {
        let pattern = "a".repeat(501);
        assert!(compile_regex(&pattern).is_none());
    }

    #[test]
    fn regex_exactly_500_chars_compiles() {
        let pattern = "a".repeat(500);
        assert!(compile_regex(&pattern).is_some());
    }

    #[test]
    fn invalid_cidr_never_matches() {
        assert!(compile_cidr("not-a-cidr").is_none());
    }

    #[test]
    fn contains_on_array_field() {
        let root = json!({"tags": ["ssh", "http"]});
        assert!(matches(&Matcher::Contains(json!("ssh")), &root, "tags"));
    }

    #[test]
    fn glob_matches_any_pattern() {
        let set = compile_globset(&["ssh-*".to_string(), "http-*".to_string()]).unwrap();
        let root = json!({"scenario": "ssh-brute-force"});
        assert!(matches(&Matcher::Glob(Some(set)), &root, "scenario"));
    }
}
