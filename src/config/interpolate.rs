//! Recursive `${VAR}` / `${VAR:-default}` environment interpolation over a
//! parsed YAML value tree, applied before schema deserialization.

use serde_yaml::Value;
use std::env;

/// Walk `value` and substitute environment variable references in every
/// string scalar. Mappings and sequences are walked recursively; numbers,
/// booleans, and null are left untouched.
pub fn interpolate(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_str(&s)),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(interpolate).collect()),
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                out.insert(interpolate(k), interpolate(v));
            }
            Value::Mapping(out)
        }
        other => other,
    }
}

/// Substitute all `${VAR}` / `${VAR:-default}` occurrences in a single string.
fn interpolate_str(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = input[i + 2..].find('}') {
                let inner = &input[i + 2..i + 2 + end];
                out.push_str(&resolve(inner));
                i += 2 + end + 1;
                continue;
            }
        }
        // Safe: we only ever skip ASCII '$'/'{' above, so byte-indexing
        // back into a char boundary here is always valid.
        let ch = input[i..].chars().next().unwrap_or('\u{0}');
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Resolve `VAR` or `VAR:-default` against the process environment.
fn resolve(inner: &str) -> String {
    match inner.split_once(":-") {
        Some((var, default)) => env::var(var).unwrap_or_else(|_| default.to_string()),
        None => env::var(inner).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_var_substitutes() {
        std::env::set_var("CS_TEST_VAR", "hello");
        assert_eq!(interpolate_str("${CS_TEST_VAR}"), "hello");
    }

    #[test]
    fn missing_var_with_default_uses_default() {
        std::env::remove_var("CS_TEST_MISSING");
        assert_eq!(
            interpolate_str("${CS_TEST_MISSING:-fallback}"),
            "fallback"
        );
    }

    #[test]
    fn missing_var_without_default_is_empty() {
        std::env::remove_var("CS_TEST_MISSING_2");
        assert_eq!(interpolate_str("${CS_TEST_MISSING_2}"), "");
    }

    #[test]
    fn mixed_text_and_var() {
        std::env::set_var("CS_TEST_HOST", "capi.example.com");
        assert_eq!(
            interpolate_str("https://${CS_TEST_HOST}/v2"),
            "https://capi.example.com/v2"
        );
    }

    #[test]
    fn recurses_into_nested_mapping() {
        std::env::set_var("CS_TEST_NESTED", "42");
        let value: Value = serde_yaml::from_str("outer:\n  inner: \"${CS_TEST_NESTED}\"\n").unwrap();
        let out = interpolate(value);
        let s = out.get("outer").unwrap().get("inner").unwrap().as_str().unwrap();
        assert_eq!(s, "42");
    }
}
