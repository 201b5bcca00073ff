//! Dot-path field resolution over a JSON value tree.
//!
//! No array indexing, no escaping — a path is just `.`-separated object keys.
//! An intermediate or terminal `null` collapses to `None`, same as a missing
//! key, so callers get a single "undefined leaf" case to handle.

use serde_json::Value;

pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for part in path.split('.') {
        match cur {
            Value::Object(map) => cur = map.get(part)?,
            _ => return None,
        }
        if cur.is_null() {
            return None;
        }
    }
    Some(cur)
}

pub fn is_empty(resolved: Option<&Value>) -> bool {
    match resolved {
        None => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Null) => true,
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_path() {
        let v = json!({"source": {"value": "1.2.3.4"}});
        assert_eq!(resolve(&v, "source.value").unwrap(), "1.2.3.4");
    }

    #[test]
    fn missing_key_is_none() {
        let v = json!({"a": 1});
        assert!(resolve(&v, "b").is_none());
    }

    #[test]
    fn null_intermediate_is_none() {
        let v = json!({"a": null});
        assert!(resolve(&v, "a.b").is_none());
    }

    #[test]
    fn empty_checks_missing_null_string_and_array() {
        let v = json!({"s": "", "arr": [], "n": null});
        assert!(is_empty(resolve(&v, "missing")));
        assert!(is_empty(resolve(&v, "s")));
        assert!(is_empty(resolve(&v, "arr")));
        assert!(is_empty(resolve(&v, "n")));
        assert!(!is_empty(Some(&json!("x"))));
    }
}
