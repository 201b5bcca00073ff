//! The filter engine: compiles rule YAML into expression trees and
//! evaluates alerts against them.
//!
//! `Expr = Field(FieldCond) | And([Expr]) | Or([Expr]) | Not(Expr)` is the
//! sum type the design notes call for, with a single recursive evaluator.

mod operators;
pub mod value;

use crate::config::{FilterMode, FiltersConfig, RawFilterRule};
use operators::Matcher;
use serde_json::Value;

pub struct FieldCond {
    field: String,
    matcher: Matcher,
    reason: String,
}

pub enum Expr {
    Field(FieldCond),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

pub struct CompiledRule {
    pub name: String,
    pub enabled: bool,
    expr: Expr,
}

pub struct FilterEngine {
    mode: FilterMode,
    rules: Vec<CompiledRule>,
}

pub struct MatchedFilter {
    pub name: String,
    pub reason: String,
}

pub struct Verdict {
    pub filtered: bool,
    pub matched: Vec<MatchedFilter>,
}

impl FilterEngine {
    pub fn compile(config: &FiltersConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .filter_map(|raw| compile_rule(raw))
            .collect();
        Self {
            mode: config.mode,
            rules,
        }
    }

    /// Evaluate one alert. A rule that errors during its own evaluation is
    /// already unable to error (see [`operators`]'s total-function design),
    /// so there is nothing to swallow here beyond skipping disabled rules.
    pub fn evaluate(&self, alert: &Value) -> Verdict {
        let mut matched = Vec::new();
        for rule in &self.rules {
            if !rule.enabled {
                continue;
            }
            if let Some(reason) = eval_expr(&rule.expr, alert) {
                matched.push(MatchedFilter {
                    name: rule.name.clone(),
                    reason,
                });
            }
        }

        let any_match = !matched.is_empty();
        let filtered = match self.mode {
            FilterMode::Block => any_match,
            FilterMode::Allow => !any_match,
        };

        Verdict { filtered, matched }
    }
}

/// Returns `Some(reason)` on match, `None` otherwise.
fn eval_expr(expr: &Expr, root: &Value) -> Option<String> {
    match expr {
        Expr::Field(cond) => {
            if operators::matches(&cond.matcher, root, &cond.field) {
                Some(cond.reason.clone())
            } else {
                None
            }
        }
        Expr::And(children) => {
            let mut reasons = Vec::with_capacity(children.len());
            for child in children {
                match eval_expr(child, root) {
                    Some(r) => reasons.push(r),
                    None => return None,
                }
            }
            Some(reasons.join(" AND "))
        }
        Expr::Or(children) => children.iter().find_map(|child| eval_expr(child, root)),
        Expr::Not(child) => {
            if eval_expr(child, root).is_some() {
                None
            } else {
                Some(format!("NOT ({})", describe(child)))
            }
        }
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Field(cond) => cond.reason.clone(),
        Expr::And(children) => children.iter().map(describe).collect::<Vec<_>>().join(" AND "),
        Expr::Or(children) => children.iter().map(describe).collect::<Vec<_>>().join(" OR "),
        Expr::Not(child) => format!("NOT ({})", describe(child)),
    }
}

fn compile_rule(raw: &RawFilterRule) -> Option<CompiledRule> {
    let filter_json: Value = match serde_json::to_value(&raw.filter) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(rule = %raw.name, error = %e, "dropping rule with unrepresentable filter");
            return None;
        }
    };
    match parse_expr(&filter_json) {
        Ok(expr) => Some(CompiledRule {
            name: raw.name.clone(),
            enabled: raw.enabled,
            expr,
        }),
        Err(e) => {
            tracing::warn!(rule = %raw.name, error = %e, "dropping rule with invalid expression");
            None
        }
    }
}

fn parse_expr(v: &Value) -> Result<Expr, String> {
    let obj = v.as_object().ok_or("expression must be an object")?;

    if let Some(op) = obj.get("op").and_then(|o| o.as_str()) {
        match op {
            "and" | "or" => {
                let conditions = obj
                    .get("conditions")
                    .and_then(|c| c.as_array())
                    .ok_or("and/or requires a non-empty 'conditions' list")?;
                if conditions.is_empty() {
                    return Err("and/or requires at least one condition".to_string());
                }
                let children = conditions
                    .iter()
                    .map(parse_expr)
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(if op == "and" {
                    Expr::And(children)
                } else {
                    Expr::Or(children)
                });
            }
            "not" => {
                let condition = obj.get("condition").ok_or("not requires a 'condition'")?;
                return Ok(Expr::Not(Box::new(parse_expr(condition)?)));
            }
            _ => {} // falls through to field-condition parsing below
        }
    }

    let field = obj
        .get("field")
        .and_then(|f| f.as_str())
        .ok_or("field condition requires a 'field'")?
        .to_string();
    let op = obj
        .get("op")
        .and_then(|o| o.as_str())
        .ok_or("field condition requires an 'op'")?;
    let value = obj.get("value").cloned();

    let matcher = build_matcher(op, value.as_ref())?;
    let reason = describe_field(&field, op, value.as_ref());

    Ok(Expr::Field(FieldCond {
        field,
        matcher,
        reason,
    }))
}

fn build_matcher(op: &str, value: Option<&Value>) -> Result<Matcher, String> {
    let require_value = || value.cloned().ok_or_else(|| format!("op '{op}' requires a value"));
    let require_number = |v: &Value| v.as_f64().ok_or_else(|| format!("op '{op}' requires a numeric value"));
    let require_list = |v: &Value| {
        v.as_array()
            .cloned()
            .ok_or_else(|| format!("op '{op}' requires a list value"))
    };
    let require_string = |v: &Value| {
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("op '{op}' requires a string value"))
    };
    let string_or_list = |v: &Value| -> Vec<String> {
        match v {
            Value::Array(items) => items.iter().filter_map(|i| i.as_str().map(str::to_string)).collect(),
            Value::String(s) => vec![s.clone()],
            _ => Vec::new(),
        }
    };

    Ok(match op {
        "eq" => Matcher::Eq(require_value()?),
        "ne" => Matcher::Ne(require_value()?),
        "gt" => Matcher::Gt(require_number(&require_value()?)?),
        "gte" => Matcher::Gte(require_number(&require_value()?)?),
        "lt" => Matcher::Lt(require_number(&require_value()?)?),
        "lte" => Matcher::Lte(require_number(&require_value()?)?),
        "in" => Matcher::In(require_list(&require_value()?)?),
        "not_in" => Matcher::NotIn(require_list(&require_value()?)?),
        "contains" => Matcher::Contains(require_value()?),
        "not_contains" => Matcher::NotContains(require_value()?),
        "starts_with" => Matcher::StartsWith(require_string(&require_value()?)?),
        "ends_with" => Matcher::EndsWith(require_string(&require_value()?)?),
        "empty" => Matcher::Empty,
        "not_empty" => Matcher::NotEmpty,
        "glob" => {
            let patterns = string_or_list(&require_value()?);
            Matcher::Glob(operators::compile_globset(&patterns))
        }
        "regex" => {
            let patterns = string_or_list(&require_value()?);
            Matcher::Regex(patterns.iter().filter_map(|p| operators::compile_regex(p)).collect())
        }
        "cidr" => {
            let patterns = string_or_list(&require_value()?);
            Matcher::Cidr(patterns.iter().filter_map(|p| operators::compile_cidr(p)).collect())
        }
        other => return Err(format!("unknown operator '{other}'")),
    })
}

fn describe_field(field: &str, op: &str, value: Option<&Value>) -> String {
    match value {
        Some(v) => format!("{field} {op} {v}"),
        None => format!("{field} {op}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterMode, FiltersConfig, RawFilterRule};
    use serde_json::json;
    use serde_yaml::Value as YamlValue;

    fn rule(name: &str, filter_yaml: &str) -> RawFilterRule {
        RawFilterRule {
            name: name.to_string(),
            enabled: true,
            description: None,
            filter: serde_yaml::from_str::<YamlValue>(filter_yaml).unwrap(),
        }
    }

    #[test]
    fn block_mode_drops_bannable_simulated_alerts() {
        let config = FiltersConfig {
            mode: FilterMode::Block,
            rules: vec![rule(
                "sim",
                "field: simulated\nop: eq\nvalue: true\n",
            )],
        };
        let engine = FilterEngine::compile(&config);

        let simulated = json!({"simulated": true});
        let real = json!({"simulated": false});

        assert!(engine.evaluate(&simulated).filtered);
        assert!(!engine.evaluate(&real).filtered);
    }

    #[test]
    fn nested_and_or_matches() {
        let config = FiltersConfig {
            mode: FilterMode::Block,
            rules: vec![rule(
                "nested",
                r#"
op: and
conditions:
  - field: simulated
    op: eq
    value: false
  - op: or
    conditions:
      - field: scenario
        op: contains
        value: ssh
      - field: scenario
        op: contains
        value: http
"#,
            )],
        };
        let engine = FilterEngine::compile(&config);
        let alert = json!({"simulated": false, "scenario": "crowdsecurity/ssh-bf"});
        let verdict = engine.evaluate(&alert);
        assert!(verdict.filtered);
        assert_eq!(verdict.matched.len(), 1);
    }

    #[test]
    fn allow_mode_filters_non_matching() {
        let config = FiltersConfig {
            mode: FilterMode::Allow,
            rules: vec![rule("trusted", "field: source.value\nop: cidr\nvalue: 10.0.0.0/8\n")],
        };
        let engine = FilterEngine::compile(&config);
        let trusted = json!({"source": {"value": "10.1.1.1"}});
        let stranger = json!({"source": {"value": "8.8.8.8"}});

        assert!(!engine.evaluate(&trusted).filtered);
        assert!(engine.evaluate(&stranger).filtered);
    }

    #[test]
    fn disabled_rule_never_matches() {
        let mut r = rule("disabled", "field: simulated\nop: eq\nvalue: true\n");
        r.enabled = false;
        let config = FiltersConfig {
            mode: FilterMode::Block,
            rules: vec![r],
        };
        let engine = FilterEngine::compile(&config);
        assert!(!engine.evaluate(&json!({"simulated": true})).filtered);
    }

    #[test]
    fn invalid_expression_drops_rule_without_panicking() {
        let config = FiltersConfig {
            mode: FilterMode::Block,
            rules: vec![rule("broken", "field: simulated\nop: frobnicate\n")],
        };
        let engine = FilterEngine::compile(&config);
        assert_eq!(engine.rules.len(), 0);
    }

    #[test]
    fn or_short_circuits_on_first_match_for_reason() {
        let config = FiltersConfig {
            mode: FilterMode::Block,
            rules: vec![rule(
                "or-rule",
                r#"
op: or
conditions:
  - field: scenario
    op: contains
    value: ssh
  - field: scenario
    op: contains
    value: http
"#,
            )],
        };
        let engine = FilterEngine::compile(&config);
        let verdict = engine.evaluate(&json!({"scenario": "ssh-bf"}));
        assert!(verdict.filtered);
        assert!(verdict.matched[0].reason.contains("ssh"));
    }
}
