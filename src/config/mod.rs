//! Configuration: a single YAML document loaded once at startup, never a
//! lazily-initialized global.

mod filters_dir;
mod interpolate;
pub mod validation;

use crate::error::{CrowdSieveError, Result};
use serde::Deserialize;
use serde_yaml::Value;
use std::path::{Path, PathBuf};

pub use validation::ConfigWarning;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub listen_port: u16,
    pub capi_url: String,
    pub timeout_ms: u64,
    pub forward_enabled: bool,
    /// Allowed CORS origins (http/https URLs only, validated in [`Config::validate`]).
    pub cors_origins: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            capi_url: "https://api.crowdsec.net".to_string(),
            timeout_ms: 30_000,
            forward_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LapiServerConfig {
    pub name: String,
    pub url: String,
    pub api_key: String,
    pub machine_id: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Embedded,
    Relational,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    pub path: Option<String>,
    pub retention_days: u32,
    pub relational_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Embedded,
            path: Some("./data/crowdsieve.db".to_string()),
            retention_days: 30,
            relational_url: None,
        }
    }
}

impl Default for StorageKind {
    fn default() -> Self {
        StorageKind::Embedded
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFilterRule {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub description: Option<String>,
    pub filter: Value,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Block,
    Allow,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub mode: FilterMode,
    pub rules: Vec<RawFilterRule>,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            mode: FilterMode::Block,
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientValidationConfig {
    pub enabled: bool,
    pub cache_ttl_seconds: u64,
    pub cache_ttl_error_seconds: u64,
    pub validation_timeout_ms: u64,
    pub max_memory_entries: usize,
    pub fail_closed: bool,
}

impl Default for ClientValidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_ttl_seconds: 3600,
            cache_ttl_error_seconds: 30,
            validation_timeout_ms: 5_000,
            max_memory_entries: 10_000,
            fail_closed: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub grafana_url: String,
    pub token: String,
    pub datasource_uid: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzersConfig {
    pub enabled: bool,
    pub config_dir: String,
    pub default_interval: String,
    pub default_lookback: String,
    pub default_targets: Vec<String>,
    pub whitelist: Vec<String>,
    pub sources: std::collections::HashMap<String, SourceConfig>,
}

impl Default for AnalyzersConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            config_dir: "./analyzers.d".to_string(),
            default_interval: "60s".to_string(),
            default_lookback: "5m".to_string(),
            default_targets: Vec::new(),
            whitelist: Vec::new(),
            sources: std::collections::HashMap::new(),
        }
    }
}

/// Operator-surface auth. Not one of the `[MODULE]` sections named verbatim
/// in the config table, but `/api/*`'s constant-time key auth needs the key
/// to live somewhere — see the Open Question decision in DESIGN.md.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub lapi_servers: Vec<LapiServerConfig>,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub filters: FiltersConfig,
    pub client_validation: ClientValidationConfig,
    pub analyzers: AnalyzersConfig,
    pub operator: OperatorConfig,
}

pub struct LoadedConfig {
    pub config: Config,
    pub warnings: Vec<ConfigWarning>,
}

/// Load, interpolate, merge `filters.d`, and validate a config file.
pub fn load(path: &Path) -> Result<LoadedConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CrowdSieveError::InvalidConfig(format!("reading {}: {e}", path.display())))?;

    let mut doc: Value = serde_yaml::from_str(&raw)
        .map_err(|e| CrowdSieveError::InvalidConfig(format!("parsing {}: {e}", path.display())))?;

    doc = interpolate::interpolate(doc);

    let mut warnings = validation::validate_unknown_keys(&doc);

    let filters_dir_path = filters_d_path(path, &doc);
    let (extra_rules, dir_warnings) = filters_dir::load_rule_files(&filters_dir_path);
    warnings.extend(dir_warnings);
    if !extra_rules.is_empty() {
        merge_filter_rules(&mut doc, extra_rules);
    }

    let config: Config = serde_yaml::from_value(doc)
        .map_err(|e| CrowdSieveError::InvalidConfig(format!("invalid config shape: {e}")))?;

    validate(&config)?;

    Ok(LoadedConfig { config, warnings })
}

/// `filters.d` sits next to the main config file unless overridden.
fn filters_d_path(config_path: &Path, doc: &Value) -> PathBuf {
    if let Some(explicit) = doc
        .get("filters")
        .and_then(|f| f.get("dir"))
        .and_then(|d| d.as_str())
    {
        return PathBuf::from(explicit);
    }
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("filters.d")
}

fn merge_filter_rules(doc: &mut Value, extra: Vec<Value>) {
    let filters = doc
        .as_mapping_mut()
        .and_then(|m| m.get_mut("filters"));
    let Some(filters) = filters else {
        return;
    };
    let Some(mapping) = filters.as_mapping_mut() else {
        return;
    };
    let rules_key = Value::String("rules".to_string());
    match mapping.get_mut(&rules_key) {
        Some(Value::Sequence(seq)) => seq.extend(extra),
        _ => {
            mapping.insert(rules_key, Value::Sequence(extra));
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    for origin in &config.proxy.cors_origins {
        let parsed = url::Url::parse(origin)
            .map_err(|_| CrowdSieveError::InvalidConfig(format!("invalid cors origin: {origin}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(CrowdSieveError::InvalidConfig(format!(
                "cors origin must be http(s): {origin}"
            )));
        }
    }

    if config.storage.kind == StorageKind::Relational && config.storage.relational_url.is_none() {
        return Err(CrowdSieveError::InvalidConfig(
            "storage.type = relational requires storage.relational_url".to_string(),
        ));
    }

    if crate::duration::parse_duration(&config.analyzers.default_interval).is_none() {
        return Err(CrowdSieveError::InvalidConfig(format!(
            "invalid analyzers.default_interval: {}",
            config.analyzers.default_interval
        )));
    }
    if crate::duration::parse_duration(&config.analyzers.default_lookback).is_none() {
        return Err(CrowdSieveError::InvalidConfig(format!(
            "invalid analyzers.default_lookback: {}",
            config.analyzers.default_lookback
        )));
    }

    let production = std::env::var("CROWDSIEVE_ENV").as_deref() == Ok("production");
    if production && config.operator.api_key.is_none() {
        return Err(CrowdSieveError::InvalidConfig(
            "operator.api_key is required when CROWDSIEVE_ENV=production".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("crowdsieve.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "proxy:\n  listen_port: 9090\n");
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.config.proxy.listen_port, 9090);
        assert_eq!(loaded.config.proxy.capi_url, "https://api.crowdsec.net");
        assert_eq!(loaded.config.storage.retention_days, 30);
    }

    #[test]
    fn relational_storage_without_url_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "storage:\n  type: relational\n");
        let err = load(&path).unwrap_err();
        assert!(matches!(err, CrowdSieveError::InvalidConfig(_)));
    }

    #[test]
    fn bad_cors_origin_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "proxy:\n  cors_origins:\n    - \"not a url\"\n");
        let err = load(&path).unwrap_err();
        assert!(matches!(err, CrowdSieveError::InvalidConfig(_)));
    }

    #[test]
    fn unknown_top_level_key_is_a_warning_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "proxy:\n  listen_port: 8080\nfilterz:\n  mode: block\n");
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn env_interpolation_applies_before_parsing() {
        std::env::set_var("CS_TEST_CAPI_URL", "https://capi.internal.example");
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "proxy:\n  capi_url: \"${CS_TEST_CAPI_URL}\"\n",
        );
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.config.proxy.capi_url, "https://capi.internal.example");
    }

    #[test]
    fn filters_d_rules_are_merged_in() {
        let dir = tempfile::tempdir().unwrap();
        let filters_d = dir.path().join("filters.d");
        std::fs::create_dir(&filters_d).unwrap();
        let mut f = std::fs::File::create(filters_d.join("01-base.yaml")).unwrap();
        f.write_all(b"- {name: drop-sim, enabled: true, filter: {field: simulated, op: eq, value: true}}\n")
            .unwrap();
        let path = write_config(
            dir.path(),
            "filters:\n  mode: block\n  rules:\n    - {name: inline, enabled: true, filter: {field: x, op: eq, value: 1}}\n",
        );
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.config.filters.rules.len(), 2);
    }

    #[test]
    fn missing_operator_key_in_production_is_fatal() {
        std::env::set_var("CROWDSIEVE_ENV", "production");
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "proxy:\n  listen_port: 8080\n");
        let err = load(&path).unwrap_err();
        std::env::remove_var("CROWDSIEVE_ENV");
        assert!(matches!(err, CrowdSieveError::InvalidConfig(_)));
    }
}
