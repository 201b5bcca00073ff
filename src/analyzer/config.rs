//! Per-analyzer configuration, one YAML file per analyzer under
//! `analyzers.config_dir`.

use crate::error::CrowdSieveError;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub interval: String,
    pub lookback: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRefConfig {
    #[serde(rename = "ref")]
    pub source_ref: String,
    pub query: String,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

fn default_max_lines() -> usize {
    5_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_format")]
    pub format: String,
    pub fields: std::collections::HashMap<String, String>,
}

fn default_format() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl ThresholdOperator {
    pub fn compare(self, value: i64, threshold: i64) -> bool {
        match self {
            ThresholdOperator::Gt => value > threshold,
            ThresholdOperator::Gte => value >= threshold,
            ThresholdOperator::Lt => value < threshold,
            ThresholdOperator::Lte => value <= threshold,
            ThresholdOperator::Eq => value == threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    pub groupby: String,
    pub distinct: Option<String>,
    pub threshold: i64,
    pub operator: ThresholdOperator,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionTemplateConfig {
    #[serde(rename = "type")]
    pub decision_type: String,
    pub duration: String,
    pub scope: String,
    pub scenario: String,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Targets {
    All(AllTargets),
    Named(Vec<String>),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AllTargets {
    All,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub version: String,
    pub schedule: ScheduleConfig,
    pub source: SourceRefConfig,
    pub extraction: ExtractionConfig,
    pub detection: DetectionConfig,
    pub decision: DecisionTemplateConfig,
    pub targets: Targets,
}

fn default_true() -> bool {
    true
}

/// Load every `*.yaml`/`*.yml` in `dir`, collecting per-file parse errors
/// instead of aborting — same non-fatal merge idiom as the main config's
/// `filters.d` loader.
pub fn load_all(dir: &Path) -> (Vec<AnalyzerConfig>, Vec<String>) {
    let mut configs = Vec::new();
    let mut errors = Vec::new();

    let mut entries: Vec<_> = match std::fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => return (configs, errors),
    };
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('_') || name.starts_with('.') {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext != "yaml" && ext != "yml" {
            continue;
        }

        match std::fs::read_to_string(&path).map_err(CrowdSieveError::from_io).and_then(|s| {
            serde_yaml::from_str::<AnalyzerConfig>(&s)
                .map_err(|e| CrowdSieveError::InvalidConfig(format!("{name}: {e}")))
        }) {
            Ok(cfg) => configs.push(cfg),
            Err(e) => errors.push(e.to_string()),
        }
    }

    (configs, errors)
}

impl CrowdSieveError {
    fn from_io(e: std::io::Error) -> Self {
        CrowdSieveError::InvalidConfig(e.to_string())
    }
}
