//! Shared harness for building a full `AppState` + router against a
//! tempfile-backed SQLite store and a configurable CAPI base URL.

use crowdsieve::analyzer::AnalyzerEngine;
use crowdsieve::api::{build_router, middleware::OperatorRateLimiter, AppState};
use crowdsieve::config::{AnalyzersConfig, Config, FilterMode, FiltersConfig, ProxyConfig, RawFilterRule};
use crowdsieve::filters::FilterEngine;
use crowdsieve::pipeline::SignalPipeline;
use crowdsieve::storage::sqlite::SqliteStore;
use crowdsieve::storage::Store;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

pub struct Harness {
    pub app: Router,
    pub store: Arc<dyn Store>,
    // Keeps the backing tempfile alive for the harness's lifetime.
    _dir: TempDir,
}

pub async fn build(capi_url: &str, forward_enabled: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(db_path.to_str().unwrap()).await.unwrap());

    let filters = Arc::new(FilterEngine::compile(&FiltersConfig {
        mode: FilterMode::Block,
        rules: vec![RawFilterRule {
            name: "drop-sim".to_string(),
            enabled: true,
            description: None,
            filter: serde_yaml::from_str("field: simulated\nop: eq\nvalue: true\n").unwrap(),
        }],
    }));

    let proxy = ProxyConfig {
        capi_url: capi_url.to_string(),
        forward_enabled,
        cors_origins: Vec::new(),
        ..Default::default()
    };

    let pipeline = Arc::new(SignalPipeline::new(store.clone(), filters, proxy.clone()));

    let mut config = Config::default();
    config.proxy = proxy;

    let lapi_clients = Arc::new(HashMap::new());
    let analyzer_engine = Arc::new(AnalyzerEngine::load(
        &AnalyzersConfig::default(),
        lapi_clients.clone(),
        store.clone(),
        std::time::Duration::from_millis(30_000),
    ));

    let state = Arc::new(AppState {
        pipeline,
        validator: None,
        store: store.clone(),
        config: Arc::new(config),
        lapi_clients,
        analyzer_engine,
        scheduler: None,
        http: reqwest::Client::new(),
        production: false,
        operator_rate_limiter: OperatorRateLimiter::new(),
    });

    Harness {
        app: build_router(state),
        store,
        _dir: dir,
    }
}
