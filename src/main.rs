//! CrowdSieve server binary.
//!
//! Startup builds every component explicitly and threads it through
//! [`crowdsieve::api::AppState`] — no lazily-initialized globals (the
//! teacher's hub binary does the same: one `HubState` built once in
//! `main` and handed to `build_router`).

use clap::Parser;
use crowdsieve::analyzer::lapi_client;
use crowdsieve::analyzer::{scheduler::Scheduler, AnalyzerEngine};
use crowdsieve::api::{self, AppState};
use crowdsieve::config::{self, LogFormat, StorageKind};
use crowdsieve::filters::FilterEngine;
use crowdsieve::pipeline::SignalPipeline;
use crowdsieve::storage::postgres::PostgresStore;
use crowdsieve::storage::sqlite::SqliteStore;
use crowdsieve::storage::Store;
use crowdsieve::validator::ClientValidator;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "crowdsieve", about = "Filtering reverse proxy and brute-force analyzer engine")]
struct CliArgs {
    /// Path to the YAML configuration file.
    #[arg(long, env = "CROWDSIEVE_CONFIG", default_value = "crowdsieve.yaml")]
    config: String,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    let loaded = match config::load(std::path::Path::new(&args.config)) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", args.config);
            std::process::exit(1);
        }
    };

    init_tracing(&loaded.config.logging);
    for warning in &loaded.warnings {
        tracing::warn!(message = %warning.message, "config warning");
    }

    if let Err(e) = run(loaded.config).await {
        error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(match logging.level {
            config::LogLevel::Debug => "debug",
            config::LogLevel::Info => "info",
            config::LogLevel::Warn => "warn",
            config::LogLevel::Error => "error",
        })
    });
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let production = std::env::var("CROWDSIEVE_ENV").as_deref() == Ok("production");

    info!(listen_port = config.proxy.listen_port, "starting CrowdSieve");

    let store: Arc<dyn Store> = match config.storage.kind {
        StorageKind::Embedded => {
            let path = config
                .storage
                .path
                .clone()
                .unwrap_or_else(|| "./data/crowdsieve.db".to_string());
            Arc::new(SqliteStore::open(&path).await?)
        }
        StorageKind::Relational => {
            let url = config
                .storage
                .relational_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("storage.relational_url is required"))?;
            Arc::new(PostgresStore::connect(&url).await?)
        }
    };

    let filters = Arc::new(FilterEngine::compile(&config.filters));
    let pipeline = Arc::new(SignalPipeline::new(store.clone(), filters, config.proxy.clone()));

    let validator = config.client_validation.enabled.then(|| {
        Arc::new(ClientValidator::new(
            store.clone(),
            config.proxy.capi_url.clone(),
            config.client_validation.clone(),
        ))
    });

    let lapi_clients = Arc::new(lapi_client::build_clients(&config.lapi_servers));
    let loki_timeout = std::time::Duration::from_millis(config.proxy.timeout_ms);
    let analyzer_engine = Arc::new(AnalyzerEngine::load(
        &config.analyzers,
        lapi_clients.clone(),
        store.clone(),
        loki_timeout,
    ));

    let scheduler = config.analyzers.enabled.then(|| Arc::new(Scheduler::new(analyzer_engine.clone())));
    let mut scheduler_handles = Vec::new();
    if let Some(scheduler) = &scheduler {
        scheduler_handles = scheduler.spawn_all();
        info!(count = scheduler_handles.len(), "analyzer timers started");
    }

    let state = Arc::new(AppState {
        pipeline,
        validator,
        store,
        config: config.clone(),
        lapi_clients,
        analyzer_engine,
        scheduler,
        http: reqwest::Client::new(),
        production,
        operator_rate_limiter: api::middleware::OperatorRateLimiter::new(),
    });

    let app = api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.proxy.listen_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "CrowdSieve listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for handle in scheduler_handles {
        handle.abort();
    }

    info!("CrowdSieve shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
