//! Ingress Router: route registration and shared application state.
//!
//! Grounded on `hub::api::build_router`'s layering order (compression, then
//! trace, then CORS), generalized to the dashboard's configured origin list
//! instead of `CorsLayer::permissive()` and to constant-time key auth instead
//! of bcrypt. The governor layer applies only to the `/api` nest — signal
//! ingestion and passthrough routes are never rate-limited.

pub mod auth;
pub mod ingress;
pub mod middleware;
pub mod operator;

use crate::analyzer::lapi_client::LapiClient;
use crate::analyzer::{scheduler::Scheduler, AnalyzerEngine};
use crate::config::Config;
use crate::pipeline::SignalPipeline;
use crate::storage::Store;
use crate::validator::ClientValidator;
use axum::http::{HeaderValue, Method};
use axum::routing::{any, delete, get, post};
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub pipeline: Arc<SignalPipeline>,
    pub validator: Option<Arc<ClientValidator>>,
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub lapi_clients: Arc<HashMap<String, Arc<LapiClient>>>,
    pub analyzer_engine: Arc<AnalyzerEngine>,
    pub scheduler: Option<Arc<Scheduler>>,
    pub http: reqwest::Client,
    pub production: bool,
    pub operator_rate_limiter: middleware::OperatorRateLimiter,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(50)
            .finish()
            .expect("valid governor config"),
    );

    let operator_routes = Router::new()
        .route("/alerts", get(operator::list_alerts))
        .route("/alerts/{id}", get(operator::get_alert))
        .route("/stats", get(operator::stats))
        .route("/stats/distribution", get(operator::stats_distribution))
        .route("/ip-info/{ip}", get(operator::ip_info))
        .route("/lapi-servers", get(operator::lapi_servers))
        .route("/decisions", get(operator::search_decisions))
        .route("/decisions/{id}", delete(operator::delete_decision))
        .route("/decisions/ban", post(operator::manual_ban))
        .route("/analyzers", get(operator::list_analyzers))
        .route("/analyzers/{id}/run", post(operator::run_analyzer))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::operator_rate_limit,
        ))
        .layer(GovernorLayer { config: governor_config });

    let cors_origins: Vec<HeaderValue> = state
        .config
        .proxy
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = if cors_origins.is_empty() {
        CorsLayer::new()
    } else {
        CorsLayer::new()
            .allow_origin(cors_origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
    };

    Router::new()
        .route("/health", get(ingress::health))
        .route("/v2/signals", post(ingress::signals_v2))
        .route("/v3/signals", post(ingress::signals_v3))
        .route("/v2/{*rest}", any(ingress::passthrough_v2))
        .route("/v3/{*rest}", any(ingress::passthrough_v3))
        .nest("/api", operator_routes)
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::security_headers))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
