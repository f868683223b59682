//! Router assembly and the `axum::serve` loop: public routes merged with a
//! bearer-gated protected set, CORS and a body size cap applied as outer
//! layers. CORS is scoped to the configured `allowed_origins` rather than
//! left permissive.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::log_hub::LogHub;
use crate::scheduler::Scheduler;
use crate::store::Store;

use super::auth::auth_middleware;
use super::routes;
use super::ws::ws_logs_handler;
use super::AppState;

/// Body size cap (§6: "Body size is capped globally at 10 MiB").
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/jobs", get(routes::list_jobs).post(routes::create_job))
        .route(
            "/api/jobs/:id",
            get(routes::get_job).put(routes::update_job).delete(routes::delete_job),
        )
        .route("/api/jobs/:id/run", post(routes::run_job))
        .route(
            "/api/jobs/:id/schedule",
            get(routes::get_schedule).put(routes::put_schedule),
        )
        .route("/api/runs", get(routes::list_runs))
        .route("/api/runs/:id", get(routes::get_run))
        .route("/api/runs/:id/logs", get(routes::get_run_logs))
        .route("/api/dashboard/stats", get(routes::dashboard_stats))
        .route("/api/ws/logs", get(ws_logs_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let public = Router::new().route("/health", get(routes::health));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors_layer(&state.config))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if config.allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::new().allow_origin(tower_http::cors::Any);
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new().allow_origin(origins)
}

/// Assembles the gateway's [`AppState`] and serves it at `config.listen_addr`.
/// Blocks until the server shuts down.
pub async fn serve(
    store: Arc<Store>,
    scheduler: Arc<Scheduler>,
    hub: LogHub,
    config: Arc<AppConfig>,
) -> Result<(), String> {
    let token_path = super::auth::default_token_path();
    super::auth::load_or_create_token(&token_path)?;

    let state = AppState {
        store,
        scheduler,
        hub,
        config: config.clone(),
        token_path,
    };

    let app = build_router(state);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| format!("failed to bind {}: {e}", config.listen_addr))?;
    log::info!("gateway: listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("gateway error: {e}"))
}
