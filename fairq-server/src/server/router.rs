use super::handlers::{self, AppState};
use super::metrics_handler::{self, MetricsGuard};
use crate::config::PrometheusConfig;
use crate::core::error::Result;
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the Axum router with all endpoints
pub fn create_router(state: AppState, prometheus: &PrometheusConfig) -> Result<Router> {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        // Health check (always public)
        .route("/health", get(handlers::health))
        // Queue protocol
        .route("/queues/{queue}/jobs", post(handlers::push_job))
        .route("/queues/{queue}/pop", post(handlers::pop_job))
        .route(
            "/queues/{queue}/reservations/{id}/release",
            post(handlers::release_job),
        )
        .route(
            "/queues/{queue}/reservations/{id}",
            delete(handlers::delete_job),
        )
        .route("/queues/{queue}/size", get(handlers::queue_size))
        // Admin surface
        .route("/queues/{queue}", delete(handlers::clear_queue))
        .route("/stats", get(handlers::stats))
        .with_state(state.clone());

    if prometheus.enabled {
        let guard = Arc::new(MetricsGuard::from_config(prometheus)?);
        let metrics_router = Router::new()
            .route(&prometheus.route, get(metrics_handler::export_metrics))
            .route(
                &format!("{}/json", prometheus.route),
                get(metrics_handler::export_metrics_json),
            )
            .layer(middleware::from_fn_with_state(guard, metrics_handler::guard))
            .with_state(state);
        router = router.merge(metrics_router);
    }

    Ok(router.layer(TraceLayer::new_for_http()).layer(cors))
}
