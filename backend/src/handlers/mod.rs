use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod ledger;
pub mod resolve;
pub mod webhooks;

pub use ledger::ledger_routes;
pub use resolve::resolve_routes;
pub use webhooks::webhook_routes;

/// Full HTTP surface, shared by `main` and the route tests.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Docuflow Automation API v0.1.0" }))
        .route("/health", get(health_check))
        .nest("/api/v1/webhooks", webhook_routes())
        .nest("/api/v1/resolve", resolve_routes())
        .nest("/api/v1/ledger", ledger_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match &state.db_pool {
        Some(pool) if crate::database::health_check(pool).await => "ok",
        Some(_) => "unavailable",
        None => "memory",
    };

    let status = if database == "unavailable" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(json!({"status": if status == StatusCode::OK { "healthy" } else { "degraded" }, "service": "docuflow-api", "database": database})))
}
