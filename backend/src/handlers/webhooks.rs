//! Inbound webhook endpoints for the signing platform.
//!
//! The raw body is handed to the pipeline untouched; the signature covers
//! those exact bytes.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use chrono::Utc;
use docuflow_shared::LedgerStatus;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::signature::{LEGACY_SIGNATURE_HEADER, SIGNATURE_HEADER};
use crate::pipeline::IngestOutcome;
use crate::{ApiResult, AppState};

pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/signing", post(receive_event))
        .route("/signing/:tenant_id", post(receive_tenant_event))
}

/// Signature from the primary header, falling back to the legacy one.
pub fn presented_signature(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SIGNATURE_HEADER)
        .or_else(|| headers.get(LEGACY_SIGNATURE_HEADER))
        .and_then(|v| v.to_str().ok())
}

async fn receive_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    ingest(&state, &headers, &body, None).await
}

async fn receive_tenant_event(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    ingest(&state, &headers, &body, Some(&tenant_id)).await
}

async fn ingest(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    tenant_hint: Option<&str>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let outcome = state
        .pipeline
        .ingest(body, presented_signature(headers), tenant_hint, Utc::now())
        .await?;

    Ok(match outcome {
        IngestOutcome::Processed(report) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": if report.status == LedgerStatus::Success { "processed" } else { "failed" },
                "entry_id": report.entry_id,
                "ledger_status": report.status,
                "actions_triggered": report.actions_triggered,
                "rules": report.rules.iter().map(|r| json!({
                    "rule": r.rule_name,
                    "branch": r.branch,
                    "attempted": r.attempted,
                    "succeeded": r.succeeded,
                    "timed_out": r.timed_out,
                })).collect::<Vec<_>>(),
                "token_misses": report.token_misses,
                "error": report.error,
            })),
        ),
        IngestOutcome::Duplicate { existing_id, status } => (
            StatusCode::OK,
            Json(json!({
                "status": "duplicate",
                "entry_id": existing_id,
                "ledger_status": status,
            })),
        ),
    })
}
