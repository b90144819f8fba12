use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::get,
    Router,
};
use docuflow_shared::LedgerEntry;
use std::sync::Arc;
use uuid::Uuid;

use super::webhooks::presented_signature;
use crate::{ApiResult, AppError, AppState};

pub fn ledger_routes() -> Router<Arc<AppState>> {
    Router::new().route("/:id", get(get_entry))
}

/// Ledger entry with its stored payload redacted.
///
/// The caller signs the entry id (as text) with the owning tenant's webhook
/// secret, so one tenant cannot read another's entries. Entry ids are random
/// UUIDs; an unknown id answers 404 without a signature check.
async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<LedgerEntry>> {
    let mut entry = state
        .pipeline
        .ledger()
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ledger entry {}", id)))?;

    state
        .pipeline
        .authenticate(&entry.tenant_id, id.to_string().as_bytes(), presented_signature(&headers))
        .await?;

    entry.payload = state.pipeline.redactor().redact(&entry.payload);
    Ok(Json(entry))
}
