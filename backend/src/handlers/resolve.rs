//! Signed resolution endpoints used by the document-creation step.
//!
//! Both take a CRM record and return what the field resolver makes of it:
//! template tokens, or notification recipients.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::post,
    Router,
};
use docuflow_shared::{FieldMapping, RecipientSpec, ResolvedToken};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::webhooks::presented_signature;
use crate::resolver::recipients::{resolve_recipients, RecipientReport};
use crate::resolver::tokens::generate_tokens;
use crate::resolver::{FieldResolver, ResolutionMiss, ResolveError};
use crate::services::TenantConfig;
use crate::{ApiResult, AppError, AppState};

pub fn resolve_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tokens", post(resolve_tokens))
        .route("/recipients", post(resolve_recipient_list))
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub module: String,
    pub record_id: String,
    /// Overrides the tenant's configured mappings
    pub mappings: Option<Vec<FieldMapping>>,
    pub infer: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub tokens: Vec<ResolvedToken>,
    pub missing: Vec<ResolutionMiss>,
}

#[derive(Debug, Deserialize)]
pub struct RecipientRequest {
    pub module: String,
    pub record_id: String,
    pub recipients: Vec<RecipientSpec>,
}

/// Verifies the request against the tenant's secret before the body is
/// interpreted. The body's `tenant_id` is read only to pick the secret; a
/// body that does not name one is rejected like a bad signature.
async fn authenticated<T: DeserializeOwned>(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> ApiResult<(Arc<TenantConfig>, T)> {
    let tenant_id = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("tenant_id").and_then(Value::as_str).map(str::to_string))
        .ok_or_else(|| AppError::Unauthorized("request does not name a tenant".to_string()))?;

    let tenant = state
        .pipeline
        .authenticate(&tenant_id, body, presented_signature(headers))
        .await?;

    let request = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid request body: {}", e)))?;
    Ok((tenant, request))
}

async fn load_record(
    state: &AppState,
    tenant: &TenantConfig,
    module: &str,
    record_id: &str,
) -> ApiResult<(FieldResolver, Value)> {
    let resolver = state.pipeline.resolver_for(tenant);
    let record = resolver.fetch(module, record_id).await.map_err(|e| match e {
        ResolveError::RecordNotFound { module, id } => AppError::NotFound(format!("{} record '{}'", module, id)),
        e if e.is_transient() => AppError::Unavailable(e.to_string()),
        e => AppError::BadRequest(e.to_string()),
    })?;

    Ok((resolver, record))
}

async fn resolve_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<TokenResponse>> {
    let (tenant, request): (_, TokenRequest) = authenticated(&state, &headers, &body).await?;
    let (resolver, record) = load_record(&state, &tenant, &request.module, &request.record_id).await?;

    let mappings = request.mappings.as_deref().unwrap_or(&tenant.field_mappings);
    let infer = request.infer.unwrap_or(tenant.infer_tokens);
    let report = generate_tokens(&resolver, mappings, &record, infer).await;

    Ok(Json(TokenResponse {
        tokens: report.tokens,
        missing: report.missing,
    }))
}

async fn resolve_recipient_list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<RecipientReport>> {
    let (tenant, request): (_, RecipientRequest) = authenticated(&state, &headers, &body).await?;
    let (resolver, record) = load_record(&state, &tenant, &request.module, &request.record_id).await?;

    Ok(Json(resolve_recipients(&resolver, &request.recipients, &record).await))
}
