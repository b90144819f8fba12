// Tenant resolution - which tenant owns an inbound event

use serde_json::Value;
use tracing::debug;

use super::triggers::normalize_payload;
use crate::resolver::value::{as_non_empty_text, find_named, lookup_str};

type Strategy = fn(&Value) -> Option<String>;

/// Ordered fallbacks; the first non-empty match wins.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("metadata.tenant_id", metadata_tenant_id),
    ("metadata.docuflow_tenant_id", metadata_compound_key),
    ("record field tenant_id", record_field),
    ("payload token", payload_token),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct TenantResolver;

impl TenantResolver {
    pub fn new() -> Self {
        Self
    }

    /// Returns None when no strategy matches. The event cannot be admitted then.
    pub fn resolve(&self, payload: &Value) -> Option<String> {
        let normalized;
        let payload = if payload.is_array() {
            normalized = normalize_payload(payload.clone());
            &normalized
        } else {
            payload
        };

        STRATEGIES.iter().find_map(|(name, strategy)| {
            let found = strategy(payload)?;
            debug!("Tenant '{}' resolved via {}", found, name);
            Some(found)
        })
    }
}

fn metadata(payload: &Value) -> Option<&Value> {
    lookup_str(payload, "data.metadata").or_else(|| lookup_str(payload, "metadata"))
}

fn metadata_tenant_id(payload: &Value) -> Option<String> {
    metadata(payload)
        .and_then(|m| m.get("tenant_id"))
        .and_then(as_non_empty_text)
}

// Set when the document-creation step embedded tenant context
fn metadata_compound_key(payload: &Value) -> Option<String> {
    metadata(payload)
        .and_then(|m| m.get("docuflow_tenant_id"))
        .and_then(as_non_empty_text)
}

fn record_field(payload: &Value) -> Option<String> {
    ["data.fields", "data.values"]
        .iter()
        .filter_map(|path| lookup_str(payload, path))
        .find_map(|fields| find_named(fields, &["tenant_id"]).and_then(as_non_empty_text))
}

fn payload_token(payload: &Value) -> Option<String> {
    ["data.tokens", "tokens"]
        .iter()
        .filter_map(|path| lookup_str(payload, path))
        .find_map(|tokens| find_named(tokens, &["TenantId", "tenant_id"]).and_then(as_non_empty_text))
}
