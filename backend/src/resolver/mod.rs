//! Field resolution against the event context and the CRM entity graph.

pub mod entity;
pub mod recipients;
pub mod tokens;
pub mod value;

use docuflow_shared::FieldPath;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::services::crm::{CrmError, DataSource};
use entity::{foreign_key_candidates, EntityInference, EntityType};

/// Why a reference produced no value.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("field '{0}' is not present")]
    MissingField(String),
    #[error("no foreign key for relationship '{0}'")]
    MissingForeignKey(String),
    #[error("cannot infer an entity type for relationship '{0}'")]
    UnknownEntity(String),
    #[error("{module} record '{id}' not found")]
    RecordNotFound { module: String, id: String },
    #[error("fetching {module} record '{id}' timed out")]
    Timeout { module: String, id: String },
    #[error(transparent)]
    DataSource(#[from] CrmError),
}

impl ResolveError {
    /// Transport trouble, as opposed to data that simply is not there.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::DataSource(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// A mapped token whose reference produced no value, kept as a warning.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ResolutionMiss {
    pub token: String,
    pub reference: String,
    pub reason: String,
}

#[derive(Clone)]
pub struct FieldResolver {
    source: Arc<dyn DataSource>,
    fetch_timeout: Duration,
    inference: EntityInference,
}

impl FieldResolver {
    pub fn new(source: Arc<dyn DataSource>, fetch_timeout: Duration) -> Self {
        Self {
            source,
            fetch_timeout,
            inference: EntityInference::default(),
        }
    }

    /// Tenant-specific relationship labels take precedence over keyword inference.
    pub fn with_relationships(mut self, relationships: &HashMap<String, EntityType>) -> Self {
        self.inference = EntityInference::new(relationships);
        self
    }

    /// Fetches a record by module and id, bounded by the fetch timeout.
    pub async fn fetch(&self, module: &str, id: &str) -> Result<Value, ResolveError> {
        let fetched = tokio::time::timeout(self.fetch_timeout, self.source.fetch(module, id))
            .await
            .map_err(|_| ResolveError::Timeout {
                module: module.to_string(),
                id: id.to_string(),
            })??;

        fetched.ok_or_else(|| ResolveError::RecordNotFound {
            module: module.to_string(),
            id: id.to_string(),
        })
    }

    pub async fn try_resolve(&self, path: &FieldPath, root: &Value) -> Result<Value, ResolveError> {
        match path {
            FieldPath::Direct(segments) => value::lookup(root, segments.as_slice())
                .cloned()
                .ok_or_else(|| ResolveError::MissingField(path.to_string())),
            FieldPath::Related { source, hops, field } => {
                // `opportunity>>...` may name a nested object on the root
                let mut current = match value::lookup(root, &[source.as_str()]) {
                    Some(nested) if nested.is_object() => nested.clone(),
                    _ => root.clone(),
                };

                for hop in hops {
                    current = self.follow(&current, hop).await?;
                }

                value::lookup(&current, field.as_slice())
                    .cloned()
                    .ok_or_else(|| ResolveError::MissingField(path.to_string()))
            }
        }
    }

    /// Resolves a reference, logging and swallowing any miss.
    pub async fn resolve(&self, path: &FieldPath, root: &Value) -> Option<Value> {
        match self.try_resolve(path, root).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(reference = %path, "Field resolution miss: {}", e);
                None
            }
        }
    }

    /// One relationship hop: find the foreign key, infer the entity, fetch it.
    async fn follow(&self, current: &Value, label: &str) -> Result<Value, ResolveError> {
        let target = self
            .inference
            .infer(label)
            .ok_or_else(|| ResolveError::UnknownEntity(label.to_string()))?;

        let id = foreign_key_candidates(label, Some(target))
            .iter()
            .find_map(|candidate| value::lookup(current, &[candidate.as_str()]).and_then(value::as_non_empty_text))
            .ok_or_else(|| ResolveError::MissingForeignKey(label.to_string()))?;

        debug!("Following '{}' to {} {}", label, target, id);
        self.fetch(target.module_name(), &id).await
    }
}
