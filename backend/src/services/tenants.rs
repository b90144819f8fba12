//! Per-tenant configuration: shared secret, rules, token mappings and the
//! relationship-to-entity map.

use async_trait::async_trait;
use docuflow_shared::{FieldMapping, Rule};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::resolver::entity::EntityType;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("cannot read tenant file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid tenant file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid tenant configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    /// Relationship label -> entity type, consulted before keyword inference
    #[serde(default)]
    pub relationships: HashMap<String, EntityType>,
    #[serde(default)]
    pub infer_tokens: bool,
    #[serde(default)]
    pub max_retries: Option<i32>,
}

impl fmt::Debug for TenantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantConfig")
            .field("tenant_id", &self.tenant_id)
            .field("webhook_secret", &"[REDACTED]")
            .field("rules", &self.rules.len())
            .field("field_mappings", &self.field_mappings.len())
            .field("relationships", &self.relationships)
            .field("infer_tokens", &self.infer_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl TenantConfig {
    pub fn new(tenant_id: &str, webhook_secret: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            webhook_secret: webhook_secret.to_string(),
            rules: Vec::new(),
            field_mappings: Vec::new(),
            relationships: HashMap::new(),
            infer_tokens: false,
            max_retries: None,
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.field_mappings.push(mapping);
        self
    }

    /// Rules carry their owning tenant. A rule naming another tenant is rejected.
    fn normalize(mut self) -> Result<Self, DirectoryError> {
        if self.tenant_id.trim().is_empty() {
            return Err(DirectoryError::Invalid("tenant_id must not be empty".to_string()));
        }
        if matches!(self.max_retries, Some(n) if n < 1) {
            return Err(DirectoryError::Invalid(format!(
                "tenant '{}': max_retries must be at least 1",
                self.tenant_id
            )));
        }

        for rule in &mut self.rules {
            if rule.tenant_id.is_empty() {
                rule.tenant_id = self.tenant_id.clone();
            } else if rule.tenant_id != self.tenant_id {
                return Err(DirectoryError::Invalid(format!(
                    "rule '{}' belongs to tenant '{}' but is configured under '{}'",
                    rule.name, rule.tenant_id, self.tenant_id
                )));
            }
            if rule.timeout_seconds == 0 {
                return Err(DirectoryError::Invalid(format!("rule '{}' has a zero timeout", rule.name)));
            }
        }
        Ok(self)
    }
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<Arc<TenantConfig>>, DirectoryError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TenantFile {
    Wrapped { tenants: Vec<TenantConfig> },
    List(Vec<TenantConfig>),
}

/// Tenants loaded from a JSON document and held in memory.
pub struct StaticTenantDirectory {
    path: Option<PathBuf>,
    tenants: RwLock<HashMap<String, Arc<TenantConfig>>>,
}

impl StaticTenantDirectory {
    #[cfg(test)]
    pub fn from_tenants(tenants: Vec<TenantConfig>) -> Result<Self, DirectoryError> {
        Ok(Self {
            path: None,
            tenants: RwLock::new(index(tenants)?),
        })
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path = path.as_ref().to_path_buf();
        let tenants = read_file(&path).await?;
        info!("Loaded {} tenants from {}", tenants.len(), path.display());
        Ok(Self {
            path: Some(path),
            tenants: RwLock::new(tenants),
        })
    }

    /// Re-reads the backing file. The current set stays in place if the new
    /// file is unreadable or invalid.
    pub async fn reload(&self) -> Result<usize, DirectoryError> {
        let Some(path) = &self.path else {
            return Ok(self.tenants.read().await.len());
        };
        let fresh = read_file(path).await?;
        let count = fresh.len();
        *self.tenants.write().await = fresh;
        info!("Reloaded {} tenants", count);
        Ok(count)
    }
}

async fn read_file(path: &Path) -> Result<HashMap<String, Arc<TenantConfig>>, DirectoryError> {
    let raw = tokio::fs::read(path).await.map_err(|source| DirectoryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let tenants = match serde_json::from_slice::<TenantFile>(&raw)? {
        TenantFile::Wrapped { tenants } | TenantFile::List(tenants) => tenants,
    };
    index(tenants)
}

fn index(tenants: Vec<TenantConfig>) -> Result<HashMap<String, Arc<TenantConfig>>, DirectoryError> {
    let mut indexed = HashMap::with_capacity(tenants.len());
    for tenant in tenants {
        let tenant = tenant.normalize()?;
        let id = tenant.tenant_id.clone();
        if indexed.insert(id.clone(), Arc::new(tenant)).is_some() {
            return Err(DirectoryError::Invalid(format!("duplicate tenant '{}'", id)));
        }
    }
    Ok(indexed)
}

#[async_trait]
impl TenantDirectory for StaticTenantDirectory {
    async fn get(&self, tenant_id: &str) -> Result<Option<Arc<TenantConfig>>, DirectoryError> {
        Ok(self.tenants.read().await.get(tenant_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TENANTS: &str = r#"{
        "tenants": [{
            "tenant_id": "acme",
            "webhook_secret": "whsec_acme",
            "relationships": {"Decision Maker": "Contacts"},
            "rules": [{
                "name": "Log signatures",
                "trigger_event": "document.completed",
                "then_actions": [{"type": "log_activity", "message": "signed"}]
            }]
        }]
    }"#;

    #[tokio::test]
    async fn test_load_fills_rule_tenant() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TENANTS.as_bytes()).unwrap();

        let directory = StaticTenantDirectory::from_file(file.path()).await.unwrap();
        let tenant = directory.get("acme").await.unwrap().unwrap();
        assert_eq!(tenant.rules[0].tenant_id, "acme");
        assert_eq!(tenant.relationships.get("Decision Maker"), Some(&EntityType::Contacts));
        assert!(directory.get("globex").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reload_keeps_old_set_on_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TENANTS.as_bytes()).unwrap();
        let directory = StaticTenantDirectory::from_file(file.path()).await.unwrap();

        std::fs::write(file.path(), "{not json").unwrap();
        assert!(directory.reload().await.is_err());
        assert!(directory.get("acme").await.unwrap().is_some());

        std::fs::write(file.path(), r#"[{"tenant_id": "globex", "webhook_secret": "s"}]"#).unwrap();
        assert_eq!(directory.reload().await.unwrap(), 1);
        assert!(directory.get("acme").await.unwrap().is_none());
        assert!(directory.get("globex").await.unwrap().is_some());
    }

    #[test]
    fn test_rule_for_other_tenant_is_rejected() {
        let rule = Rule::new("globex", "Foreign", "document.completed");
        let result = StaticTenantDirectory::from_tenants(vec![TenantConfig::new("acme", "s").with_rule(rule)]);
        assert!(matches!(result, Err(DirectoryError::Invalid(_))));
    }

    #[test]
    fn test_debug_hides_secret() {
        let rendered = format!("{:?}", TenantConfig::new("acme", "whsec_super_secret"));
        assert!(!rendered.contains("whsec_super_secret"));
    }
}
