use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Activity,
    Note,
    Notification,
    Webhook,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Note => "note",
            Self::Notification => "notification",
            Self::Webhook => "webhook",
        }
    }
}

/// One audit line written by an automation action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub tenant_id: String,
    pub rule_id: Option<Uuid>,
    pub kind: ActivityKind,
    pub message: String,
    pub metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(kind: ActivityKind, entry_id: Uuid, tenant_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_id,
            tenant_id: tenant_id.into(),
            rule_id: None,
            kind,
            message: message.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn rule(mut self, rule_id: Uuid) -> Self {
        self.rule_id = Some(rule_id);
        self
    }

    pub fn metadata_json(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Append-only activity trail for ledger entries.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(&self, entry: &ActivityEntry) -> AuditResult<()>;

    async fn for_entry(&self, entry_id: Uuid) -> AuditResult<Vec<ActivityEntry>>;
}

pub struct PgActivityLog {
    pool: PgPool,
}

impl PgActivityLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: Uuid,
    entry_id: Uuid,
    tenant_id: String,
    rule_id: Option<Uuid>,
    kind: String,
    message: String,
    metadata: Option<JsonValue>,
    created_at: DateTime<Utc>,
}

impl ActivityRow {
    fn into_entry(self) -> AuditResult<ActivityEntry> {
        let kind = serde_json::from_value(JsonValue::String(self.kind))?;
        Ok(ActivityEntry {
            id: self.id,
            entry_id: self.entry_id,
            tenant_id: self.tenant_id,
            rule_id: self.rule_id,
            kind,
            message: self.message,
            metadata: self.metadata,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl ActivityLog for PgActivityLog {
    async fn record(&self, entry: &ActivityEntry) -> AuditResult<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_log (id, entry_id, tenant_id, rule_id, kind, message, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.entry_id)
        .bind(&entry.tenant_id)
        .bind(entry.rule_id)
        .bind(entry.kind.as_str())
        .bind(&entry.message)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn for_entry(&self, entry_id: Uuid) -> AuditResult<Vec<ActivityEntry>> {
        let rows: Vec<ActivityRow> = sqlx::query_as(
            r#"
            SELECT id, entry_id, tenant_id, rule_id, kind, message, metadata, created_at
            FROM activity_log
            WHERE entry_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ActivityRow::into_entry).collect()
    }
}

/// In-process activity log used when running without a database.
#[derive(Default)]
pub struct MemoryActivityLog {
    entries: RwLock<Vec<ActivityEntry>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn all(&self) -> Vec<ActivityEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl ActivityLog for MemoryActivityLog {
    async fn record(&self, entry: &ActivityEntry) -> AuditResult<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn for_entry(&self, entry_id: Uuid) -> AuditResult<Vec<ActivityEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.entry_id == entry_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_log_filters_by_entry() {
        let log = MemoryActivityLog::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        log.record(&ActivityEntry::new(ActivityKind::Activity, first, "t1", "signed"))
            .await
            .unwrap();
        log.record(&ActivityEntry::new(ActivityKind::Note, second, "t1", "other"))
            .await
            .unwrap();

        let entries = log.for_entry(first).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "signed");
        assert_eq!(log.all().await.len(), 2);
    }

    #[test]
    fn test_kind_round_trips_through_text() {
        let kind: ActivityKind = serde_json::from_value(JsonValue::String("webhook".into())).unwrap();
        assert_eq!(kind, ActivityKind::Webhook);
        assert_eq!(kind.as_str(), "webhook");
    }
}
