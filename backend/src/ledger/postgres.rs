// Postgres-backed ledger store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docuflow_shared::{LedgerEntry, LedgerStatus};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use super::store::LedgerStore;
use super::LedgerError;

const SELECT_COLUMNS: &str = r#"
    SELECT id, external_event_id, tenant_id, event_type, record_id, record_name, payload,
           status, actions_triggered, error_message, processing_ms, retry_count, max_retries,
           next_retry_at, received_at, started_at, processed_at
    FROM event_ledger
"#;

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    external_event_id: Option<String>,
    tenant_id: String,
    event_type: String,
    record_id: Option<String>,
    record_name: Option<String>,
    payload: JsonValue,
    status: String,
    actions_triggered: i32,
    error_message: Option<String>,
    processing_ms: Option<i64>,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    received_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<LedgerStatus>()
            .map_err(|e| LedgerError::Corrupt(format!("entry {}: {}", row.id, e)))?;

        Ok(LedgerEntry {
            id: row.id,
            external_event_id: row.external_event_id,
            tenant_id: row.tenant_id,
            event_type: row.event_type,
            record_id: row.record_id,
            record_name: row.record_name,
            payload: row.payload,
            status,
            actions_triggered: row.actions_triggered,
            error_message: row.error_message,
            processing_ms: row.processing_ms,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            next_retry_at: row.next_retry_at,
            received_at: row.received_at,
            started_at: row.started_at,
            processed_at: row.processed_at,
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert(&self, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        // The UNIQUE constraint on external_event_id decides concurrent admissions
        let result = sqlx::query(
            r#"
            INSERT INTO event_ledger (
                id, external_event_id, tenant_id, event_type, record_id, record_name, payload,
                status, actions_triggered, retry_count, max_retries, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (external_event_id) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(&entry.external_event_id)
        .bind(&entry.tenant_id)
        .bind(&entry.event_type)
        .bind(&entry.record_id)
        .bind(&entry.record_name)
        .bind(&entry.payload)
        .bind(entry.status.as_str())
        .bind(entry.actions_triggered)
        .bind(entry.retry_count)
        .bind(entry.max_retries)
        .bind(entry.received_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: Uuid) -> Result<Option<LedgerEntry>, LedgerError> {
        let row: Option<LedgerRow> = sqlx::query_as(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(LedgerEntry::try_from).transpose()
    }

    async fn find_by_external_id(&self, external_event_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let row: Option<LedgerRow> = sqlx::query_as(&format!("{} WHERE external_event_id = $1", SELECT_COLUMNS))
            .bind(external_event_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(LedgerEntry::try_from).transpose()
    }

    async fn compare_and_set(&self, expected: LedgerStatus, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE event_ledger
            SET status = $3,
                actions_triggered = $4,
                error_message = $5,
                processing_ms = $6,
                retry_count = $7,
                next_retry_at = $8,
                started_at = $9,
                processed_at = $10,
                record_id = $11,
                record_name = $12
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(entry.id)
        .bind(expected.as_str())
        .bind(entry.status.as_str())
        .bind(entry.actions_triggered)
        .bind(&entry.error_message)
        .bind(entry.processing_ms)
        .bind(entry.retry_count)
        .bind(entry.next_retry_at)
        .bind(entry.started_at)
        .bind(entry.processed_at)
        .bind(&entry.record_id)
        .bind(&entry.record_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Zero rows: either a lost race or no such entry
        match self.get(entry.id).await? {
            Some(_) => Ok(false),
            None => Err(LedgerError::NotFound(entry.id)),
        }
    }

    async fn due_for_retry(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "{} WHERE status = 'failed' AND next_retry_at <= $1 ORDER BY next_retry_at ASC, received_at ASC LIMIT $2",
            SELECT_COLUMNS
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn stalled(&self, status: LedgerStatus, before: DateTime<Utc>, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "{} WHERE status = $1 AND COALESCE(started_at, received_at) < $2 \
             ORDER BY COALESCE(started_at, received_at) ASC LIMIT $3",
            SELECT_COLUMNS
        ))
        .bind(status.as_str())
        .bind(before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }
}
