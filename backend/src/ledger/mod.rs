// Event Ledger - admission, deduplication and the processing state machine

pub mod postgres;
pub mod store;

pub use postgres::PgLedgerStore;
pub use store::{LedgerStore, MemoryLedgerStore};

use chrono::{DateTime, Utc};
use docuflow_shared::{LedgerEntry, LedgerStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RetryConfig;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger entry {0} not found")]
    NotFound(Uuid),
    #[error("ledger entry {id} cannot move from {from} to {to}")]
    InvalidTransition { id: Uuid, from: LedgerStatus, to: LedgerStatus },
    #[error("ledger entry {id} was modified concurrently (expected {expected})")]
    Conflict { id: Uuid, expected: LedgerStatus },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}

/// Result of an admission attempt.
#[derive(Debug, Clone)]
pub enum Admission {
    Admitted(LedgerEntry),
    /// An entry with the same external event id already exists
    Duplicate { existing_id: Option<Uuid>, status: Option<LedgerStatus> },
}

/// Exponential delay measured from the event's receipt.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl From<RetryConfig> for BackoffPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            base: config.base_delay,
            max: config.max_delay,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `retry_count + 1`: base * 2^(retry_count - 1),
    /// capped at `max`.
    pub fn delay(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.saturating_sub(1).clamp(0, 31) as u32;
        self.base
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn next_retry_at(&self, received_at: DateTime<Utc>, retry_count: i32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay(retry_count)).unwrap_or_else(|_| chrono::Duration::days(1));
        received_at + delay
    }
}

#[derive(Clone)]
pub struct EventLedger {
    store: Arc<dyn LedgerStore>,
    backoff: BackoffPolicy,
}

impl EventLedger {
    pub fn new(store: Arc<dyn LedgerStore>, backoff: BackoffPolicy) -> Self {
        Self { store, backoff }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<LedgerEntry>, LedgerError> {
        self.store.get(id).await
    }

    /// Inserts a new pending entry unless its external event id was seen
    /// before. Concurrent admissions of one id yield exactly one `Admitted`.
    pub async fn admit(&self, entry: LedgerEntry) -> Result<Admission, LedgerError> {
        if self.store.insert(&entry).await? {
            info!(
                entry_id = %entry.id,
                tenant_id = %entry.tenant_id,
                event_type = %entry.event_type,
                "Event admitted"
            );
            return Ok(Admission::Admitted(entry));
        }

        let existing = match &entry.external_event_id {
            Some(external_id) => self.store.find_by_external_id(external_id).await?,
            None => None,
        };
        info!(
            tenant_id = %entry.tenant_id,
            external_event_id = ?entry.external_event_id,
            "Duplicate event ignored"
        );
        Ok(Admission::Duplicate {
            existing_id: existing.as_ref().map(|e| e.id),
            status: existing.map(|e| e.status),
        })
    }

    pub async fn start_processing(&self, id: Uuid) -> Result<LedgerEntry, LedgerError> {
        self.transition(id, LedgerStatus::Processing, |entry| {
            entry.started_at = Some(Utc::now());
            entry.error_message = None;
        })
        .await
    }

    pub async fn complete(&self, id: Uuid, actions_triggered: i32, processing_ms: i64) -> Result<LedgerEntry, LedgerError> {
        self.transition(id, LedgerStatus::Success, |entry| {
            entry.actions_triggered = actions_triggered;
            entry.processing_ms = Some(processing_ms);
            entry.processed_at = Some(Utc::now());
            entry.next_retry_at = None;
        })
        .await
    }

    /// Records a failed attempt. The retry count always increments; the entry
    /// stays retryable only while the count is below its bound.
    pub async fn fail(&self, id: Uuid, error: &str, retryable: bool) -> Result<LedgerEntry, LedgerError> {
        let current = self.require(id).await?;
        let retry_count = current.retry_count + 1;
        let exhausted = retry_count >= current.max_retries;

        let (status, next_retry_at) = if retryable && !exhausted {
            (LedgerStatus::Failed, Some(self.backoff.next_retry_at(current.received_at, retry_count)))
        } else {
            (LedgerStatus::PermanentlyFailed, None)
        };

        let entry = self
            .apply(current, status, |entry| {
                entry.retry_count = retry_count;
                entry.error_message = Some(error.to_string());
                entry.next_retry_at = next_retry_at;
                entry.processed_at = Some(Utc::now());
            })
            .await?;

        match entry.status {
            LedgerStatus::Failed => warn!(
                entry_id = %id,
                retry_count,
                next_retry_at = ?entry.next_retry_at,
                "Event processing failed: {}", error
            ),
            _ => warn!(entry_id = %id, retry_count, "Event permanently failed: {}", error),
        }
        Ok(entry)
    }

    /// Moves an entry straight to `permanently_failed` regardless of budget.
    pub async fn fail_permanently(&self, id: Uuid, error: &str) -> Result<LedgerEntry, LedgerError> {
        self.fail(id, error, false).await
    }

    /// Re-admits a failed entry. Returns None when another worker already
    /// claimed it, so two schedulers never reprocess the same attempt.
    pub async fn readmit(&self, id: Uuid) -> Result<Option<LedgerEntry>, LedgerError> {
        let current = self.require(id).await?;
        if current.status != LedgerStatus::Failed {
            return Ok(None);
        }

        let mut next = current.clone();
        next.status = LedgerStatus::Pending;
        next.next_retry_at = None;

        if self.store.compare_and_set(LedgerStatus::Failed, &next).await? {
            info!(entry_id = %id, retry_count = next.retry_count, "Event re-admitted for retry");
            Ok(Some(next))
        } else {
            Ok(None)
        }
    }

    pub async fn due_retries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store.due_for_retry(now, limit).await
    }

    /// Entries stuck in `status` since before `before`: attempts whose
    /// worker went away, or admissions nobody picked up.
    pub async fn stalled(
        &self,
        status: LedgerStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store.stalled(status, before, limit).await
    }

    async fn require(&self, id: Uuid) -> Result<LedgerEntry, LedgerError> {
        self.store.get(id).await?.ok_or(LedgerError::NotFound(id))
    }

    async fn transition(
        &self,
        id: Uuid,
        to: LedgerStatus,
        update: impl FnOnce(&mut LedgerEntry),
    ) -> Result<LedgerEntry, LedgerError> {
        let current = self.require(id).await?;
        self.apply(current, to, update).await
    }

    async fn apply(
        &self,
        current: LedgerEntry,
        to: LedgerStatus,
        update: impl FnOnce(&mut LedgerEntry),
    ) -> Result<LedgerEntry, LedgerError> {
        let from = current.status;
        if !from.can_transition_to(to) {
            return Err(LedgerError::InvalidTransition { id: current.id, from, to });
        }

        let mut next = current;
        next.status = to;
        update(&mut next);

        if self.store.compare_and_set(from, &next).await? {
            Ok(next)
        } else {
            Err(LedgerError::Conflict { id: next.id, expected: from })
        }
    }
}
