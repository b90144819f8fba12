// Ledger storage - persistence seam for ledger entries

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docuflow_shared::{LedgerEntry, LedgerStatus};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::LedgerError;

/// Durable storage for ledger entries.
///
/// Two guarantees carry the whole state machine: `insert` never creates a
/// second row for an external event id, and `compare_and_set` only writes when
/// the stored status still equals `expected`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Returns false when an entry with the same external event id exists.
    async fn insert(&self, entry: &LedgerEntry) -> Result<bool, LedgerError>;

    async fn get(&self, id: Uuid) -> Result<Option<LedgerEntry>, LedgerError>;

    async fn find_by_external_id(&self, external_event_id: &str) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Overwrites the mutable fields of `entry` if the stored status is
    /// `expected`. Returns false when another writer got there first.
    async fn compare_and_set(&self, expected: LedgerStatus, entry: &LedgerEntry) -> Result<bool, LedgerError>;

    /// Failed entries whose next retry time has passed, oldest first.
    async fn due_for_retry(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Entries in `status` whose last attempt (or receipt, if never started)
    /// is older than `before`, oldest first.
    async fn stalled(&self, status: LedgerStatus, before: DateTime<Utc>, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError>;
}

fn last_touched(entry: &LedgerEntry) -> DateTime<Utc> {
    entry.started_at.unwrap_or(entry.received_at)
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<Uuid, LedgerEntry>,
    by_external_id: HashMap<String, Uuid>,
}

/// In-process ledger used for tests and database-less runs.
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert(&self, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;

        if let Some(external_id) = &entry.external_event_id {
            if state.by_external_id.contains_key(external_id) {
                return Ok(false);
            }
            state.by_external_id.insert(external_id.clone(), entry.id);
        }
        state.entries.insert(entry.id, entry.clone());
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.state.lock().await.entries.get(&id).cloned())
    }

    async fn find_by_external_id(&self, external_event_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .by_external_id
            .get(external_event_id)
            .and_then(|id| state.entries.get(id))
            .cloned())
    }

    async fn compare_and_set(&self, expected: LedgerStatus, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;
        match state.entries.get_mut(&entry.id) {
            Some(current) if current.status == expected => {
                *current = entry.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(LedgerError::NotFound(entry.id)),
        }
    }

    async fn due_for_retry(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.lock().await;
        let mut due: Vec<LedgerEntry> = state
            .entries
            .values()
            .filter(|e| e.status == LedgerStatus::Failed && e.next_retry_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.next_retry_at, e.received_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn stalled(&self, status: LedgerStatus, before: DateTime<Utc>, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.lock().await;
        let mut stalled: Vec<LedgerEntry> = state
            .entries
            .values()
            .filter(|e| e.status == status && last_touched(e) < before)
            .cloned()
            .collect();
        stalled.sort_by_key(last_touched);
        stalled.truncate(limit);
        Ok(stalled)
    }
}
