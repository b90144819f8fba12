// Retry Processor Job - Re-admits failed ledger entries once their backoff elapses
// and reclaims entries whose processing was abandoned

use chrono::{DateTime, Utc};
use docuflow_shared::{LedgerEntry, LedgerStatus};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::scheduler::JobResult;
use crate::pipeline::Pipeline;

pub const DEFAULT_BATCH_SIZE: usize = 50;

const LEASE_EXPIRED: &str = "processing lease expired before the attempt finished";

pub struct RetryScheduler {
    pipeline: Arc<Pipeline>,
    batch_size: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryRunResult {
    pub entries_due: i32,
    /// Stalled entries handed back to the state machine
    pub recovered: i32,
    pub readmitted: i32,
    pub succeeded: i32,
    pub failed_again: i32,
    pub permanently_failed: i32,
    pub errors: Vec<String>,
}

impl RetryScheduler {
    pub fn new(pipeline: Arc<Pipeline>, batch_size: usize) -> Self {
        Self {
            pipeline,
            batch_size: batch_size.max(1),
        }
    }

    /// One scan. Stalled entries are reclaimed first: an expired `processing`
    /// attempt counts as a retryable failure and an unclaimed `pending` entry
    /// is processed now. Then every failed entry due at `now` is moved back
    /// to pending and reprocessed from its stored payload. An entry another
    /// worker claimed first is skipped.
    pub async fn run_once(&self, now: DateTime<Utc>) -> JobResult<RetryRunResult> {
        let mut result = RetryRunResult::default();
        self.recover_stalled(now, &mut result).await?;

        let ledger = self.pipeline.ledger();
        let due = ledger.due_retries(now, self.batch_size).await?;
        result.entries_due = due.len() as i32;

        for entry in due {
            let entry_id = entry.id;
            let readmitted = match ledger.readmit(entry_id).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%entry_id, "Failed to re-admit entry: {}", e);
                    result.errors.push(format!("{}: {}", entry_id, e));
                    continue;
                }
            };
            result.readmitted += 1;
            self.process(readmitted, &mut result).await;
        }

        if result.readmitted > 0 || result.recovered > 0 {
            info!(
                "Retry scan: {} due, {} recovered, {} succeeded, {} failed again, {} permanently failed",
                result.entries_due, result.recovered, result.succeeded, result.failed_again, result.permanently_failed
            );
        }
        Ok(result)
    }

    async fn recover_stalled(&self, now: DateTime<Utc>, result: &mut RetryRunResult) -> JobResult<()> {
        let ledger = self.pipeline.ledger();
        let lease = chrono::Duration::from_std(self.pipeline.processing_lease()).unwrap_or_else(|_| chrono::Duration::hours(1));
        let cutoff = now - lease;

        for entry in ledger.stalled(LedgerStatus::Processing, cutoff, self.batch_size).await? {
            let entry_id = entry.id;
            match ledger.fail(entry_id, LEASE_EXPIRED, true).await {
                Ok(failed) => {
                    warn!(%entry_id, status = %failed.status, "Reclaimed abandoned processing attempt");
                    result.recovered += 1;
                }
                Err(e) => {
                    warn!(%entry_id, "Failed to reclaim stalled entry: {}", e);
                    result.errors.push(format!("{}: {}", entry_id, e));
                }
            }
        }

        for entry in ledger.stalled(LedgerStatus::Pending, cutoff, self.batch_size).await? {
            warn!(entry_id = %entry.id, "Processing unclaimed pending entry");
            result.recovered += 1;
            self.process(entry, result).await;
        }

        Ok(())
    }

    async fn process(&self, entry: LedgerEntry, result: &mut RetryRunResult) {
        let entry_id = entry.id;
        match self.pipeline.process_entry(entry).await {
            Ok(report) => match report.status {
                LedgerStatus::Success => result.succeeded += 1,
                LedgerStatus::Failed => result.failed_again += 1,
                LedgerStatus::PermanentlyFailed => result.permanently_failed += 1,
                other => warn!(%entry_id, "Retry left entry in unexpected state {}", other),
            },
            Err(e) => {
                error!(%entry_id, "Retry processing failed: {}", e);
                result.errors.push(format!("{}: {}", entry_id, e));
            }
        }
    }
}
