use chrono::Utc;
use docuflow_shared::{LedgerEntry, LedgerStatus};
use std::time::Duration;

use crate::jobs::retry::RetryScheduler;
use crate::ledger::{BackoffPolicy, LedgerStore};
use crate::pipeline::IngestOutcome;
use crate::tests::fixtures::*;
use crate::tests::helpers::sign;

const IMMEDIATE: BackoffPolicy = BackoffPolicy {
    base: Duration::ZERO,
    max: Duration::ZERO,
};

async fn ingest_failing(t: &TestPipeline, event_id: &str) -> uuid::Uuid {
    let raw = serde_json::to_vec(&completed_event(event_id, Some("15000"))).unwrap();
    match t.pipeline.ingest(&raw, Some(&sign(&raw, SECRET)), None, Utc::now()).await.unwrap() {
        IngestOutcome::Processed(report) => {
            assert_eq!(report.status, LedgerStatus::Failed);
            report.entry_id
        }
        other => panic!("expected processing, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_budget_ends_in_permanent_failure() {
    let t = test_pipeline_with_backoff(vec![acme_tenant()], acme_crm().failing(), IMMEDIATE);
    let retry = RetryScheduler::new(t.pipeline.clone(), 10);
    let entry_id = ingest_failing(&t, "evt-flaky").await;

    let second = retry.run_once(Utc::now()).await.unwrap();
    assert_eq!(second.readmitted, 1);
    assert_eq!(second.failed_again, 1);

    let third = retry.run_once(Utc::now()).await.unwrap();
    assert_eq!(third.permanently_failed, 1);

    let fourth = retry.run_once(Utc::now()).await.unwrap();
    assert_eq!(fourth.entries_due, 0);

    let entry = t.pipeline.ledger().get(entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, LedgerStatus::PermanentlyFailed);
    assert_eq!(entry.retry_count, 3);
    assert_eq!(t.crm.fetch_count().await, 3);
}

#[tokio::test]
async fn test_retry_succeeds_after_recovery() {
    let t = test_pipeline_with_backoff(vec![acme_tenant()], acme_crm().failing(), IMMEDIATE);
    let retry = RetryScheduler::new(t.pipeline.clone(), 10);
    let entry_id = ingest_failing(&t, "evt-recovers").await;

    t.crm.recover();
    let result = retry.run_once(Utc::now()).await.unwrap();

    assert_eq!(result.succeeded, 1);
    let entry = t.pipeline.ledger().get(entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, LedgerStatus::Success);
    assert_eq!(entry.retry_count, 1);
    assert_eq!(t.crm.updates().await.len(), 1);
}

#[tokio::test]
async fn test_entries_wait_for_backoff() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm().failing());
    let retry = RetryScheduler::new(t.pipeline.clone(), 10);
    let entry_id = ingest_failing(&t, "evt-later").await;

    let result = retry.run_once(Utc::now()).await.unwrap();
    assert_eq!(result.entries_due, 0);

    let entry = t.pipeline.ledger().get(entry_id).await.unwrap().unwrap();
    let due_at = entry.next_retry_at.unwrap();
    let later = retry.run_once(due_at).await.unwrap();
    assert_eq!(later.readmitted, 1);
}

#[tokio::test]
async fn test_processing_survives_caller_going_away() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm().with_delay(Duration::from_millis(100)));
    let raw = serde_json::to_vec(&completed_event("evt-dropped", Some("15000"))).unwrap();
    let signature = sign(&raw, SECRET);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        t.pipeline.ingest(&raw, Some(&signature), None, Utc::now()),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_secs(2)).await;

    let entry = t.store.find_by_external_id("evt-dropped").await.unwrap().unwrap();
    assert_eq!(entry.status, LedgerStatus::Success);
    assert_eq!(t.crm.updates().await.len(), 1);

    match t.pipeline.ingest(&raw, Some(&signature), None, Utc::now()).await.unwrap() {
        IngestOutcome::Duplicate { status, .. } => assert_eq!(status, Some(LedgerStatus::Success)),
        other => panic!("expected duplicate, got {:?}", other),
    }
}

fn stored_entry(event_id: &str, received_at: chrono::DateTime<Utc>) -> LedgerEntry {
    LedgerEntry::pending(
        Some(event_id.to_string()),
        TENANT,
        "document.completed",
        completed_event(event_id, Some("15000")),
        received_at,
    )
}

#[tokio::test]
async fn test_stalled_entries_are_recovered() {
    let t = test_pipeline_with_backoff(vec![acme_tenant()], acme_crm(), IMMEDIATE);
    let retry = RetryScheduler::new(t.pipeline.clone(), 10);
    let now = Utc::now();
    let hour_ago = now - chrono::Duration::hours(1);

    let mut abandoned = stored_entry("evt-abandoned", hour_ago);
    abandoned.status = LedgerStatus::Processing;
    abandoned.started_at = Some(hour_ago);
    let unclaimed = stored_entry("evt-unclaimed", hour_ago);
    let mut in_flight = stored_entry("evt-in-flight", hour_ago);
    in_flight.status = LedgerStatus::Processing;
    in_flight.started_at = Some(now);
    for entry in [&abandoned, &unclaimed, &in_flight] {
        assert!(t.store.insert(entry).await.unwrap());
    }

    let result = retry.run_once(now).await.unwrap();
    assert_eq!(result.recovered, 2);
    assert_eq!(result.readmitted, 1);
    assert_eq!(result.succeeded, 2);
    assert!(result.errors.is_empty());

    let abandoned = t.pipeline.ledger().get(abandoned.id).await.unwrap().unwrap();
    assert_eq!(abandoned.status, LedgerStatus::Success);
    assert_eq!(abandoned.retry_count, 1);
    let unclaimed = t.pipeline.ledger().get(unclaimed.id).await.unwrap().unwrap();
    assert_eq!(unclaimed.status, LedgerStatus::Success);
    assert_eq!(unclaimed.retry_count, 0);
    let in_flight = t.pipeline.ledger().get(in_flight.id).await.unwrap().unwrap();
    assert_eq!(in_flight.status, LedgerStatus::Processing);

    assert_eq!(t.crm.updates().await.len(), 2);
}
