use chrono::Utc;
use docuflow_shared::LedgerStatus;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::PipelineError;
use crate::pipeline::{IngestOutcome, ProcessingReport};
use crate::tests::fixtures::*;
use crate::tests::helpers::{init_test_logging, sign};

async fn ingest(t: &TestPipeline, body: &Value, secret: &str) -> Result<IngestOutcome, PipelineError> {
    let raw = serde_json::to_vec(body).unwrap();
    t.pipeline.ingest(&raw, Some(&sign(&raw, secret)), None, Utc::now()).await
}

fn processed(outcome: IngestOutcome) -> ProcessingReport {
    match outcome {
        IngestOutcome::Processed(report) => report,
        other => panic!("expected processing, got {:?}", other),
    }
}

#[tokio::test]
async fn test_large_deal_runs_then_branch() {
    init_test_logging();
    let t = test_pipeline(vec![acme_tenant()], acme_crm());

    let report = processed(ingest(&t, &completed_event("evt-1", Some("15000")), SECRET).await.unwrap());

    assert_eq!(report.status, LedgerStatus::Success);
    assert_eq!(report.actions_triggered, 2);
    assert_eq!(
        t.crm.updates().await,
        vec![("Opportunities".to_string(), "o1".to_string(), "sales_stage".to_string(), "Closed Won".to_string())]
    );

    let sent = t.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Acme Corp signed Master Services Agreement");
    assert_eq!(sent[0].body, "Amount: $15,000.00");
    let emails: Vec<&str> = sent[0].recipients.iter().map(|r| r.email.as_str()).collect();
    assert_eq!(emails, vec!["ops@acme.com", "buyer@acme.com"]);

    let entry = t.pipeline.ledger().get(report.entry_id).await.unwrap().unwrap();
    assert_eq!(entry.actions_triggered, 2);
    assert_eq!(entry.record_id.as_deref(), Some("doc-1"));
    assert!(entry.processed_at.is_some());
}

#[tokio::test]
async fn test_submitted_values_override_source_record() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());

    let report = processed(ingest(&t, &completed_event("evt-2", Some("5000")), SECRET).await.unwrap());

    assert_eq!(report.status, LedgerStatus::Success);
    assert!(t.crm.updates().await.is_empty());
    assert!(t.notifier.sent().await.is_empty());
    let messages: Vec<String> = t.activity.all().await.into_iter().map(|e| e.message).collect();
    assert_eq!(messages, vec!["Small deal signed: Master Services Agreement".to_string()]);
}

#[tokio::test]
async fn test_duplicate_event_has_no_side_effects() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let event = completed_event("evt-dup", Some("15000"));

    let first = processed(ingest(&t, &event, SECRET).await.unwrap());
    match ingest(&t, &event, SECRET).await.unwrap() {
        IngestOutcome::Duplicate { existing_id, status } => {
            assert_eq!(existing_id, Some(first.entry_id));
            assert_eq!(status, Some(LedgerStatus::Success));
        }
        other => panic!("expected duplicate, got {:?}", other),
    }

    assert_eq!(t.crm.updates().await.len(), 1);
    assert_eq!(t.store.len().await, 1);
}

#[tokio::test]
async fn test_concurrent_duplicates_process_once() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let raw = serde_json::to_vec(&completed_event("evt-burst", Some("15000"))).unwrap();
    let signature = sign(&raw, SECRET);

    let attempts = (0..8).map(|_| {
        let pipeline = Arc::clone(&t.pipeline);
        let raw = raw.clone();
        let signature = signature.clone();
        tokio::spawn(async move { pipeline.ingest(&raw, Some(&signature), None, Utc::now()).await })
    });
    let outcomes = futures::future::join_all(attempts).await;

    let processed = outcomes
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .filter(|o| matches!(o, IngestOutcome::Processed(_)))
        .count();
    assert_eq!(processed, 1);
    assert_eq!(t.store.len().await, 1);
    assert_eq!(t.crm.updates().await.len(), 1);
}

#[tokio::test]
async fn test_bad_signature_is_rejected_before_admission() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());

    let err = ingest(&t, &completed_event("evt-forged", Some("15000")), "wrong-secret")
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Authentication(_)));
    assert!(!err.is_retryable());
    assert_eq!(t.store.len().await, 0);
    assert!(t.crm.updates().await.is_empty());
}

#[tokio::test]
async fn test_missing_signature_and_unknown_tenant() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let raw = serde_json::to_vec(&completed_event("evt-3", None)).unwrap();

    let missing = t.pipeline.ingest(&raw, None, None, Utc::now()).await.unwrap_err();
    assert!(matches!(missing, PipelineError::Authentication(_)));

    let unknown = t
        .pipeline
        .ingest(&raw, Some(&sign(&raw, SECRET)), Some("globex"), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(unknown, PipelineError::Authentication(_)));
    assert_eq!(t.store.len().await, 0);
}

#[tokio::test]
async fn test_malformed_payload_is_not_admitted() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let body = json!({"event": "document.completed", "data": {"metadata": {"tenant_id": TENANT}}});

    let err = ingest(&t, &body, SECRET).await.unwrap_err();

    assert!(matches!(err, PipelineError::MalformedPayload(_)));
    assert_eq!(t.store.len().await, 0);
}

#[tokio::test]
async fn test_unresolvable_tenant() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let body = json!({"event": "document.completed", "data": {"id": "doc-9"}});

    let err = ingest(&t, &body, SECRET).await.unwrap_err();
    assert!(matches!(err, PipelineError::TenantResolution));
}

#[tokio::test]
async fn test_path_tenant_and_wrapped_payload() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let body = json!([{"event_id": "evt-wrapped", "event_type": "document.completed", "data": {"id": "doc-2"}}]);
    let raw = serde_json::to_vec(&body).unwrap();

    let outcome = t
        .pipeline
        .ingest(&raw, Some(&sign(&raw, SECRET)), Some(TENANT), Utc::now())
        .await
        .unwrap();

    let report = processed(outcome);
    assert_eq!(report.status, LedgerStatus::Success);
    // No amount anywhere, so the ELSE branch ran
    assert_eq!(report.actions_triggered, 1);
}

#[tokio::test]
async fn test_crm_outage_is_a_retryable_fault() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm().failing());

    let report = processed(ingest(&t, &completed_event("evt-outage", Some("15000")), SECRET).await.unwrap());

    assert_eq!(report.status, LedgerStatus::Failed);
    assert!(report.error.is_some());
    let entry = t.pipeline.ledger().get(report.entry_id).await.unwrap().unwrap();
    assert_eq!(entry.retry_count, 1);
    assert!(entry.next_retry_at.is_some());
    assert!(t.crm.updates().await.is_empty());
}

#[tokio::test]
async fn test_event_without_matching_rules_succeeds() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let mut event = completed_event("evt-viewed", Some("15000"));
    event["event"] = json!("document.viewed");

    let report = processed(ingest(&t, &event, SECRET).await.unwrap());
    assert_eq!(report.status, LedgerStatus::Success);
    assert_eq!(report.actions_triggered, 0);
    assert!(report.rules.is_empty());
}
