use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

use crate::auth::signature::{LEGACY_SIGNATURE_HEADER, SIGNATURE_HEADER};
use crate::handlers::router;
use crate::tests::fixtures::*;
use crate::tests::helpers::{json_body, sign, signed_post};
use crate::AppState;

fn create_test_app(t: &TestPipeline) -> Router {
    router(Arc::new(AppState {
        pipeline: t.pipeline.clone(),
        db_pool: None,
    }))
}

#[tokio::test]
async fn test_signed_event_is_processed() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let app = create_test_app(&t);

    let response = app
        .oneshot(signed_post("/api/v1/webhooks/signing", &completed_event("evt-http", Some("15000")), SECRET))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["status"], "processed");
    assert_eq!(body["actions_triggered"], 2);
    assert_eq!(body["rules"][0]["branch"], "then");
    assert_eq!(body["token_misses"], json!([]));
}

#[tokio::test]
async fn test_duplicate_returns_ok() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let event = completed_event("evt-http-dup", Some("15000"));

    let first = create_test_app(&t)
        .oneshot(signed_post("/api/v1/webhooks/signing", &event, SECRET))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = create_test_app(&t)
        .oneshot(signed_post("/api/v1/webhooks/signing", &event, SECRET))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(json_body(second).await["status"], "duplicate");
}

#[tokio::test]
async fn test_bad_signature_is_unauthorized() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());

    let response = create_test_app(&t)
        .oneshot(signed_post("/api/v1/webhooks/signing", &completed_event("evt-bad", None), "nope"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(t.store.len().await, 0);
}

#[tokio::test]
async fn test_legacy_header_and_tenant_path() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let raw = serde_json::to_vec(&json!({
        "event": "document.completed",
        "event_id": "evt-legacy",
        "data": {"id": "doc-3"}
    }))
    .unwrap();

    let request = Request::builder()
        .uri("/api/v1/webhooks/signing/acme")
        .method("POST")
        .header(LEGACY_SIGNATURE_HEADER, format!("sha256={}", sign(&raw, SECRET)))
        .body(Body::from(raw))
        .unwrap();

    let response = create_test_app(&t).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_rejections_map_to_status_codes() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());

    let malformed = json!({"event": "document.completed", "data": {"metadata": {"tenant_id": TENANT}}});
    let response = create_test_app(&t)
        .oneshot(signed_post("/api/v1/webhooks/signing", &malformed, SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let no_tenant = json!({"event": "document.completed", "data": {"id": "doc-4"}});
    let response = create_test_app(&t)
        .oneshot(signed_post("/api/v1/webhooks/signing", &no_tenant, SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_ledger_lookup_redacts_payload() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let mut event = completed_event("evt-ledger", Some("15000"));
    event["data"]["metadata"]["api_key"] = json!("sk_live_123");

    let response = create_test_app(&t)
        .oneshot(signed_post("/api/v1/webhooks/signing", &event, SECRET))
        .await
        .unwrap();
    let entry_id = json_body(response).await["entry_id"].as_str().unwrap().to_string();

    let unsigned = Request::builder()
        .uri(format!("/api/v1/ledger/{}", entry_id))
        .body(Body::empty())
        .unwrap();
    let response = create_test_app(&t).oneshot(unsigned).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri(format!("/api/v1/ledger/{}", entry_id))
        .header(SIGNATURE_HEADER, sign(entry_id.as_bytes(), SECRET))
        .body(Body::empty())
        .unwrap();
    let response = create_test_app(&t).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let entry = json_body(response).await;
    assert_eq!(entry["status"], "success");
    assert_eq!(entry["payload"]["data"]["metadata"]["api_key"], "[REDACTED]");

    let missing = Request::builder()
        .uri(format!("/api/v1/ledger/{}", uuid::Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let response = create_test_app(&t).oneshot(missing).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resolve_tokens_endpoint() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let body = json!({"tenant_id": TENANT, "module": "Opportunities", "record_id": "o1"});

    let response = create_test_app(&t)
        .oneshot(signed_post("/api/v1/resolve/tokens", &body, SECRET))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["tokens"][0]["name"], "ClientName");
    assert_eq!(body["tokens"][0]["value"], "Acme Corp");
    assert_eq!(body["tokens"][1]["value"], "$15,000.00");
    assert_eq!(body["missing"], json!([]));
}

#[tokio::test]
async fn test_resolve_recipients_endpoint() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let body = json!({
        "tenant_id": TENANT,
        "module": "Opportunities",
        "record_id": "o1",
        "recipients": [
            {"email": "opportunity>>Contact>>email1", "first_name": "Buyer"},
            {"email": "not an address"}
        ]
    });

    let response = create_test_app(&t)
        .oneshot(signed_post("/api/v1/resolve/recipients", &body, SECRET))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["recipients"][0]["email"], "buyer@acme.com");
    assert_eq!(body["failures"][0]["index"], 1);
}

#[tokio::test]
async fn test_resolve_unknown_record_is_not_found() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let body = json!({"tenant_id": TENANT, "module": "Opportunities", "record_id": "missing"});

    let response = create_test_app(&t)
        .oneshot(signed_post("/api/v1/resolve/tokens", &body, SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resolve_checks_signature_before_reading_body() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());

    let unsigned_garbage = Request::builder()
        .uri("/api/v1/resolve/tokens")
        .method("POST")
        .body(Body::from("not json"))
        .unwrap();
    let response = create_test_app(&t).oneshot(unsigned_garbage).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let incomplete = json!({"tenant_id": TENANT, "module": "Opportunities"});
    let response = create_test_app(&t)
        .oneshot(signed_post("/api/v1/resolve/tokens", &incomplete, "wrong-secret"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = create_test_app(&t)
        .oneshot(signed_post("/api/v1/resolve/tokens", &incomplete, SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_in_memory_mode() {
    let t = test_pipeline(vec![acme_tenant()], acme_crm());
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let response = create_test_app(&t).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["database"], "memory");
}
