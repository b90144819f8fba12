use axum::{
    body::{to_bytes, Body},
    http::{Request, Response},
};
use serde_json::Value;
use std::sync::Once;

use crate::auth::signature::{SignatureVerifier, SIGNATURE_HEADER};

static LOGGING: Once = Once::new();

/// Routes test output through the same subscriber setup as `main`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    });
}

pub fn sign(body: &[u8], secret: &str) -> String {
    SignatureVerifier::new().sign(body, secret)
}

pub fn signed_post(uri: &str, body: &Value, secret: &str) -> Request<Body> {
    let raw = serde_json::to_vec(body).unwrap();
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, sign(&raw, secret))
        .body(Body::from(raw))
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
