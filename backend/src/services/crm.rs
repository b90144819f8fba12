//! CRM collaborator: record reads for field resolution and record writes for
//! the `update_record` and `create_note` actions.
//!
//! The HTTP client speaks the JSON:API dialect of the CRM's V8 REST API.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CrmConfig;

#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    #[error("CRM request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("CRM returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("CRM request timed out")]
    Timeout,
    #[error("unexpected CRM response: {0}")]
    InvalidResponse(String),
}

impl CrmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout => true,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// Read access to CRM records by module name and id.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// `Ok(None)` when the record does not exist.
    async fn fetch(&self, module: &str, id: &str) -> Result<Option<Value>, CrmError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNote {
    pub subject: String,
    pub description: String,
    pub parent_module: Option<String>,
    pub parent_id: Option<String>,
}

/// Write access used by record-updating actions.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    async fn update_field(&self, module: &str, id: &str, field: &str, value: &str) -> Result<(), CrmError>;

    /// Returns the id of the created note.
    async fn create_note(&self, note: &NewNote) -> Result<String, CrmError>;
}

#[derive(Debug, Clone)]
pub struct HttpCrmClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpCrmClient {
    pub fn new(config: &CrmConfig) -> Result<Self, CrmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn module_url(&self) -> String {
        format!("{}/Api/V8/module", self.base_url)
    }

    async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, CrmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CrmError::Status {
            status: status.as_u16(),
            body: body.chars().take(500).collect(),
        })
    }
}

/// Flattens a JSON:API resource into a plain record with its `id`.
fn flatten_resource(body: &Value) -> Result<Value, CrmError> {
    let data = body
        .get("data")
        .ok_or_else(|| CrmError::InvalidResponse("missing 'data'".to_string()))?;

    let mut record = match data.get("attributes") {
        Some(Value::Object(attributes)) => attributes.clone(),
        _ => serde_json::Map::new(),
    };

    if let Some(id) = data.get("id") {
        record.insert("id".to_string(), id.clone());
    }
    if let Some(module) = data.get("type") {
        record.entry("module").or_insert_with(|| module.clone());
    }

    Ok(Value::Object(record))
}

#[async_trait]
impl DataSource for HttpCrmClient {
    async fn fetch(&self, module: &str, id: &str) -> Result<Option<Value>, CrmError> {
        let url = format!("{}/{}/{}", self.module_url(), module, id);
        debug!("Fetching {} {} from CRM", module, id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .header("Accept", "application/vnd.api+json")
            .send()
            .await
            .map_err(|e| if e.is_timeout() { CrmError::Timeout } else { CrmError::Http(e) })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = Self::error_for_status(response).await?;
        let body: Value = response.json().await?;
        flatten_resource(&body).map(Some)
    }
}

#[async_trait]
impl RecordWriter for HttpCrmClient {
    async fn update_field(&self, module: &str, id: &str, field: &str, value: &str) -> Result<(), CrmError> {
        let mut attributes = serde_json::Map::new();
        attributes.insert(field.to_string(), Value::String(value.to_string()));

        let body = json!({
            "data": {
                "type": module,
                "id": id,
                "attributes": attributes,
            }
        });

        let response = self
            .client
            .patch(self.module_url())
            .bearer_auth(&self.access_token)
            .header("Content-Type", "application/vnd.api+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { CrmError::Timeout } else { CrmError::Http(e) })?;

        Self::error_for_status(response).await?;
        Ok(())
    }

    async fn create_note(&self, note: &NewNote) -> Result<String, CrmError> {
        let mut attributes = json!({
            "name": note.subject,
            "description": note.description,
        });
        if let (Some(module), Some(id)) = (&note.parent_module, &note.parent_id) {
            attributes["parent_type"] = json!(module);
            attributes["parent_id"] = json!(id);
        }

        let body = json!({ "data": { "type": "Notes", "attributes": attributes } });

        let response = self
            .client
            .post(self.module_url())
            .bearer_auth(&self.access_token)
            .header("Content-Type", "application/vnd.api+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { CrmError::Timeout } else { CrmError::Http(e) })?;

        let response = Self::error_for_status(response).await?;
        let created: Value = response.json().await?;
        match created.pointer("/data/id").and_then(Value::as_str) {
            Some(id) => Ok(id.to_string()),
            None => {
                warn!("CRM accepted note but returned no id");
                Err(CrmError::InvalidResponse("created note has no id".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpCrmClient {
        HttpCrmClient::new(&CrmConfig {
            base_url: server.uri(),
            access_token: "crm-token".to_string(),
            timeout_secs: 2,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_flattens_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Api/V8/module/Contacts/c1"))
            .and(header("Authorization", "Bearer crm-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"type": "Contacts", "id": "c1", "attributes": {"email1": "a@b.com", "first_name": "Ada"}}
            })))
            .mount(&server)
            .await;

        let record = client_for(&server).fetch("Contacts", "c1").await.unwrap().unwrap();
        assert_eq!(record["id"], "c1");
        assert_eq!(record["email1"], "a@b.com");
        assert_eq!(record["module"], "Contacts");
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client_for(&server).fetch("Accounts", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch("Accounts", "a1").await.unwrap_err();
        assert!(matches!(err, CrmError::Status { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_update_field_sends_json_api_patch() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/Api/V8/module"))
            .and(body_partial_json(json!({
                "data": {"type": "Opportunities", "id": "o1", "attributes": {"sales_stage": "Closed Won"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .update_field("Opportunities", "o1", "sales_stage", "Closed Won")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_note_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Api/V8/module"))
            .and(body_partial_json(json!({"data": {"type": "Notes", "attributes": {"parent_id": "o1"}}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"data": {"id": "n42"}})))
            .mount(&server)
            .await;

        let id = client_for(&server)
            .create_note(&NewNote {
                subject: "Signed".to_string(),
                description: "Contract signed".to_string(),
                parent_module: Some("Opportunities".to_string()),
                parent_id: Some("o1".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(id, "n42");
    }
}
