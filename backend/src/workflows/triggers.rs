// Workflow Triggers - Inbound lifecycle events from the signing platform

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::resolver::value::{as_non_empty_text, lookup_str, named_entries};

/// CRM record a document was created from, as carried in event metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub module: String,
    pub id: String,
}

/// A validated lifecycle event. The normalized payload is what gets stored
/// on the ledger and replayed on retry.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub external_event_id: Option<String>,
    pub event_type: String,
    pub document_id: String,
    pub document_name: Option<String>,
    pub metadata: Value,
    pub record_ref: Option<RecordRef>,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Senders sometimes wrap the event in a one-element array.
pub fn normalize_payload(payload: Value) -> Value {
    match payload {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    }
}

impl InboundEvent {
    pub fn parse(raw_body: &[u8], received_at: DateTime<Utc>) -> Result<Self, PipelineError> {
        let payload: Value = serde_json::from_slice(raw_body)
            .map_err(|e| PipelineError::MalformedPayload(format!("body is not JSON: {}", e)))?;
        Self::from_payload(payload, received_at)
    }

    pub fn from_payload(payload: Value, received_at: DateTime<Utc>) -> Result<Self, PipelineError> {
        let payload = normalize_payload(payload);
        if !payload.is_object() {
            return Err(PipelineError::MalformedPayload("payload must be an object".to_string()));
        }

        let event_type = lookup_str(&payload, "event")
            .or_else(|| lookup_str(&payload, "event_type"))
            .and_then(as_non_empty_text)
            .ok_or_else(|| PipelineError::MalformedPayload("missing 'event' or 'event_type'".to_string()))?;

        let data = payload
            .get("data")
            .filter(|d| d.is_object())
            .ok_or_else(|| PipelineError::MalformedPayload("missing 'data'".to_string()))?;

        let document_id = lookup_str(data, "id")
            .and_then(as_non_empty_text)
            .ok_or_else(|| PipelineError::MalformedPayload("missing 'data.id'".to_string()))?;

        let external_event_id = lookup_str(&payload, "event_id")
            .or_else(|| lookup_str(&payload, "id"))
            .and_then(as_non_empty_text);

        let document_name = lookup_str(data, "name")
            .or_else(|| lookup_str(data, "template.name"))
            .and_then(as_non_empty_text);

        let metadata = data
            .get("metadata")
            .or_else(|| payload.get("metadata"))
            .filter(|m| m.is_object())
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let record_ref = match (
            lookup_str(&metadata, "record_module").and_then(as_non_empty_text),
            lookup_str(&metadata, "record_id").and_then(as_non_empty_text),
        ) {
            (Some(module), Some(id)) => Some(RecordRef { module, id }),
            _ => None,
        };

        Ok(Self {
            external_event_id,
            event_type,
            document_id,
            document_name,
            metadata,
            record_ref,
            payload,
            received_at,
        })
    }

    pub fn data(&self) -> &Value {
        static NULL: Value = Value::Null;
        self.payload.get("data").unwrap_or(&NULL)
    }

    /// Root record for field resolution. Submitted field values sit at the top
    /// level over any fetched source record; event attributes are added last.
    pub fn build_context(&self, source_record: Option<&Value>) -> Value {
        let mut root = match source_record {
            Some(Value::Object(fields)) => fields.clone(),
            _ => Map::new(),
        };

        let data = self.data();
        for key in ["fields", "values"] {
            if let Some(container) = data.get(key) {
                for (name, value) in named_entries(container) {
                    root.insert(name, value.clone());
                }
            }
        }

        root.insert("event_type".to_string(), Value::String(self.event_type.clone()));
        root.insert("document_id".to_string(), Value::String(self.document_id.clone()));
        if let Some(name) = &self.document_name {
            root.insert("document_name".to_string(), Value::String(name.clone()));
        }
        root.insert("metadata".to_string(), self.metadata.clone());
        if let Some(tokens) = data.get("tokens") {
            root.insert("tokens".to_string(), tokens.clone());
        }
        root.insert("data".to_string(), data.clone());

        Value::Object(root)
    }
}
