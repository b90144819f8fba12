// Workflow Actions - Outcomes and template rendering for dispatched actions

use docuflow_shared::{ActionType, FieldPath};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::resolver::value::as_text;
use crate::resolver::FieldResolver;
use crate::services::{CrmError, NotifyError};

/// Result of one dispatched action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_type: ActionType,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Whether retrying the same action could plausibly succeed
    pub retryable: bool,
    pub duration_ms: i64,
}

impl ActionOutcome {
    pub fn success(action_type: ActionType, output: Option<Value>) -> Self {
        Self {
            action_type,
            success: true,
            output,
            error: None,
            retryable: false,
            duration_ms: 0,
        }
    }

    pub fn failure(action_type: ActionType, error: &ActionError) -> Self {
        Self {
            action_type,
            success: false,
            output: None,
            error: Some(error.message.clone()),
            retryable: error.retryable,
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, ms: i64) -> Self {
        self.duration_ms = ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    pub retryable: bool,
}

impl ActionError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn timeout(operation: &str) -> Self {
        Self::transient(format!("{} timed out", operation))
    }
}

impl From<CrmError> for ActionError {
    fn from(e: CrmError) -> Self {
        Self {
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

impl From<NotifyError> for ActionError {
    fn from(e: NotifyError) -> Self {
        Self {
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for ActionError {
    fn from(e: reqwest::Error) -> Self {
        Self {
            retryable: e.is_timeout() || e.is_connect(),
            message: e.to_string(),
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder pattern is valid"))
}

/// A template with its placeholders substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// Placeholders left intact because nothing resolved them
    pub misses: Vec<String>,
}

/// Replaces `{{Name}}` from the token map, falling back to a field reference
/// on the context record. Unknown placeholders are left as written.
pub async fn render_template(
    template: &str,
    tokens: &HashMap<String, String>,
    record: &Value,
    resolver: &FieldResolver,
) -> Rendered {
    // Collected up front so no regex iterator is held across an await
    let placeholders: Vec<(usize, usize, String)> = placeholder_regex()
        .captures_iter(template)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((whole.start(), whole.end(), caps.get(1)?.as_str().to_string()))
        })
        .collect();

    let mut text = String::with_capacity(template.len());
    let mut misses = Vec::new();
    let mut last = 0;

    for (start, end, name) in placeholders {
        text.push_str(&template[last..start]);
        last = end;

        let replacement = match tokens.get(&name) {
            Some(value) => Some(value.clone()),
            None => match FieldPath::parse(&name) {
                Ok(path) => resolver.resolve(&path, record).await.as_ref().and_then(as_text),
                Err(_) => None,
            },
        };

        match replacement {
            Some(value) => text.push_str(&value),
            None => {
                text.push_str(&template[start..end]);
                misses.push(name);
            }
        }
    }
    text.push_str(&template[last..]);

    Rendered { text, misses }
}
