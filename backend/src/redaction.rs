//! Log redaction.
//!
//! Payloads and error messages are passed through a [`Redactor`] before they
//! are logged. The redactor is built once at startup and handed to each
//! component that logs event data.

use serde_json::Value;
use std::collections::HashSet;

pub const REDACTED: &str = "[REDACTED]";

const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "secret",
    "password",
    "token",
    "api_key",
    "apikey",
    "access_token",
    "refresh_token",
    "authorization",
    "webhook_secret",
    "client_secret",
    "signature",
    "credentials",
];

#[derive(Debug, Clone)]
pub struct Redactor {
    keys: HashSet<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl Redactor {
    pub fn new<I, S>(extra_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: HashSet<String> = DEFAULT_SENSITIVE_KEYS.iter().map(|k| k.to_string()).collect();
        keys.extend(extra_keys.into_iter().map(|k| k.as_ref().trim().to_ascii_lowercase()));
        Self { keys }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let normalized = key.to_ascii_lowercase().replace('-', "_");
        self.keys.contains(&normalized)
            || normalized.ends_with("_secret")
            || normalized.ends_with("_password")
            || normalized.ends_with("_token")
    }

    /// Returns a copy of `value` with the values of sensitive keys replaced.
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        if self.is_sensitive(k) {
                            (k.clone(), Value::String(REDACTED.to_string()))
                        } else {
                            (k.clone(), self.redact(v))
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            other => other.clone(),
        }
    }

    /// Strips sensitive query parameters from a URL before it is logged.
    pub fn redact_url(&self, raw: &str) -> String {
        let Ok(mut parsed) = url::Url::parse(raw) else {
            return raw.to_string();
        };

        if parsed.query().is_none() {
            return raw.to_string();
        }

        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| {
                let value = if self.is_sensitive(&k) { REDACTED.to_string() } else { v.into_owned() };
                (k.into_owned(), value)
            })
            .collect();

        parsed.query_pairs_mut().clear().extend_pairs(pairs);
        parsed.to_string()
    }

    /// Replaces occurrences of known secret values inside free text.
    pub fn scrub(&self, text: &str, secrets: &[&str]) -> String {
        secrets
            .iter()
            .filter(|s| !s.is_empty())
            .fold(text.to_string(), |acc, secret| acc.replace(secret, REDACTED))
    }
}
