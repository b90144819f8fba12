//! Recipient lists whose addresses and names may be field references.

use docuflow_shared::{FieldPath, RecipientSource, RecipientSpec, ResolvedRecipient};
use futures::future::join_all;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::value::as_non_empty_text;
use super::FieldResolver;
use docuflow_shared::RELATIONSHIP_SEPARATOR;

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"))
}

pub fn is_email(candidate: &str) -> bool {
    email_regex().is_match(candidate.trim())
}

/// How a recipient's email value should be treated.
#[derive(Debug, Clone, PartialEq)]
pub enum EmailKind {
    Static(String),
    Dynamic(FieldPath),
    Invalid(String),
}

/// Plain addresses are static. `>>` paths and dotted field names are dynamic.
pub fn classify(raw: &str) -> EmailKind {
    let raw = raw.trim();
    if is_email(raw) {
        return EmailKind::Static(raw.to_string());
    }
    if looks_like_reference(raw) {
        return match FieldPath::parse(raw) {
            Ok(path) => EmailKind::Dynamic(path),
            Err(e) => EmailKind::Invalid(e.to_string()),
        };
    }
    EmailKind::Invalid(format!("'{}' is neither an email address nor a field reference", raw))
}

fn looks_like_reference(raw: &str) -> bool {
    raw.contains(RELATIONSHIP_SEPARATOR)
        || (raw.contains('.') && !raw.contains('@') && !raw.chars().any(char::is_whitespace))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientFailure {
    /// Position in the submitted list
    pub index: usize,
    pub reference: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecipientReport {
    pub recipients: Vec<ResolvedRecipient>,
    pub failures: Vec<RecipientFailure>,
}

/// Resolves all recipients concurrently. A failure on one recipient is
/// recorded and never prevents the others from resolving.
pub async fn resolve_recipients(resolver: &FieldResolver, specs: &[RecipientSpec], root: &Value) -> RecipientReport {
    let results = join_all(
        specs
            .iter()
            .enumerate()
            .map(|(index, spec)| async move { (index, resolve_one(resolver, spec, root).await) }),
    )
    .await;

    let mut report = RecipientReport::default();
    for (index, result) in results {
        match result {
            Ok(recipient) => report.recipients.push(recipient),
            Err(reason) => {
                warn!(index, reference = %specs[index].email, "Recipient not resolved: {}", reason);
                report.failures.push(RecipientFailure {
                    index,
                    reference: specs[index].email.clone(),
                    reason,
                });
            }
        }
    }

    debug!(
        "Resolved {} of {} recipients",
        report.recipients.len(),
        specs.len()
    );
    report
}

async fn resolve_one(resolver: &FieldResolver, spec: &RecipientSpec, root: &Value) -> Result<ResolvedRecipient, String> {
    let (email, source) = match classify(&spec.email) {
        EmailKind::Static(email) => (email, RecipientSource::Static),
        EmailKind::Dynamic(path) => {
            let resolved = resolver
                .try_resolve(&path, root)
                .await
                .map_err(|e| e.to_string())?;
            let email = as_non_empty_text(&resolved)
                .ok_or_else(|| format!("'{}' resolved to an empty value", path))?;
            if !is_email(&email) {
                return Err(format!("'{}' resolved to '{}', which is not an email address", path, email));
            }
            (email, RecipientSource::Dynamic { reference: path.to_string() })
        }
        EmailKind::Invalid(reason) => return Err(reason),
    };

    let dynamic = matches!(source, RecipientSource::Dynamic { .. });
    let first_name = resolve_name(resolver, spec.first_name.as_deref(), root, dynamic).await;
    let last_name = resolve_name(resolver, spec.last_name.as_deref(), root, dynamic).await;

    Ok(ResolvedRecipient {
        email,
        first_name,
        last_name,
        role: spec.role.clone(),
        signing_order: spec.signing_order,
        source,
    })
}

/// Names are literal unless they are themselves references on a dynamic
/// recipient. An unresolved name is dropped rather than failing the recipient.
async fn resolve_name(resolver: &FieldResolver, raw: Option<&str>, root: &Value, dynamic: bool) -> Option<String> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    if !dynamic || !looks_like_reference(raw) {
        return Some(raw.to_string());
    }
    let path = FieldPath::parse(raw).ok()?;
    resolver
        .resolve(&path, root)
        .await
        .as_ref()
        .and_then(as_non_empty_text)
}
