//! Named document tokens from a tenant's field mappings.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use docuflow_shared::{FieldMapping, FieldType, ResolvedToken};
use futures::future::join_all;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::{debug, warn};

use super::value::{as_non_empty_text, as_number, discover_fields, is_blank};
use super::{FieldResolver, ResolutionMiss};

/// Nested records are walked at most this many levels when inferring tokens.
pub const INFERENCE_DEPTH: usize = 3;

const DATE_FORMAT: &str = "%-m/%-d/%Y";

#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenReport {
    pub tokens: Vec<ResolvedToken>,
    /// Mapped tokens whose field resolved to nothing
    pub missing: Vec<ResolutionMiss>,
}

impl TokenReport {
    pub fn as_map(&self) -> HashMap<String, String> {
        self.tokens
            .iter()
            .map(|t| (t.name.clone(), t.value.clone()))
            .collect()
    }
}

/// Renders a resolved value for a document. Blank values yield None.
pub fn format_value(value: &Value, field_type: FieldType) -> Option<String> {
    if is_blank(Some(value)) {
        return None;
    }
    let text = as_non_empty_text(value)?;

    let formatted = match field_type {
        FieldType::Text => None,
        FieldType::Number => as_number(value).map(format_number),
        FieldType::Currency => parse_decimal(&text).map(format_currency),
        FieldType::Date | FieldType::Datetime => parse_date(&text).map(|d| d.format(DATE_FORMAT).to_string()),
        FieldType::Bool => format_bool(value),
    };

    Some(formatted.unwrap_or(text))
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    let cleaned: String = text.chars().filter(|c| !matches!(c, ',' | '$' | ' ')).collect();
    Decimal::from_str(&cleaned).ok()
}

/// `1234.5` -> `$1,234.50`
pub fn format_currency(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let fixed = format!("{:.2}", rounded.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    format!("{}${}.{}", sign, grouped, cents)
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn format_bool(value: &Value) -> Option<String> {
    let truthy = match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|n| n != 0.0)?,
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => true,
            "false" | "0" | "no" | "n" | "off" => false,
            _ => return None,
        },
        _ => return None,
    };
    Some(if truthy { "Yes" } else { "No" }.to_string())
}

/// `account.billing_city` -> `AccountBillingCity`
pub fn pascal_case(path: &str) -> String {
    path.split(|c: char| c == '.' || c == '_' || c == '-' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Resolves every mapping concurrently. Misses are reported by token name and
/// never substituted with a default.
pub async fn generate_tokens(
    resolver: &FieldResolver,
    mappings: &[FieldMapping],
    root: &Value,
    infer: bool,
) -> TokenReport {
    let resolved = join_all(mappings.iter().map(|mapping| async move {
        let value = match resolver.try_resolve(&mapping.field, root).await {
            Ok(value) => format_value(&value, mapping.field_type).ok_or_else(|| "value is blank".to_string()),
            Err(e) => Err(e.to_string()),
        };
        (mapping, value)
    }))
    .await;

    let mut report = TokenReport::default();
    for (mapping, value) in resolved {
        match value {
            Ok(value) => report.tokens.push(ResolvedToken {
                name: mapping.token.clone(),
                value,
                source: mapping.field.to_string(),
                inferred: false,
            }),
            Err(reason) => {
                warn!(token = %mapping.token, reference = %mapping.field, "Token not resolved: {}", reason);
                report.missing.push(ResolutionMiss {
                    token: mapping.token.clone(),
                    reference: mapping.field.to_string(),
                    reason,
                });
            }
        }
    }

    if infer {
        let mut taken: HashSet<String> = mappings.iter().map(|m| m.token.clone()).collect();
        let covered: HashSet<String> = mappings.iter().map(|m| m.field.to_string()).collect();

        for (path, value) in discover_fields(root, INFERENCE_DEPTH) {
            if covered.contains(&path) {
                continue;
            }
            let name = pascal_case(&path);
            if name.is_empty() || !taken.insert(name.clone()) {
                continue;
            }
            if let Some(value) = format_value(value, FieldType::Text) {
                report.tokens.push(ResolvedToken {
                    name,
                    value,
                    source: path,
                    inferred: true,
                });
            }
        }
    }

    debug!(
        "Generated {} tokens ({} missing)",
        report.tokens.len(),
        report.missing.len()
    );
    report
}
