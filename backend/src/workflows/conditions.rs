// Workflow Conditions - Evaluating a rule's IF chain

use docuflow_shared::{Condition, ConditionOperator, LogicalOperator};
use serde_json::Value;
use tracing::{debug, warn};

use crate::resolver::value::{as_number, as_text};
use crate::resolver::{FieldResolver, ResolveError};

/// Compares a resolved field against a condition literal. Never fails: a
/// missing field or a failed numeric coercion is simply a non-match.
pub fn compare(operator: ConditionOperator, actual: Option<&Value>, expected: &Value) -> bool {
    match operator {
        ConditionOperator::Equals => actual.map(|v| values_equal(v, expected)).unwrap_or(false),
        ConditionOperator::NotEquals => actual.map(|v| !values_equal(v, expected)).unwrap_or(true),
        ConditionOperator::GreaterThan => numeric(actual, expected).map(|(a, b)| a > b).unwrap_or(false),
        ConditionOperator::LessThan => numeric(actual, expected).map(|(a, b)| a < b).unwrap_or(false),
        ConditionOperator::Contains => text_test(actual, expected, |s, p| s.contains(p)).unwrap_or(false),
        ConditionOperator::NotContains => text_test(actual, expected, |s, p| !s.contains(p)).unwrap_or(true),
        ConditionOperator::StartsWith => text_test(actual, expected, |s, p| s.starts_with(p)).unwrap_or(false),
        ConditionOperator::EndsWith => text_test(actual, expected, |s, p| s.ends_with(p)).unwrap_or(false),
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a == b;
    }
    match (as_text(actual), as_text(expected)) {
        (Some(a), Some(b)) => a.trim() == b.trim(),
        _ => false,
    }
}

fn numeric(actual: Option<&Value>, expected: &Value) -> Option<(f64, f64)> {
    Some((as_number(actual?)?, as_number(expected)?))
}

// String operators are case-insensitive
fn text_test(actual: Option<&Value>, expected: &Value, test: impl Fn(&str, &str) -> bool) -> Option<bool> {
    let haystack = as_text(actual?)?.to_lowercase();
    let needle = as_text(expected)?.to_lowercase();
    Some(test(&haystack, &needle))
}

/// Folds the chain left to right. Each condition's `logical_operator` joins it
/// to the next one, and a decided prefix skips resolving the remaining operand.
///
/// An empty chain is true. Only transient data-source failures are returned as
/// errors; every other miss makes that condition false.
pub async fn evaluate_chain(
    resolver: &FieldResolver,
    conditions: &[Condition],
    root: &Value,
) -> Result<bool, ResolveError> {
    let mut result: Option<bool> = None;
    let mut joiner = LogicalOperator::And;

    for condition in conditions {
        if let Some(acc) = result {
            match (joiner, acc) {
                (LogicalOperator::And, false) | (LogicalOperator::Or, true) => {
                    joiner = condition.logical_operator;
                    continue;
                }
                _ => {}
            }
        }

        let outcome = evaluate_one(resolver, condition, root).await?;
        result = Some(match (result, joiner) {
            (None, _) => outcome,
            (Some(acc), LogicalOperator::And) => acc && outcome,
            (Some(acc), LogicalOperator::Or) => acc || outcome,
        });
        joiner = condition.logical_operator;
    }

    Ok(result.unwrap_or(true))
}

async fn evaluate_one(resolver: &FieldResolver, condition: &Condition, root: &Value) -> Result<bool, ResolveError> {
    let actual = match resolver.try_resolve(&condition.field, root).await {
        Ok(value) => Some(value),
        Err(e) if e.is_transient() => return Err(e),
        Err(e) => {
            warn!(reference = %condition.field, "Condition field unresolved: {}", e);
            None
        }
    };

    let matched = compare(condition.operator, actual.as_ref(), &condition.value);
    debug!(
        "Condition {} {:?} {} -> {}",
        condition.field, condition.operator, condition.value, matched
    );
    Ok(matched)
}
