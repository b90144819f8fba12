// Workflow Engine - Rule selection, evaluation and bounded execution

use docuflow_shared::{Action, Rule};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::actions::ActionOutcome;
use super::conditions::evaluate_chain;
use super::executor::{ActionDispatcher, ExecutionContext};
use crate::resolver::{FieldResolver, ResolveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Then,
    Else,
}

/// A rule whose conditions have been evaluated, with the action list chosen.
#[derive(Debug, Clone)]
pub struct SelectedRule<'a> {
    pub rule: &'a Rule,
    pub branch: Branch,
    pub actions: &'a [Action],
}

/// Outcome of running one rule's selected actions.
#[derive(Debug, Clone, Serialize)]
pub struct RuleExecution {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub branch: Branch,
    pub attempted: usize,
    pub succeeded: usize,
    pub timed_out: bool,
    pub outcomes: Vec<ActionOutcome>,
}

impl RuleExecution {
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

pub struct RuleEvaluator;

impl RuleEvaluator {
    /// Active rules for this tenant and event, lowest priority number first.
    /// Ties fall back to name, then id, so the order is stable.
    pub fn applicable<'a>(rules: &'a [Rule], tenant_id: &str, event_type: &str) -> Vec<&'a Rule> {
        let mut matching: Vec<&Rule> = rules
            .iter()
            .filter(|r| r.is_active && r.tenant_id == tenant_id && triggers_on(r, event_type))
            .collect();
        matching.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        matching
    }

    /// Evaluates every applicable rule before anything is dispatched. A
    /// transient data-source failure aborts the whole evaluation.
    pub async fn evaluate<'a>(
        resolver: &FieldResolver,
        rules: &'a [Rule],
        tenant_id: &str,
        event_type: &str,
        root: &Value,
    ) -> Result<Vec<SelectedRule<'a>>, ResolveError> {
        let mut selected = Vec::new();

        for rule in Self::applicable(rules, tenant_id, event_type) {
            let matched = evaluate_chain(resolver, &rule.conditions, root).await?;
            let (branch, actions) = if matched {
                (Branch::Then, rule.then_actions.as_slice())
            } else {
                (Branch::Else, rule.else_actions.as_slice())
            };
            info!(rule = %rule.name, ?branch, "Rule evaluated ({} actions)", actions.len());
            selected.push(SelectedRule { rule, branch, actions });
        }

        Ok(selected)
    }

    /// Runs each selected rule in order. Actions within a rule run in
    /// declaration order under the rule's timeout; a timeout abandons only that
    /// rule's remaining actions.
    pub async fn execute(
        selected: &[SelectedRule<'_>],
        dispatcher: &ActionDispatcher,
        ctx: &ExecutionContext,
    ) -> Vec<RuleExecution> {
        let mut executions = Vec::with_capacity(selected.len());

        for choice in selected {
            let rule = choice.rule;
            let budget = Duration::from_secs(rule.timeout_seconds.max(1));
            let mut outcomes = Vec::with_capacity(choice.actions.len());
            let mut started = 0usize;

            let run = async {
                for action in choice.actions {
                    started += 1;
                    outcomes.push(dispatcher.dispatch(action, ctx, rule.id).await);
                }
            };
            let timed_out = tokio::time::timeout(budget, run).await.is_err();

            if timed_out {
                warn!(
                    entry_id = %ctx.entry_id,
                    rule = %rule.name,
                    "Rule timed out after {}s; {} of {} actions started",
                    budget.as_secs(),
                    started,
                    choice.actions.len()
                );
            }

            let succeeded = outcomes.iter().filter(|o| o.success).count();
            executions.push(RuleExecution {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                branch: choice.branch,
                attempted: started,
                succeeded,
                timed_out,
                outcomes,
            });
        }

        executions
    }
}

fn triggers_on(rule: &Rule, event_type: &str) -> bool {
    let trigger = rule.trigger_event.trim();
    trigger == "*" || trigger.eq_ignore_ascii_case(event_type.trim())
}
