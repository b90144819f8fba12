// Workflow Automation Engine
//
// Event-driven rule evaluation for signed-document webhooks.
// Inbound events select per-tenant rules whose actions run against the CRM.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod tenant;
pub mod triggers;

pub use engine::{RuleEvaluator, RuleExecution};
pub use executor::{ActionDispatcher, DispatchTimeouts, ExecutionContext};
pub use tenant::TenantResolver;
pub use triggers::InboundEvent;
