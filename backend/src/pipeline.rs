// Event Pipeline - authentication, admission and processing of one event

use chrono::{DateTime, Utc};
use docuflow_shared::{LedgerEntry, LedgerStatus};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::signature::SignatureVerifier;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::ledger::{Admission, EventLedger};
use crate::redaction::Redactor;
use crate::resolver::tokens::generate_tokens;
use crate::resolver::{FieldResolver, ResolutionMiss, ResolveError};
use crate::services::{DataSource, TenantConfig, TenantDirectory};
use crate::workflows::{ActionDispatcher, ExecutionContext, InboundEvent, RuleEvaluator, RuleExecution, TenantResolver};

/// What happened to one processing attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingReport {
    pub entry_id: Uuid,
    pub status: LedgerStatus,
    pub actions_triggered: i32,
    pub rules: Vec<RuleExecution>,
    pub token_misses: Vec<ResolutionMiss>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Processed(ProcessingReport),
    Duplicate { existing_id: Option<Uuid>, status: Option<LedgerStatus> },
}

struct RunOutput {
    rules: Vec<RuleExecution>,
    token_misses: Vec<ResolutionMiss>,
}

impl RunOutput {
    fn actions_triggered(&self) -> i32 {
        self.rules.iter().map(|r| r.attempted as i32).sum()
    }
}

pub struct Pipeline {
    directory: Arc<dyn TenantDirectory>,
    verifier: SignatureVerifier,
    tenants: TenantResolver,
    ledger: EventLedger,
    source: Arc<dyn DataSource>,
    dispatcher: ActionDispatcher,
    config: PipelineConfig,
    redactor: Arc<Redactor>,
}

impl Pipeline {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        ledger: EventLedger,
        source: Arc<dyn DataSource>,
        dispatcher: ActionDispatcher,
        config: PipelineConfig,
        redactor: Arc<Redactor>,
    ) -> Self {
        Self {
            directory,
            verifier: SignatureVerifier::new(),
            tenants: TenantResolver::new(),
            ledger,
            source,
            dispatcher,
            config,
            redactor,
        }
    }

    pub fn ledger(&self) -> &EventLedger {
        &self.ledger
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub fn processing_lease(&self) -> std::time::Duration {
        self.config.processing_lease
    }

    /// Looks up the tenant's secret and checks the presented signature over
    /// the exact raw body. Unknown tenants and tenants without a secret fail
    /// the same way a bad signature does.
    pub async fn authenticate(
        &self,
        tenant_id: &str,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<Arc<TenantConfig>, PipelineError> {
        let tenant = self
            .directory
            .get(tenant_id)
            .await?
            .ok_or_else(|| PipelineError::Authentication(format!("tenant '{}' is not configured", tenant_id)))?;

        if tenant.webhook_secret.trim().is_empty() {
            return Err(PipelineError::Authentication(format!("tenant '{}' has no webhook secret", tenant_id)));
        }

        let presented = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PipelineError::Authentication("missing signature header".to_string()))?;

        if !self.verifier.verify(raw_body, presented, &tenant.webhook_secret) {
            return Err(PipelineError::Authentication(format!("signature mismatch for tenant '{}'", tenant_id)));
        }

        Ok(tenant)
    }

    /// Full inbound path: pick the tenant, verify, validate, admit, process.
    /// Nothing is written to the ledger unless the signature checks out and
    /// the payload is well formed. Once admitted, processing runs on its own
    /// task and finishes even if the caller stops waiting.
    pub async fn ingest(
        self: &Arc<Self>,
        raw_body: &[u8],
        signature: Option<&str>,
        tenant_hint: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> Result<IngestOutcome, PipelineError> {
        let tenant_id = self.candidate_tenant(raw_body, tenant_hint)?;

        let tenant = match self.authenticate(&tenant_id, raw_body, signature).await {
            Ok(tenant) => tenant,
            Err(e) => {
                warn!(tenant_id = %tenant_id, "Rejected webhook: {}", e);
                return Err(e);
            }
        };

        let event = InboundEvent::parse(raw_body, received_at)?;
        debug!(
            tenant_id = %tenant_id,
            event_type = %event.event_type,
            "Verified payload: {}",
            self.redactor.redact(&event.payload)
        );

        let max_retries = tenant.max_retries.unwrap_or(self.config.default_max_retries);
        let entry = LedgerEntry::pending(
            event.external_event_id.clone(),
            tenant_id.as_str(),
            event.event_type.as_str(),
            event.payload.clone(),
            event.received_at,
        )
        .with_record(Some(event.document_id.clone()), event.document_name.clone())
        .with_max_retries(max_retries);

        match self.ledger.admit(entry).await? {
            Admission::Admitted(entry) => {
                let pipeline = Arc::clone(self);
                let report = tokio::spawn(async move { pipeline.process_entry(entry).await })
                    .await
                    .map_err(|e| PipelineError::Fault(format!("processing task aborted: {}", e)))??;
                Ok(IngestOutcome::Processed(report))
            }
            Admission::Duplicate { existing_id, status } => Ok(IngestOutcome::Duplicate { existing_id, status }),
        }
    }

    fn candidate_tenant(&self, raw_body: &[u8], tenant_hint: Option<&str>) -> Result<String, PipelineError> {
        // Untrusted until the signature is checked; only used to pick a secret
        let payload = serde_json::from_slice::<Value>(raw_body).ok();
        let from_payload = payload.as_ref().and_then(|p| self.tenants.resolve(p));

        match tenant_hint.map(str::trim).filter(|h| !h.is_empty()) {
            Some(hint) => {
                if let Some(found) = from_payload.as_deref().filter(|found| *found != hint) {
                    warn!(tenant_id = %hint, "Payload names tenant '{}', using path tenant", found);
                }
                Ok(hint.to_string())
            }
            None => match from_payload {
                Some(found) => Ok(found),
                None if payload.is_none() => Err(PipelineError::MalformedPayload("body is not JSON".to_string())),
                None => Err(PipelineError::TenantResolution),
            },
        }
    }

    /// Runs one attempt for an admitted (pending) entry and records the
    /// outcome on the ledger. Faults end up on the entry, not in the result;
    /// only a ledger failure is returned as an error.
    pub async fn process_entry(&self, entry: LedgerEntry) -> Result<ProcessingReport, PipelineError> {
        let started = Instant::now();
        let entry = self.ledger.start_processing(entry.id).await?;

        let (result, secret) = match self.directory.get(&entry.tenant_id).await {
            Ok(Some(tenant)) => (self.run(&entry, &tenant).await, tenant.webhook_secret.clone()),
            Ok(None) => (Err(PipelineError::UnknownTenant(entry.tenant_id.clone())), String::new()),
            Err(e) => (Err(PipelineError::from(e)), String::new()),
        };

        let elapsed = started.elapsed().as_millis() as i64;
        match result {
            Ok(output) => {
                let done = self.ledger.complete(entry.id, output.actions_triggered(), elapsed).await?;
                info!(
                    entry_id = %entry.id,
                    tenant_id = %entry.tenant_id,
                    "Event processed: {} rules, {} actions ({} failed) in {}ms",
                    output.rules.len(),
                    done.actions_triggered,
                    output.rules.iter().map(RuleExecution::failed).sum::<usize>(),
                    elapsed
                );
                Ok(ProcessingReport {
                    entry_id: entry.id,
                    status: done.status,
                    actions_triggered: done.actions_triggered,
                    rules: output.rules,
                    token_misses: output.token_misses,
                    error: None,
                })
            }
            Err(e) => {
                let message = self.redactor.scrub(&e.to_string(), &[secret.as_str()]);
                let failed = self.ledger.fail(entry.id, &message, e.is_retryable()).await?;
                Ok(ProcessingReport {
                    entry_id: entry.id,
                    status: failed.status,
                    actions_triggered: 0,
                    rules: Vec::new(),
                    token_misses: Vec::new(),
                    error: Some(message),
                })
            }
        }
    }

    /// Field resolver scoped to one tenant's relationship map.
    pub fn resolver_for(&self, tenant: &TenantConfig) -> FieldResolver {
        FieldResolver::new(self.source.clone(), self.config.fetch_timeout).with_relationships(&tenant.relationships)
    }

    async fn run(&self, entry: &LedgerEntry, tenant: &TenantConfig) -> Result<RunOutput, PipelineError> {
        let event = InboundEvent::from_payload(entry.payload.clone(), entry.received_at)?;
        let resolver = self.resolver_for(tenant);

        let source_record = match &event.record_ref {
            Some(record) => match resolver.fetch(&record.module, &record.id).await {
                Ok(found) => Some(found),
                Err(e) if e.is_transient() => return Err(resolve_fault(e, "source record fetch")),
                Err(e) => {
                    warn!(entry_id = %entry.id, "Source record unavailable: {}", e);
                    None
                }
            },
            None => None,
        };
        let root = event.build_context(source_record.as_ref());

        let report = generate_tokens(&resolver, &tenant.field_mappings, &root, tenant.infer_tokens).await;
        if !report.missing.is_empty() {
            let names: Vec<&str> = report.missing.iter().map(|m| m.token.as_str()).collect();
            warn!(entry_id = %entry.id, "Unresolved tokens: {}", names.join(", "));
        }

        let selected = RuleEvaluator::evaluate(&resolver, &tenant.rules, &tenant.tenant_id, &event.event_type, &root)
            .await
            .map_err(|e| resolve_fault(e, "rule evaluation"))?;
        if selected.is_empty() {
            debug!(entry_id = %entry.id, event_type = %event.event_type, "No rules apply");
        }

        let ctx = ExecutionContext {
            entry_id: entry.id,
            tenant_id: tenant.tenant_id.clone(),
            event_type: event.event_type.clone(),
            document_id: event.document_id.clone(),
            record: root,
            tokens: report.as_map(),
            source_record: event.record_ref.clone(),
            resolver,
        };
        let rules = RuleEvaluator::execute(&selected, &self.dispatcher, &ctx).await;

        Ok(RunOutput {
            rules,
            token_misses: report.missing,
        })
    }
}

fn resolve_fault(error: ResolveError, operation: &str) -> PipelineError {
    match error {
        ResolveError::Timeout { .. } => PipelineError::timeout(operation),
        ResolveError::DataSource(e) => PipelineError::DataSource(e),
        other => PipelineError::Fault(format!("{}: {}", operation, other)),
    }
}
