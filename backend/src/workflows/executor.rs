// Workflow Executor - Dispatches a rule's selected actions

use docuflow_shared::{Action, RecipientSpec};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use super::actions::{render_template, ActionError, ActionOutcome};
use super::triggers::RecordRef;
use crate::config::PipelineConfig;
use crate::redaction::Redactor;
use crate::resolver::recipients::resolve_recipients;
use crate::resolver::FieldResolver;
use crate::services::{ActivityEntry, ActivityKind, ActivityLog, NewNote, Notification, Notifier, RecordWriter};

/// Everything an action may reference while it runs.
#[derive(Clone)]
pub struct ExecutionContext {
    pub entry_id: Uuid,
    pub tenant_id: String,
    pub event_type: String,
    pub document_id: String,
    /// Root record the rule conditions were evaluated against
    pub record: Value,
    pub tokens: HashMap<String, String>,
    pub source_record: Option<RecordRef>,
    pub resolver: FieldResolver,
}

impl ExecutionContext {
    async fn render(&self, template: &str) -> String {
        let rendered = render_template(template, &self.tokens, &self.record, &self.resolver).await;
        if !rendered.misses.is_empty() {
            warn!(entry_id = %self.entry_id, "Unresolved placeholders: {}", rendered.misses.join(", "));
        }
        rendered.text
    }

    /// Explicit target, else the event's source record when the module matches.
    fn target_record(&self, module: Option<&str>, explicit_id: Option<String>) -> Option<RecordRef> {
        let source = self.source_record.as_ref();
        let module = module
            .map(str::to_string)
            .or_else(|| source.map(|s| s.module.clone()))?;

        let id = match explicit_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => source
                .filter(|s| s.module.eq_ignore_ascii_case(&module))
                .map(|s| s.id.clone())?,
        };
        Some(RecordRef { module, id })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchTimeouts {
    pub crm: Duration,
    pub webhook: Duration,
    pub notify: Duration,
}

impl From<&PipelineConfig> for DispatchTimeouts {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            crm: config.fetch_timeout,
            webhook: config.webhook_timeout,
            notify: config.notify_timeout,
        }
    }
}

pub struct ActionDispatcher {
    writer: Arc<dyn RecordWriter>,
    notifier: Arc<dyn Notifier>,
    activity: Arc<dyn ActivityLog>,
    http: reqwest::Client,
    timeouts: DispatchTimeouts,
    redactor: Arc<Redactor>,
}

async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T, ActionError>
where
    F: Future<Output = Result<T, ActionError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ActionError::timeout(operation))?
}

impl ActionDispatcher {
    pub fn new(
        writer: Arc<dyn RecordWriter>,
        notifier: Arc<dyn Notifier>,
        activity: Arc<dyn ActivityLog>,
        timeouts: DispatchTimeouts,
        redactor: Arc<Redactor>,
    ) -> Self {
        Self {
            writer,
            notifier,
            activity,
            http: reqwest::Client::new(),
            timeouts,
            redactor,
        }
    }

    /// Executes one action. Failures come back as an unsuccessful outcome and
    /// never propagate, so sibling actions always get their turn.
    pub async fn dispatch(&self, action: &Action, ctx: &ExecutionContext, rule_id: Uuid) -> ActionOutcome {
        let start = Instant::now();
        let action_type = action.action_type();

        info!(entry_id = %ctx.entry_id, %rule_id, "Executing action: {}", action_type);

        let result = match action {
            Action::UpdateRecord { module, record_id, field, value } => {
                self.update_record(ctx, module, record_id.as_deref(), field, value).await
            }
            Action::CreateNote { subject, message, module, record_id } => {
                self.create_note(ctx, rule_id, subject, message, module.as_deref(), record_id.as_deref())
                    .await
            }
            Action::SendNotification { recipients, subject, message } => {
                self.send_notification(ctx, rule_id, recipients, subject, message).await
            }
            Action::LogActivity { message } => self.log_activity(ctx, rule_id, message).await,
            Action::CallWebhook { url, method, headers } => self.call_webhook(ctx, rule_id, url, method, headers).await,
        };

        let duration = start.elapsed().as_millis() as i64;
        match result {
            Ok(output) => ActionOutcome::success(action_type, Some(output)).with_duration(duration),
            Err(e) => {
                warn!(entry_id = %ctx.entry_id, %rule_id, retryable = e.retryable, "Action {} failed: {}", action_type, e);
                ActionOutcome::failure(action_type, &e).with_duration(duration)
            }
        }
    }

    async fn update_record(
        &self,
        ctx: &ExecutionContext,
        module: &str,
        record_id: Option<&str>,
        field: &str,
        value: &str,
    ) -> Result<Value, ActionError> {
        let explicit_id = match record_id {
            Some(raw) => Some(ctx.render(raw).await),
            None => None,
        };
        let target = ctx
            .target_record(Some(module), explicit_id)
            .ok_or_else(|| ActionError::permanent(format!("no {} record to update", module)))?;
        let value = ctx.render(value).await;

        bounded(self.timeouts.crm, "record update", async {
            self.writer
                .update_field(&target.module, &target.id, field, &value)
                .await
                .map_err(ActionError::from)
        })
        .await?;

        Ok(json!({"module": target.module, "record_id": target.id, "field": field}))
    }

    async fn create_note(
        &self,
        ctx: &ExecutionContext,
        rule_id: Uuid,
        subject: &str,
        message: &str,
        module: Option<&str>,
        record_id: Option<&str>,
    ) -> Result<Value, ActionError> {
        let explicit_id = match record_id {
            Some(raw) => Some(ctx.render(raw).await),
            None => None,
        };
        let parent = ctx.target_record(module, explicit_id);
        let note = NewNote {
            subject: ctx.render(subject).await,
            description: ctx.render(message).await,
            parent_module: parent.as_ref().map(|p| p.module.clone()),
            parent_id: parent.as_ref().map(|p| p.id.clone()),
        };

        let note_id = bounded(self.timeouts.crm, "note creation", async {
            self.writer.create_note(&note).await.map_err(ActionError::from)
        })
        .await?;

        self.append(
            ActivityEntry::new(ActivityKind::Note, ctx.entry_id, &ctx.tenant_id, &note.subject)
                .rule(rule_id)
                .metadata_json(json!({"note_id": note_id, "parent_id": note.parent_id})),
        )
        .await?;

        Ok(json!({"note_id": note_id}))
    }

    async fn send_notification(
        &self,
        ctx: &ExecutionContext,
        rule_id: Uuid,
        recipients: &[RecipientSpec],
        subject: &str,
        message: &str,
    ) -> Result<Value, ActionError> {
        let report = resolve_recipients(&ctx.resolver, recipients, &ctx.record).await;
        if report.recipients.is_empty() {
            return Err(ActionError::permanent(format!(
                "none of {} recipients could be resolved",
                recipients.len()
            )));
        }

        let notification = Notification {
            recipients: report.recipients,
            subject: ctx.render(subject).await,
            body: ctx.render(message).await,
        };

        bounded(self.timeouts.notify, "notification", async {
            self.notifier.send(&notification).await.map_err(ActionError::from)
        })
        .await?;

        let delivered: Vec<&str> = notification.recipients.iter().map(|r| r.email.as_str()).collect();
        self.append(
            ActivityEntry::new(ActivityKind::Notification, ctx.entry_id, &ctx.tenant_id, &notification.subject)
                .rule(rule_id)
                .metadata_json(json!({"recipients": delivered, "failures": report.failures})),
        )
        .await?;

        Ok(json!({"delivered": delivered.len(), "failed": report.failures.len()}))
    }

    async fn log_activity(&self, ctx: &ExecutionContext, rule_id: Uuid, message: &str) -> Result<Value, ActionError> {
        let message = ctx.render(message).await;
        let entry = ActivityEntry::new(ActivityKind::Activity, ctx.entry_id, &ctx.tenant_id, message).rule(rule_id);
        let activity_id = entry.id;
        self.append(entry).await?;
        Ok(json!({"activity_id": activity_id}))
    }

    async fn call_webhook(
        &self,
        ctx: &ExecutionContext,
        rule_id: Uuid,
        url: &str,
        method: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<Value, ActionError> {
        let url = ctx.render(url).await;
        let method = reqwest::Method::from_bytes(method.trim().to_uppercase().as_bytes())
            .map_err(|_| ActionError::permanent(format!("unsupported HTTP method '{}'", method)))?;

        let payload = json!({
            "entry_id": ctx.entry_id,
            "tenant_id": ctx.tenant_id,
            "rule_id": rule_id,
            "event_type": ctx.event_type,
            "document_id": ctx.document_id,
            "record": ctx.record,
            "tokens": ctx.tokens,
        });

        let mut request = self.http.request(method.clone(), &url);
        for (name, value) in headers {
            request = request.header(name.as_str(), ctx.render(value).await);
        }
        if method != reqwest::Method::GET {
            request = request.json(&payload);
        }

        let safe_url = self.redactor.redact_url(&url);
        let status = bounded(self.timeouts.webhook, "webhook", async {
            request
                .send()
                .await
                .map(|response| response.status())
                .map_err(ActionError::from)
        })
        .await?;

        if !status.is_success() {
            let message = format!("webhook {} returned {}", safe_url, status.as_u16());
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                ActionError::transient(message)
            } else {
                ActionError::permanent(message)
            });
        }

        self.append(
            ActivityEntry::new(ActivityKind::Webhook, ctx.entry_id, &ctx.tenant_id, format!("{} {}", method, safe_url))
                .rule(rule_id)
                .metadata_json(json!({"status_code": status.as_u16()})),
        )
        .await?;

        Ok(json!({"url": safe_url, "status_code": status.as_u16()}))
    }

    async fn append(&self, entry: ActivityEntry) -> Result<(), ActionError> {
        self.activity
            .record(&entry)
            .await
            .map_err(|e| ActionError::transient(format!("activity log write failed: {}", e)))
    }
}
