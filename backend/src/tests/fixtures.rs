use async_trait::async_trait;
use chrono::Utc;
use docuflow_shared::{
    Action, Condition, ConditionOperator, FieldMapping, FieldPath, FieldType, RecipientSpec, Rule,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::PipelineConfig;
use crate::ledger::{BackoffPolicy, EventLedger, MemoryLedgerStore};
use crate::pipeline::Pipeline;
use crate::redaction::Redactor;
use crate::services::{
    CrmError, DataSource, MemoryActivityLog, NewNote, Notification, Notifier, NotifyError, RecordWriter,
    StaticTenantDirectory, TenantConfig,
};
use crate::workflows::{ActionDispatcher, DispatchTimeouts};

pub const TENANT: &str = "acme";
pub const SECRET: &str = "whsec_test_acme";

// In-memory CRM

/// CRM stand-in holding records by (module, id) and recording writes.
#[derive(Default)]
pub struct FakeCrm {
    records: HashMap<(String, String), Value>,
    delay: Option<Duration>,
    failing: AtomicBool,
    updates: Mutex<Vec<(String, String, String, String)>>,
    notes: Mutex<Vec<NewNote>>,
    fetches: Mutex<usize>,
}

impl FakeCrm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, module: &str, id: &str, record: Value) -> Self {
        self.records.insert((module.to_string(), id.to_string()), record);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call fails with a 503.
    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    /// Clears `failing` on a shared instance.
    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub async fn updates(&self) -> Vec<(String, String, String, String)> {
        self.updates.lock().await.clone()
    }

    pub async fn notes(&self) -> Vec<NewNote> {
        self.notes.lock().await.clone()
    }

    pub async fn fetch_count(&self) -> usize {
        *self.fetches.lock().await
    }

    async fn call(&self) -> Result<(), CrmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CrmError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DataSource for FakeCrm {
    async fn fetch(&self, module: &str, id: &str) -> Result<Option<Value>, CrmError> {
        *self.fetches.lock().await += 1;
        self.call().await?;
        Ok(self.records.get(&(module.to_string(), id.to_string())).cloned())
    }
}

#[async_trait]
impl RecordWriter for FakeCrm {
    async fn update_field(&self, module: &str, id: &str, field: &str, value: &str) -> Result<(), CrmError> {
        self.call().await?;
        self.updates
            .lock()
            .await
            .push((module.to_string(), id.to_string(), field.to_string(), value.to_string()));
        Ok(())
    }

    async fn create_note(&self, note: &NewNote) -> Result<String, CrmError> {
        self.call().await?;
        let mut notes = self.notes.lock().await;
        notes.push(note.clone());
        Ok(format!("note-{}", notes.len()))
    }
}

// Notification sink

#[derive(Default)]
pub struct FakeNotifier {
    delay: Option<Duration>,
    sent: Mutex<Vec<Notification>>,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

// Pipeline assembly

pub struct TestPipeline {
    pub pipeline: Arc<Pipeline>,
    pub crm: Arc<FakeCrm>,
    pub notifier: Arc<FakeNotifier>,
    pub activity: Arc<MemoryActivityLog>,
    pub store: Arc<MemoryLedgerStore>,
}

pub fn test_pipeline(tenants: Vec<TenantConfig>, crm: FakeCrm) -> TestPipeline {
    test_pipeline_with_backoff(tenants, crm, BackoffPolicy::default())
}

pub fn test_pipeline_with_backoff(tenants: Vec<TenantConfig>, crm: FakeCrm, backoff: BackoffPolicy) -> TestPipeline {
    let crm = Arc::new(crm);
    let notifier = Arc::new(FakeNotifier::new());
    let activity = Arc::new(MemoryActivityLog::new());
    let store = Arc::new(MemoryLedgerStore::new());
    let redactor = Arc::new(Redactor::default());

    let config = PipelineConfig {
        fetch_timeout: Duration::from_millis(500),
        webhook_timeout: Duration::from_secs(1),
        notify_timeout: Duration::from_millis(500),
        ..PipelineConfig::default()
    };
    let dispatcher = ActionDispatcher::new(
        crm.clone(),
        notifier.clone(),
        activity.clone(),
        DispatchTimeouts::from(&config),
        redactor.clone(),
    );
    let directory = StaticTenantDirectory::from_tenants(tenants).expect("valid test tenants");

    let pipeline = Pipeline::new(
        Arc::new(directory),
        EventLedger::new(store.clone(), backoff),
        crm.clone(),
        dispatcher,
        config,
        redactor,
    );

    TestPipeline {
        pipeline: Arc::new(pipeline),
        crm,
        notifier,
        activity,
        store,
    }
}

// Tenants and payloads

/// Opportunity workflow: large deals are marked won and ops gets an email;
/// anything else just gets an activity line.
pub fn acme_tenant() -> TenantConfig {
    let large_deal = Rule::new(TENANT, "Large deal signed", "document.completed")
        .with_priority(1)
        .when(Condition::new(
            FieldPath::parse("amount").unwrap(),
            ConditionOperator::GreaterThan,
            json!("10000"),
        ))
        .then(Action::update_record("Opportunities", "sales_stage", "Closed Won"))
        .then(Action::SendNotification {
            recipients: vec![
                RecipientSpec::new("ops@acme.com"),
                RecipientSpec::new("opportunity>>Contact>>email1"),
            ],
            subject: "{{ClientName}} signed {{document_name}}".to_string(),
            message: "Amount: {{Amount}}".to_string(),
        })
        .otherwise(Action::log("Small deal signed: {{document_name}}"));

    TenantConfig::new(TENANT, SECRET)
        .with_rule(large_deal)
        .with_mapping(FieldMapping {
            token: "ClientName".to_string(),
            field: FieldPath::parse("account_name").unwrap(),
            field_type: FieldType::Text,
        })
        .with_mapping(FieldMapping {
            token: "Amount".to_string(),
            field: FieldPath::parse("amount").unwrap(),
            field_type: FieldType::Currency,
        })
}

/// CRM with the opportunity `o1` and its primary contact `c1`.
pub fn acme_crm() -> FakeCrm {
    FakeCrm::new()
        .with_record(
            "Opportunities",
            "o1",
            json!({"id": "o1", "account_name": "Acme Corp", "amount": "15000", "contact_id": "c1"}),
        )
        .with_record("Contacts", "c1", json!({"id": "c1", "email1": "buyer@acme.com", "first_name": "Ada"}))
}

pub fn completed_event(event_id: &str, amount: Option<&str>) -> Value {
    let mut fields = vec![json!({"name": "signer_title", "value": "CFO"})];
    if let Some(amount) = amount {
        fields.push(json!({"name": "amount", "value": amount}));
    }

    json!({
        "event_id": event_id,
        "event": "document.completed",
        "created_at": Utc::now().to_rfc3339(),
        "data": {
            "id": "doc-1",
            "name": "Master Services Agreement",
            "metadata": {
                "tenant_id": TENANT,
                "record_module": "Opportunities",
                "record_id": "o1"
            },
            "fields": fields
        }
    })
}
