use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const RELATIONSHIP_SEPARATOR: &str = ">>";

// ===== Ledger =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Pending,
    Processing,
    Success,
    Failed,
    PermanentlyFailed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::PermanentlyFailed => "permanently_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::PermanentlyFailed)
    }

    /// Edges of the ledger state machine. `Processing -> PermanentlyFailed`
    /// is the retry budget being exhausted on the failing attempt itself.
    pub fn can_transition_to(&self, next: LedgerStatus) -> bool {
        use LedgerStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Success)
                | (Processing, Failed)
                | (Processing, PermanentlyFailed)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown ledger status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for LedgerStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "permanently_failed" => Ok(Self::PermanentlyFailed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub external_event_id: Option<String>,
    pub tenant_id: String,
    pub event_type: String,
    pub record_id: Option<String>,
    pub record_name: Option<String>,
    pub payload: serde_json::Value,
    pub status: LedgerStatus,
    pub actions_triggered: i32,
    pub error_message: Option<String>,
    pub processing_ms: Option<i64>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

pub const DEFAULT_MAX_RETRIES: i32 = 3;

impl LedgerEntry {
    pub fn pending(
        external_event_id: Option<String>,
        tenant_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_event_id,
            tenant_id: tenant_id.into(),
            event_type: event_type.into(),
            record_id: None,
            record_name: None,
            payload,
            status: LedgerStatus::Pending,
            actions_triggered: 0,
            error_message: None,
            processing_ms: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            next_retry_at: None,
            received_at,
            started_at: None,
            processed_at: None,
        }
    }

    pub fn with_record(mut self, id: Option<String>, name: Option<String>) -> Self {
        self.record_id = id;
        self.record_name = name;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

// ===== Field references =====

/// A field reference parsed once from its string form.
///
/// `account.name` descends into nested objects on the root record.
/// `opportunity>>Primary Contact>>email` names a source entity, zero or more
/// relationship hops, and a final field looked up on the last fetched record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldPath {
    Direct(Vec<String>),
    Related {
        source: String,
        hops: Vec<String>,
        field: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldPathError {
    #[error("field reference is empty")]
    Empty,
    #[error("field reference '{0}' contains an empty segment")]
    EmptySegment(String),
    #[error("relationship reference '{0}' needs a source and a field")]
    MissingField(String),
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, FieldPathError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FieldPathError::Empty);
        }

        if !raw.contains(RELATIONSHIP_SEPARATOR) {
            return Ok(Self::Direct(split_dotted(raw)?));
        }

        let parts: Vec<&str> = raw.split(RELATIONSHIP_SEPARATOR).map(str::trim).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(FieldPathError::EmptySegment(raw.to_string()));
        }
        if parts.len() < 2 {
            return Err(FieldPathError::MissingField(raw.to_string()));
        }

        let last = parts.len() - 1;
        Ok(Self::Related {
            source: parts[0].to_string(),
            hops: parts[1..last].iter().map(|s| s.to_string()).collect(),
            field: split_dotted(parts[last])?,
        })
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self, Self::Related { .. })
    }

    /// Segments looked up on the final record.
    pub fn field_segments(&self) -> &[String] {
        match self {
            Self::Direct(segments) => segments,
            Self::Related { field, .. } => field,
        }
    }
}

fn split_dotted(raw: &str) -> Result<Vec<String>, FieldPathError> {
    let segments: Vec<String> = raw.split('.').map(|s| s.trim().to_string()).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(FieldPathError::EmptySegment(raw.to_string()));
    }
    Ok(segments)
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(segments) => f.write_str(&segments.join(".")),
            Self::Related { source, hops, field } => {
                f.write_str(source)?;
                for hop in hops {
                    write!(f, "{}{}", RELATIONSHIP_SEPARATOR, hop)?;
                }
                write!(f, "{}{}", RELATIONSHIP_SEPARATOR, field.join("."))
            }
        }
    }
}

impl FromStr for FieldPath {
    type Err = FieldPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = FieldPathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

// ===== Rules =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogicalOperator {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: FieldPath,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
    // Joins this condition to the next one
    #[serde(default, alias = "logicalOperator")]
    pub logical_operator: LogicalOperator,
}

impl Condition {
    pub fn new(field: FieldPath, operator: ConditionOperator, value: serde_json::Value) -> Self {
        Self {
            field,
            operator,
            value,
            logical_operator: LogicalOperator::And,
        }
    }

    pub fn or_next(mut self) -> Self {
        self.logical_operator = LogicalOperator::Or;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientSpec {
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub signing_order: Option<u32>,
}

fn default_role() -> String {
    "signer".to_string()
}

impl RecipientSpec {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: None,
            last_name: None,
            role: default_role(),
            signing_order: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    UpdateRecord,
    CreateNote,
    SendNotification,
    LogActivity,
    CallWebhook,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateRecord => "update_record",
            Self::CreateNote => "create_note",
            Self::SendNotification => "send_notification",
            Self::LogActivity => "log_activity",
            Self::CallWebhook => "call_webhook",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    UpdateRecord {
        module: String,
        #[serde(default)]
        record_id: Option<String>,
        field: String,
        value: String,
    },
    CreateNote {
        subject: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        module: Option<String>,
        #[serde(default)]
        record_id: Option<String>,
    },
    SendNotification {
        recipients: Vec<RecipientSpec>,
        subject: String,
        message: String,
    },
    LogActivity {
        message: String,
    },
    CallWebhook {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

fn default_method() -> String {
    "POST".to_string()
}

impl Action {
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::UpdateRecord { .. } => ActionType::UpdateRecord,
            Self::CreateNote { .. } => ActionType::CreateNote,
            Self::SendNotification { .. } => ActionType::SendNotification,
            Self::LogActivity { .. } => ActionType::LogActivity,
            Self::CallWebhook { .. } => ActionType::CallWebhook,
        }
    }

    pub fn log(message: &str) -> Self {
        Self::LogActivity {
            message: message.to_string(),
        }
    }

    pub fn update_record(module: &str, field: &str, value: &str) -> Self {
        Self::UpdateRecord {
            module: module.to_string(),
            record_id: None,
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn webhook(url: &str) -> Self {
        Self::CallWebhook {
            url: url.to_string(),
            method: default_method(),
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    // Filled from the owning tenant when rules are loaded from tenant config
    #[serde(default)]
    pub tenant_id: String,
    pub name: String,
    pub trigger_event: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub then_actions: Vec<Action>,
    #[serde(default)]
    pub else_actions: Vec<Action>,
    // Lower runs first
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Rule {
    pub fn new(tenant_id: &str, name: &str, trigger_event: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            trigger_event: trigger_event.to_string(),
            conditions: Vec::new(),
            then_actions: Vec::new(),
            else_actions: Vec::new(),
            priority: 0,
            timeout_seconds: default_timeout_seconds(),
            is_active: true,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn then(mut self, action: Action) -> Self {
        self.then_actions.push(action);
        self
    }

    pub fn otherwise(mut self, action: Action) -> Self {
        self.else_actions.push(action);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

// ===== Tokens & recipients =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Number,
    Currency,
    Date,
    Datetime,
    #[serde(alias = "boolean")]
    Bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub token: String,
    pub field: FieldPath,
    #[serde(default)]
    pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedToken {
    pub name: String,
    pub value: String,
    pub source: String,
    pub inferred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecipientSource {
    Static,
    Dynamic { reference: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRecipient {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: String,
    pub signing_order: Option<u32>,
    pub source: RecipientSource,
}

impl ResolvedRecipient {
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}
