//! Mapping relationship labels to CRM entity types and foreign-key fields.
//!
//! Inference from free-text labels is a heuristic. A tenant's explicit
//! relationship map always wins over the keyword table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Contacts,
    Accounts,
    Users,
    Opportunities,
    Leads,
    Cases,
}

impl EntityType {
    pub fn module_name(&self) -> &'static str {
        match self {
            Self::Contacts => "Contacts",
            Self::Accounts => "Accounts",
            Self::Users => "Users",
            Self::Opportunities => "Opportunities",
            Self::Leads => "Leads",
            Self::Cases => "Cases",
        }
    }

    /// Conventional foreign-key field pointing at this entity.
    pub fn default_foreign_key(&self) -> &'static str {
        match self {
            Self::Contacts => "contact_id",
            Self::Accounts => "account_id",
            Self::Users => "assigned_user_id",
            Self::Opportunities => "opportunity_id",
            Self::Leads => "lead_id",
            Self::Cases => "case_id",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.module_name())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contacts" | "contact" => Ok(Self::Contacts),
            "accounts" | "account" => Ok(Self::Accounts),
            "users" | "user" => Ok(Self::Users),
            "opportunities" | "opportunity" => Ok(Self::Opportunities),
            "leads" | "lead" => Ok(Self::Leads),
            "cases" | "case" => Ok(Self::Cases),
            other => Err(format!("unknown entity type '{}'", other)),
        }
    }
}

/// Keyword table, checked in order against the words of a label.
pub const KEYWORD_TABLE: &[(&str, EntityType)] = &[
    ("contact", EntityType::Contacts),
    ("contacts", EntityType::Contacts),
    ("account", EntityType::Accounts),
    ("accounts", EntityType::Accounts),
    ("user", EntityType::Users),
    ("users", EntityType::Users),
    ("assigned", EntityType::Users),
    ("opportunity", EntityType::Opportunities),
    ("opportunities", EntityType::Opportunities),
    ("lead", EntityType::Leads),
    ("leads", EntityType::Leads),
    ("case", EntityType::Cases),
    ("cases", EntityType::Cases),
];

const DEFAULT_FOREIGN_KEYS: &[&str] = &["account_id", "contact_id", "opportunity_id", "assigned_user_id"];

/// Relationship label -> entity type, with per-tenant overrides.
#[derive(Debug, Clone, Default)]
pub struct EntityInference {
    overrides: HashMap<String, EntityType>,
}

impl EntityInference {
    pub fn new(overrides: &HashMap<String, EntityType>) -> Self {
        Self {
            overrides: overrides
                .iter()
                .map(|(label, entity)| (normalize_label(label), *entity))
                .collect(),
        }
    }

    pub fn infer(&self, label: &str) -> Option<EntityType> {
        let normalized = normalize_label(label);
        if let Some(entity) = self.overrides.get(&normalized) {
            return Some(*entity);
        }

        let words: Vec<&str> = normalized
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        KEYWORD_TABLE
            .iter()
            .find(|(keyword, _)| words.contains(keyword))
            .map(|(_, entity)| *entity)
    }
}

fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// Ordered, de-duplicated foreign-key field names to try for a label.
pub fn foreign_key_candidates(label: &str, target: Option<EntityType>) -> Vec<String> {
    let lower = normalize_label(label);
    let underscored = lower.split_whitespace().collect::<Vec<_>>().join("_");
    let without_primary = lower
        .strip_prefix("primary ")
        .map(|rest| rest.split_whitespace().collect::<Vec<_>>().join("_"));

    let mut candidates = vec![format!("{}_id", lower), format!("{}_id", underscored)];
    if let Some(rest) = without_primary {
        candidates.push(format!("{}_id", rest));
    }
    if let Some(entity) = target {
        candidates.push(entity.default_foreign_key().to_string());
    }
    candidates.extend(DEFAULT_FOREIGN_KEYS.iter().map(|k| k.to_string()));

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));
    candidates
}
