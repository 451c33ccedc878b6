//! Audit trail models.
//!
//! Every mutation the lifecycle engine performs produces exactly one audit
//! record. Records are hash-chained: each hash covers the record's own
//! fields plus the previous record's hash, so edits anywhere in the history
//! are detectable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    StatusChange,
    Approve,
    Reject,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::StatusChange => write!(f, "status_change"),
            Self::Approve => write!(f, "approve"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl AuditAction {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "status_change" => Some(Self::StatusChange),
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// What a mutation wants recorded; the sink turns this into a chained record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditChange {
    pub table_name: String,
    pub record_id: Uuid,
    pub action: AuditAction,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub actor: Option<String>,
    pub reason: Option<String>,
}

impl AuditChange {
    pub fn new(table_name: impl Into<String>, record_id: Uuid, action: AuditAction) -> Self {
        Self {
            table_name: table_name.into(),
            record_id,
            action,
            old_values: None,
            new_values: None,
            actor: None,
            reason: None,
        }
    }

    pub fn with_old(mut self, old_values: serde_json::Value) -> Self {
        self.old_values = Some(old_values);
        self
    }

    pub fn with_new(mut self, new_values: serde_json::Value) -> Self {
        self.new_values = Some(new_values);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct AuditRecord {
    pub id: Uuid,
    pub table_name: String,
    pub record_id: Uuid,
    pub action: AuditAction,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub hash: String,
    pub previous_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Builds a record chained onto `previous_hash`
    pub fn new(change: AuditChange, previous_hash: Option<String>) -> Self {
        let created_at = Utc::now();
        let hash = Self::calculate_hash(&change, &created_at, previous_hash.as_deref());

        Self {
            id: Uuid::new_v4(),
            table_name: change.table_name,
            record_id: change.record_id,
            action: change.action,
            old_values: change.old_values,
            new_values: change.new_values,
            actor: change.actor,
            reason: change.reason,
            hash,
            previous_hash,
            created_at,
        }
    }

    fn calculate_hash(
        change: &AuditChange,
        created_at: &DateTime<Utc>,
        previous_hash: Option<&str>,
    ) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(&change.table_name);
        hasher.update(change.record_id.as_bytes());
        hasher.update(change.action.to_string());
        hasher.update(serde_json::to_string(&change.old_values).unwrap_or_default());
        hasher.update(serde_json::to_string(&change.new_values).unwrap_or_default());
        hasher.update(change.actor.as_deref().unwrap_or(""));
        hasher.update(change.reason.as_deref().unwrap_or(""));
        hasher.update(created_at.to_rfc3339());
        hasher.update(previous_hash.unwrap_or(""));

        hex::encode(hasher.finalize())
    }

    /// Recomputes the hash from stored fields and compares
    pub fn verify_integrity(&self) -> bool {
        let change = AuditChange {
            table_name: self.table_name.clone(),
            record_id: self.record_id,
            action: self.action,
            old_values: self.old_values.clone(),
            new_values: self.new_values.clone(),
            actor: self.actor.clone(),
            reason: self.reason.clone(),
        };
        Self::calculate_hash(&change, &self.created_at, self.previous_hash.as_deref()) == self.hash
    }
}
