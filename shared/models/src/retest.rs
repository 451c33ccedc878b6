//! Retest models.
//!
//! A retest request re-opens a subset of a lot's results for repeat
//! measurement. Each item snapshots the value it had when the request was
//! created; that snapshot is immutable and is the sole baseline the
//! workflow compares against later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Retest request states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetestStatus {
    /// Waiting for new values to come in
    Pending,
    /// A re-entered value matched its snapshot; needs human confirmation
    ReviewRequired,
    /// Every item was re-measured, or QC closed the request manually
    Completed,
}

impl RetestStatus {
    /// Open requests keep the lot's pending-retest flag raised
    pub fn is_open(&self) -> bool {
        matches!(self, RetestStatus::Pending | RetestStatus::ReviewRequired)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "review_required" => Some(Self::ReviewRequired),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RetestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::ReviewRequired => write!(f, "review_required"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Validate, PartialEq)]
pub struct RetestRequest {
    pub id: Uuid,
    pub lot_id: Uuid,
    /// Lot reference plus per-lot sequence suffix, e.g. `FLK-2024-0042-R2`
    #[validate(length(min = 3, max = 70, message = "Reference is required"))]
    pub reference: String,
    pub status: RetestStatus,
    #[validate(length(min = 1, max = 500, message = "Reason is required"))]
    pub reason: String,
    pub requested_by: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct RetestItem {
    pub id: Uuid,
    pub retest_request_id: Uuid,
    pub test_result_id: Uuid,
    /// Value at request creation; never recomputed afterwards
    pub original_value: String,
    pub created_at: DateTime<Utc>,
}

impl RetestRequest {
    pub fn new(
        lot_id: Uuid,
        reference: impl Into<String>,
        reason: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lot_id,
            reference: reference.into(),
            status: RetestStatus::Pending,
            reason: reason.into(),
            requested_by: requested_by.into(),
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn mark_completed(&mut self) {
        self.status = RetestStatus::Completed;
        self.completed_at = Some(Utc::now());
    }
}

impl RetestItem {
    pub fn new(retest_request_id: Uuid, test_result_id: Uuid, original_value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            retest_request_id,
            test_result_id,
            original_value: original_value.into(),
            created_at: Utc::now(),
        }
    }
}
