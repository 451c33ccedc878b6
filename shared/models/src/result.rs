//! Test result model.
//!
//! One measured value for one named test on one lot. Results have their own
//! draft/approved lifecycle, separate from the lot workflow that aggregates
//! them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Result lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestResultStatus {
    /// Recorded but not yet signed off; rejection reverts here
    Draft,
    /// Signed off by an approver
    Approved,
}

impl TestResultStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "approved" => Some(Self::Approved),
            _ => None,
        }
    }
}

impl std::fmt::Display for TestResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Approved => write!(f, "approved"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Validate, PartialEq)]
pub struct TestResult {
    pub id: Uuid,
    pub lot_id: Uuid,
    #[validate(length(min = 1, max = 100, message = "Test name is required"))]
    pub test_name: String,
    /// Value exactly as the lab reported it, e.g. `4500`, `< 10`, `ND`
    pub value: String,
    pub status: TestResultStatus,
    /// Extraction confidence when the value came from automated intake
    pub confidence: Option<f64>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    /// Display snapshot of the limit at recording time; the authoritative
    /// specification lives on ProductTestSpecification
    pub specification: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TestResult {
    pub fn new(lot_id: Uuid, test_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            lot_id,
            test_name: test_name.into(),
            value: value.into(),
            status: TestResultStatus::Draft,
            confidence: None,
            approved_by: None,
            approved_at: None,
            notes: None,
            specification: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn has_value(&self) -> bool {
        !self.value.trim().is_empty()
    }

    pub fn is_approved(&self) -> bool {
        self.status == TestResultStatus::Approved
    }

    pub fn mark_approved(&mut self, approver: impl Into<String>) {
        self.status = TestResultStatus::Approved;
        self.approved_by = Some(approver.into());
        self.approved_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    pub fn revert_to_draft(&mut self) {
        self.status = TestResultStatus::Draft;
        self.approved_by = None;
        self.approved_at = None;
        self.updated_at = Utc::now();
    }
}
