//! Lot and sublot models for the Certa sample tracking system.
//!
//! A lot is a manufacturing/sample batch tracked from intake through
//! certificate release. Its status is driven by the lifecycle engine;
//! the transition table here is the single source of truth for which
//! manual status changes are legal.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Lot workflow states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LotStatus {
    /// Lot created, no results recorded yet
    AwaitingResults,
    /// Some required results are still missing
    PartialResults,
    /// All required results present but at least one fails its specification
    NeedsAttention,
    /// All required results present and passing, pending QC review
    UnderReview,
    /// QC review done, queued for release sign-off
    AwaitingRelease,
    /// Lot accepted by QC
    Approved,
    /// Certificate issued, lot shipped
    Released,
    /// Lot rejected by QC
    Rejected,
}

impl LotStatus {
    /// Check if a manual transition is valid
    pub fn can_transition_to(&self, target: LotStatus) -> bool {
        use LotStatus::*;

        match (self, target) {
            // From AwaitingResults
            (AwaitingResults, PartialResults) => true,
            (AwaitingResults, UnderReview) => true,
            (AwaitingResults, Rejected) => true,

            // From PartialResults
            (PartialResults, UnderReview) => true,
            (PartialResults, NeedsAttention) => true,
            (PartialResults, Rejected) => true,

            // From UnderReview
            (UnderReview, AwaitingRelease) => true,
            (UnderReview, NeedsAttention) => true,
            (UnderReview, Approved) => true,
            (UnderReview, Rejected) => true,
            (UnderReview, AwaitingResults) => true,

            // From NeedsAttention; Approved only with a QC override reason,
            // enforced by the state machine, not by this table
            (NeedsAttention, Approved) => true,
            (NeedsAttention, PartialResults) => true,
            (NeedsAttention, Rejected) => true,

            // From AwaitingRelease
            (AwaitingRelease, Approved) => true,
            (AwaitingRelease, UnderReview) => true,

            // From Approved
            (Approved, Released) => true,
            (Approved, UnderReview) => true,

            // Released is terminal
            (Released, _) => false,

            // Rejected can only be reopened
            (Rejected, AwaitingResults) => true,

            _ => false,
        }
    }

    /// Check if the lot is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, LotStatus::Released)
    }

    /// Check if the status was reached by an explicit QC decision.
    /// Decided statuses are never overwritten by automatic recomputation.
    pub fn is_decided(&self) -> bool {
        matches!(
            self,
            LotStatus::Approved | LotStatus::Released | LotStatus::Rejected
        )
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "awaiting_results" => Some(Self::AwaitingResults),
            "partial_results" => Some(Self::PartialResults),
            "needs_attention" => Some(Self::NeedsAttention),
            "under_review" => Some(Self::UnderReview),
            "awaiting_release" => Some(Self::AwaitingRelease),
            "approved" => Some(Self::Approved),
            "released" => Some(Self::Released),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for LotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingResults => write!(f, "awaiting_results"),
            Self::PartialResults => write!(f, "partial_results"),
            Self::NeedsAttention => write!(f, "needs_attention"),
            Self::UnderReview => write!(f, "under_review"),
            Self::AwaitingRelease => write!(f, "awaiting_release"),
            Self::Approved => write!(f, "approved"),
            Self::Released => write!(f, "released"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Lot kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotType {
    /// Single-product batch
    Standard,
    /// Batch with sublots split off
    Parent,
    /// Blend referencing more than one product
    Composite,
}

impl LotType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "parent" => Some(Self::Parent),
            "composite" => Some(Self::Composite),
            _ => None,
        }
    }
}

impl std::fmt::Display for LotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Parent => write!(f, "parent"),
            Self::Composite => write!(f, "composite"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Validate, PartialEq)]
pub struct Lot {
    pub id: Uuid,
    #[validate(length(min = 3, max = 64, message = "Reference number is required"))]
    pub reference_number: String,
    pub status: LotStatus,
    pub lot_type: LotType,
    pub generate_coa: bool,
    pub has_pending_retest: bool,
    pub rejection_reason: Option<String>,
    pub override_reason: Option<String>,
    pub mfg_date: Option<NaiveDate>,
    pub exp_date: Option<NaiveDate>,
    /// Products this lot is tested against; composite lots carry several
    pub product_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Validate, PartialEq)]
pub struct Sublot {
    pub id: Uuid,
    pub lot_id: Uuid,
    #[validate(length(min = 3, max = 64, message = "Reference number is required"))]
    pub reference_number: String,
    pub quantity: Option<f64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Default for Lot {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            reference_number: String::new(),
            status: LotStatus::AwaitingResults,
            lot_type: LotType::Standard,
            generate_coa: true,
            has_pending_retest: false,
            rejection_reason: None,
            override_reason: None,
            mfg_date: None,
            exp_date: None,
            product_ids: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Lot {
    /// Creates a new lot in its initial workflow state
    pub fn new(reference_number: impl Into<String>, lot_type: LotType, product_ids: Vec<Uuid>) -> Self {
        Self {
            reference_number: reference_number.into(),
            lot_type,
            product_ids,
            ..Self::default()
        }
    }

    pub fn attach_product(&mut self, product_id: Uuid) {
        if !self.product_ids.contains(&product_id) {
            self.product_ids.push(product_id);
            self.updated_at = Utc::now();
        }
    }
}

impl Sublot {
    pub fn new(lot_id: Uuid, reference_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            lot_id,
            reference_number: reference_number.into(),
            quantity: None,
            notes: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lot_transitions() {
        assert!(LotStatus::AwaitingResults.can_transition_to(LotStatus::PartialResults));
        assert!(LotStatus::PartialResults.can_transition_to(LotStatus::UnderReview));
        assert!(LotStatus::UnderReview.can_transition_to(LotStatus::AwaitingRelease));
        assert!(LotStatus::AwaitingRelease.can_transition_to(LotStatus::Approved));
        assert!(LotStatus::Approved.can_transition_to(LotStatus::Released));
        assert!(!LotStatus::Released.can_transition_to(LotStatus::UnderReview));
    }

    #[test]
    fn test_rejected_reopens_only_to_awaiting_results() {
        assert!(LotStatus::Rejected.can_transition_to(LotStatus::AwaitingResults));
        assert!(!LotStatus::Rejected.can_transition_to(LotStatus::UnderReview));
        assert!(!LotStatus::Rejected.can_transition_to(LotStatus::Approved));
    }

    #[test]
    fn test_illegal_shortcuts() {
        assert!(!LotStatus::AwaitingResults.can_transition_to(LotStatus::Approved));
        assert!(!LotStatus::AwaitingResults.can_transition_to(LotStatus::Released));
        assert!(!LotStatus::PartialResults.can_transition_to(LotStatus::AwaitingRelease));
        assert!(!LotStatus::NeedsAttention.can_transition_to(LotStatus::UnderReview));
    }

    #[test]
    fn test_decided_statuses() {
        assert!(LotStatus::Approved.is_decided());
        assert!(LotStatus::Released.is_decided());
        assert!(LotStatus::Rejected.is_decided());
        assert!(!LotStatus::UnderReview.is_decided());
        assert!(!LotStatus::AwaitingRelease.is_decided());
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            LotStatus::AwaitingResults,
            LotStatus::PartialResults,
            LotStatus::NeedsAttention,
            LotStatus::UnderReview,
            LotStatus::AwaitingRelease,
            LotStatus::Approved,
            LotStatus::Released,
            LotStatus::Rejected,
        ] {
            assert_eq!(LotStatus::from_str(&status.to_string()), Some(status));
        }
    }

    #[test]
    fn test_new_lot_initial_state() {
        let lot = Lot::new("FLK-2024-0042", LotType::Standard, vec![Uuid::new_v4()]);
        assert_eq!(lot.status, LotStatus::AwaitingResults);
        assert!(!lot.has_pending_retest);
        assert!(lot.rejection_reason.is_none());
    }

    #[test]
    fn test_attach_product_deduplicates() {
        let product_id = Uuid::new_v4();
        let mut lot = Lot::new("FLK-2024-0042", LotType::Composite, vec![product_id]);
        lot.attach_product(product_id);
        assert_eq!(lot.product_ids.len(), 1);
    }
}
