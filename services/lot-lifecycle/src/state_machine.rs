//! Lot state machine.
//!
//! Two entry points mutate a lot's status. `update_status` applies a manual
//! QC decision and enforces the legal-edge table on [`LotStatus`].
//! `auto_recompute` derives the working status from recorded results after
//! any result mutation; it bypasses the edge table because derived statuses
//! may legitimately move backwards (a deleted result can demote a reviewed
//! lot), and it never enters or leaves a decided status.
//!
//! Both paths serialize per lot through [`LotLockRegistry`], write exactly
//! one audit entry per applied change, and write none for no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use certa_models::{AuditAction, AuditChange, Lot, LotStatus};
use certa_utils::{CertaError, CertaResult};

use crate::completeness::CompletenessEvaluator;
use crate::matching::SpecificationMatcher;
use crate::store::{record_audit, AuditSink, LifecycleStore};

/// Prefix stored with a QC override reason so audits can find overrides
pub const OVERRIDE_PREFIX: &str = "[QC Override] ";

/// One mutex per lot id. Workflow steps that read a lot, decide, and write
/// it back hold the lot's mutex for the whole step, so interleaved calls
/// against the same lot cannot lose updates. Locks for different lots are
/// independent.
#[derive(Default)]
pub struct LotLockRegistry {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl LotLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until this lot's critical section is free. Guards must not be
    /// held across a call that acquires the same lot again.
    pub async fn acquire(&self, lot_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(lot_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct LotStateMachine {
    store: Arc<dyn LifecycleStore>,
    audit: Arc<dyn AuditSink>,
    locks: Arc<LotLockRegistry>,
}

impl LotStateMachine {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        audit: Arc<dyn AuditSink>,
        locks: Arc<LotLockRegistry>,
    ) -> Self {
        Self { store, audit, locks }
    }

    /// Applies a manual status change.
    ///
    /// Illegal edges are rejected. Moving into `Approved` requires every
    /// recorded result to be approved. Moving `NeedsAttention -> Approved`
    /// is additionally an override and requires a reason, which is stored
    /// on the lot prefixed with [`OVERRIDE_PREFIX`]. Moving into `Rejected`
    /// stores the optional reason; reopening a rejected lot clears it.
    pub async fn update_status(
        &self,
        lot_id: Uuid,
        target: LotStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> CertaResult<Lot> {
        let _guard = self.locks.acquire(lot_id).await;

        let mut lot = self.store.fetch_lot(lot_id).await?;
        let current = lot.status;

        if !current.can_transition_to(target) {
            return Err(CertaError::validation(
                "status",
                format!(
                    "lot {} cannot move from {} to {}",
                    lot.reference_number, current, target
                ),
            ));
        }

        if target == LotStatus::Approved {
            let results = self.store.results_for_lot(lot_id).await?;
            if let Some(unapproved) = results.iter().find(|r| !r.is_approved()) {
                return Err(CertaError::validation(
                    "results",
                    format!(
                        "lot {} has unapproved results ({}), approve them first",
                        lot.reference_number, unapproved.test_name
                    ),
                ));
            }
        }

        let is_override = current == LotStatus::NeedsAttention && target == LotStatus::Approved;
        let audit_reason = if is_override {
            let reason = reason.map(str::trim).filter(|r| !r.is_empty()).ok_or_else(|| {
                CertaError::validation(
                    "override_reason",
                    "approving a lot that needs attention requires an override reason",
                )
            })?;
            let stored = format!("{OVERRIDE_PREFIX}{reason}");
            lot.override_reason = Some(stored.clone());
            stored
        } else {
            reason
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or("manual status change")
                .to_string()
        };

        if target == LotStatus::Rejected {
            lot.rejection_reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        }
        if current == LotStatus::Rejected {
            lot.rejection_reason = None;
        }

        lot.status = target;
        lot.updated_at = chrono::Utc::now();
        self.store.update_lot(&lot).await?;

        tracing::info!(
            lot = %lot.reference_number,
            from = %current,
            to = %target,
            actor,
            "lot status changed"
        );
        record_audit(
            self.audit.as_ref(),
            AuditChange::new("lots", lot.id, AuditAction::StatusChange)
                .with_old(serde_json::json!({ "status": current.to_string() }))
                .with_new(serde_json::json!({ "status": target.to_string() }))
                .with_actor(actor)
                .with_reason(audit_reason),
        )
        .await;

        Ok(lot)
    }

    /// Re-derives the working status from the lot's current results.
    ///
    /// Decided statuses are sticky: once a lot is approved, released, or
    /// rejected, recomputation never touches it. Otherwise the status
    /// becomes `AwaitingResults` (no results), `PartialResults` (required
    /// results missing), `UnderReview` (complete, required values pass), or
    /// `NeedsAttention` (complete, a required value fails). An unchanged
    /// outcome writes nothing, including no audit entry.
    pub async fn auto_recompute(&self, lot_id: Uuid) -> CertaResult<Lot> {
        let _guard = self.locks.acquire(lot_id).await;

        let mut lot = self.store.fetch_lot(lot_id).await?;
        if lot.status.is_decided() {
            tracing::debug!(lot = %lot.reference_number, status = %lot.status, "recompute skipped, status is decided");
            return Ok(lot);
        }

        let results = self.store.results_for_lot(lot_id).await?;
        let specifications = self.store.specifications_for_lot(lot_id).await?;
        let report = CompletenessEvaluator::evaluate(&specifications, &results);

        let next = if !report.is_complete || results.is_empty() {
            report.recommendation
        } else if required_results_pass(&specifications, &results) {
            LotStatus::UnderReview
        } else {
            LotStatus::NeedsAttention
        };

        if next == lot.status {
            tracing::debug!(lot = %lot.reference_number, status = %next, "recompute produced no change");
            return Ok(lot);
        }

        let previous = lot.status;
        lot.status = next;
        lot.updated_at = chrono::Utc::now();
        self.store.update_lot(&lot).await?;

        tracing::info!(lot = %lot.reference_number, from = %previous, to = %next, "lot status recomputed");
        record_audit(
            self.audit.as_ref(),
            AuditChange::new("lots", lot.id, AuditAction::StatusChange)
                .with_old(serde_json::json!({ "status": previous.to_string() }))
                .with_new(serde_json::json!({ "status": next.to_string() }))
                .with_reason("automatic status recomputation"),
        )
        .await;

        Ok(lot)
    }
}

/// True when every required specification row is satisfied by every
/// recorded value for its test. Duplicate results for one test must all
/// pass; a single failing repeat is enough to flag the lot.
fn required_results_pass(
    specifications: &[certa_models::ProductTestSpecification],
    results: &[certa_models::TestResult],
) -> bool {
    specifications
        .iter()
        .filter(|spec| spec.is_required)
        .all(|spec| {
            results
                .iter()
                .filter(|r| r.has_value() && r.test_name.trim() == spec.test_name.trim())
                .all(|r| SpecificationMatcher::matches(&spec.specification, &r.value))
        })
}
