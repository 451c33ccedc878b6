//! Result approval workflow.
//!
//! Approval is per result, gated by an [`ApprovalPolicy`]. Every applied
//! approval triggers a recompute of the owning lot; rejection deliberately
//! does not, so a single rejection cannot silently demote a lot that QC has
//! already moved past review. Bulk approval is best-effort per id and
//! recomputes each affected lot once at the end.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use certa_models::{AuditAction, AuditChange, TestResult};
use certa_utils::{CertaError, CertaResult};

use crate::completeness::CompletenessEvaluator;
use crate::matching::SpecificationMatcher;
use crate::state_machine::LotStateMachine;
use crate::store::{record_audit, ApprovalPolicy, AuditSink, LifecycleStore};

/// Outcome of [`ApprovalWorkflow::bulk_approve`]; never an error for
/// individual ids, those land in `skipped`
#[derive(Debug, Clone, Serialize)]
pub struct BulkApprovalOutcome {
    pub approved: Vec<TestResult>,
    pub skipped: Vec<BulkApprovalFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkApprovalFailure {
    pub result_id: Uuid,
    pub error: String,
}

/// Read-only pre-flight for promoting a lot past review
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalReadiness {
    pub can_approve: bool,
    /// Blocking problems, sorted
    pub issues: Vec<String>,
    /// Non-blocking observations, sorted
    pub warnings: Vec<String>,
}

pub struct ApprovalWorkflow {
    store: Arc<dyn LifecycleStore>,
    audit: Arc<dyn AuditSink>,
    policy: Arc<dyn ApprovalPolicy>,
    state_machine: Arc<LotStateMachine>,
}

impl ApprovalWorkflow {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        audit: Arc<dyn AuditSink>,
        policy: Arc<dyn ApprovalPolicy>,
        state_machine: Arc<LotStateMachine>,
    ) -> Self {
        Self {
            store,
            audit,
            policy,
            state_machine,
        }
    }

    /// Approves one result and recomputes the owning lot
    pub async fn approve(&self, result_id: Uuid, approver: &str) -> CertaResult<TestResult> {
        self.ensure_can_approve(approver).await?;
        let result = self.approve_inner(result_id, approver).await?;
        self.state_machine.auto_recompute(result.lot_id).await?;
        Ok(result)
    }

    /// Reverts a result to draft.
    ///
    /// The rejection note is prepended to any existing notes, never
    /// replacing them. The owning lot is left alone; downgrading a reviewed
    /// lot is an explicit QC follow-up, not a side effect.
    pub async fn reject(
        &self,
        result_id: Uuid,
        rejector: &str,
        reason: &str,
    ) -> CertaResult<TestResult> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CertaError::validation(
                "reason",
                "rejecting a result requires a reason",
            ));
        }

        let mut result = self.store.fetch_result(result_id).await?;
        let old_status = result.status;
        let old_approver = result.approved_by.clone();

        result.revert_to_draft();
        let note = format!("[Rejected] {reason}");
        result.notes = Some(match result.notes.take() {
            Some(existing) => format!("{note}\n{existing}"),
            None => note,
        });
        self.store.update_result(&result).await?;

        tracing::info!(result = %result.test_name, lot_id = %result.lot_id, rejector, "test result rejected");
        record_audit(
            self.audit.as_ref(),
            AuditChange::new("test_results", result.id, AuditAction::Reject)
                .with_old(serde_json::json!({
                    "status": old_status.to_string(),
                    "approved_by": old_approver,
                }))
                .with_new(serde_json::json!({ "status": result.status.to_string() }))
                .with_actor(rejector)
                .with_reason(reason),
        )
        .await;

        Ok(result)
    }

    /// Approves each id independently. A failing id is logged and skipped;
    /// the call itself only fails when the approver lacks the capability.
    /// Affected lots are recomputed once each, after the loop.
    pub async fn bulk_approve(
        &self,
        result_ids: &[Uuid],
        approver: &str,
    ) -> CertaResult<BulkApprovalOutcome> {
        self.ensure_can_approve(approver).await?;

        let mut approved = Vec::new();
        let mut skipped = Vec::new();
        let mut affected_lots: BTreeSet<Uuid> = BTreeSet::new();

        for &result_id in result_ids {
            match self.approve_inner(result_id, approver).await {
                Ok(result) => {
                    affected_lots.insert(result.lot_id);
                    approved.push(result);
                }
                Err(err) => {
                    tracing::warn!(%result_id, error = %err, "bulk approval skipped a result");
                    skipped.push(BulkApprovalFailure {
                        result_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        for lot_id in affected_lots {
            // Approvals above already stand; a recompute failure must not
            // turn them into an error
            if let Err(err) = self.state_machine.auto_recompute(lot_id).await {
                tracing::error!(%lot_id, error = %err, "lot recompute failed after bulk approval");
            }
        }

        Ok(BulkApprovalOutcome { approved, skipped })
    }

    /// Pre-flight check for releasing a lot. Combines completeness, value
    /// matching, and per-result approval state without mutating anything.
    pub async fn validate_for_approval(&self, lot_id: Uuid) -> CertaResult<ApprovalReadiness> {
        let lot = self.store.fetch_lot(lot_id).await?;
        let results = self.store.results_for_lot(lot_id).await?;
        let specifications = self.store.specifications_for_lot(lot_id).await?;

        let report = CompletenessEvaluator::evaluate(&specifications, &results);

        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        for name in &report.missing_required {
            issues.push(format!("required test {name} has no recorded value"));
        }

        for spec in &specifications {
            for result in results
                .iter()
                .filter(|r| r.has_value() && r.test_name.trim() == spec.test_name.trim())
            {
                if !SpecificationMatcher::matches(&spec.specification, &result.value) {
                    let line = format!(
                        "test {} value {} fails specification {}",
                        spec.test_name.trim(),
                        result.value.trim(),
                        spec.specification.trim()
                    );
                    if spec.is_required {
                        issues.push(line);
                    } else {
                        warnings.push(line);
                    }
                }
            }
        }

        for result in results.iter().filter(|r| !r.is_approved()) {
            issues.push(format!("result {} is not approved", result.test_name.trim()));
        }

        if lot.has_pending_retest {
            warnings.push("lot has an open retest request".to_string());
        }

        issues.sort();
        issues.dedup();
        warnings.sort();
        warnings.dedup();

        Ok(ApprovalReadiness {
            can_approve: issues.is_empty(),
            issues,
            warnings,
        })
    }

    async fn ensure_can_approve(&self, actor: &str) -> CertaResult<()> {
        if self.policy.can_approve(actor).await? {
            Ok(())
        } else {
            Err(CertaError::permission(format!(
                "{actor} does not have the approval capability"
            )))
        }
    }

    async fn approve_inner(&self, result_id: Uuid, approver: &str) -> CertaResult<TestResult> {
        let mut result = self.store.fetch_result(result_id).await?;
        if result.is_approved() {
            return Err(CertaError::validation(
                "status",
                format!("result {} is already approved", result.test_name),
            ));
        }

        result.mark_approved(approver);
        self.store.update_result(&result).await?;

        tracing::info!(result = %result.test_name, lot_id = %result.lot_id, approver, "test result approved");
        record_audit(
            self.audit.as_ref(),
            AuditChange::new("test_results", result.id, AuditAction::Approve)
                .with_old(serde_json::json!({ "status": "draft" }))
                .with_new(serde_json::json!({
                    "status": result.status.to_string(),
                    "approved_by": approver,
                }))
                .with_actor(approver),
        )
        .await;

        Ok(result)
    }
}
