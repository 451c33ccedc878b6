//! Retest workflow.
//!
//! A retest request freezes the current values of a chosen set of results
//! and waits for the lab to re-enter them. Comparison is always against the
//! frozen snapshot: a re-entered value that differs counts as re-measured,
//! a re-entered value equal to its snapshot is suspicious and asks for
//! human confirmation. The owning lot carries a `has_pending_retest` flag
//! kept in sync with the open requests.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use certa_models::{AuditAction, AuditChange, LotStatus, RetestItem, RetestRequest, RetestStatus};
use certa_utils::{CertaError, CertaResult};

use crate::state_machine::LotLockRegistry;
use crate::store::{record_audit, ApprovalPolicy, AuditSink, LifecycleStore};

pub struct RetestWorkflow {
    store: Arc<dyn LifecycleStore>,
    audit: Arc<dyn AuditSink>,
    policy: Arc<dyn ApprovalPolicy>,
    locks: Arc<LotLockRegistry>,
}

impl RetestWorkflow {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        audit: Arc<dyn AuditSink>,
        policy: Arc<dyn ApprovalPolicy>,
        locks: Arc<LotLockRegistry>,
    ) -> Self {
        Self {
            store,
            audit,
            policy,
            locks,
        }
    }

    /// Reference for the next request of a lot: the lot reference plus a
    /// per-lot `-R{n}` suffix, counting from 1
    pub fn generate_reference(lot_reference: &str, existing_count: u32) -> String {
        format!("{lot_reference}-R{}", existing_count + 1)
    }

    /// Opens a retest over a subset of a lot's results.
    ///
    /// Every id must belong to the lot. Each item snapshots the result's
    /// value as of now; the snapshot is never recomputed. The lot's
    /// pending flag is raised and a `NeedsAttention` lot is demoted to
    /// `PartialResults` since its failing values are being re-entered.
    /// Request, items, and lot are persisted atomically.
    pub async fn create_retest(
        &self,
        lot_id: Uuid,
        result_ids: &[Uuid],
        reason: &str,
        requester: &str,
    ) -> CertaResult<RetestRequest> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CertaError::validation(
                "reason",
                "a retest request requires a reason",
            ));
        }
        if result_ids.is_empty() {
            return Err(CertaError::validation(
                "test_result_ids",
                "a retest request needs at least one result",
            ));
        }

        let _guard = self.locks.acquire(lot_id).await;
        let mut lot = self.store.fetch_lot(lot_id).await?;

        let mut seen = HashSet::new();
        let mut snapshots = Vec::new();
        for &result_id in result_ids {
            if !seen.insert(result_id) {
                continue;
            }
            let result = self.store.fetch_result(result_id).await?;
            if result.lot_id != lot_id {
                return Err(CertaError::validation(
                    "test_result_ids",
                    format!(
                        "result {} does not belong to lot {}",
                        result_id, lot.reference_number
                    ),
                ));
            }
            snapshots.push(result);
        }

        let existing = self.store.count_retests_for_lot(lot_id).await?;
        let reference = Self::generate_reference(&lot.reference_number, existing);
        let request = RetestRequest::new(lot_id, &reference, reason, requester);
        let items: Vec<RetestItem> = snapshots
            .iter()
            .map(|r| RetestItem::new(request.id, r.id, r.value.clone()))
            .collect();

        lot.has_pending_retest = true;
        let previous_status = lot.status;
        if lot.status == LotStatus::NeedsAttention {
            lot.status = LotStatus::PartialResults;
        }
        lot.updated_at = chrono::Utc::now();

        self.store.create_retest(&request, &items, &lot).await?;

        tracing::info!(
            retest = %reference,
            lot = %lot.reference_number,
            items = items.len(),
            requester,
            "retest request created"
        );
        record_audit(
            self.audit.as_ref(),
            AuditChange::new("retest_requests", request.id, AuditAction::Create)
                .with_new(serde_json::json!({
                    "reference": reference,
                    "test_result_ids": snapshots.iter().map(|r| r.id).collect::<Vec<_>>(),
                    "lot_status": lot.status.to_string(),
                    "previous_lot_status": previous_status.to_string(),
                }))
                .with_actor(requester)
                .with_reason(reason),
        )
        .await;

        Ok(request)
    }

    /// Reacts to a result value change by advancing every pending request
    /// that snapshots this result.
    ///
    /// All items of each such request are re-examined against their
    /// snapshots. Every item changed: the request completes. The updated
    /// item unchanged while every other item changed: the request needs
    /// review. Anything else leaves it pending. A result deleted since the
    /// snapshot counts as changed. The lot's pending flag is refreshed
    /// afterwards.
    pub async fn on_result_updated(&self, result_id: Uuid) -> CertaResult<()> {
        let result = self.store.fetch_result(result_id).await?;
        let lot_id = result.lot_id;

        let _guard = self.locks.acquire(lot_id).await;

        let pending = self.store.pending_retests_for_result(result_id).await?;
        for mut request in pending {
            let items = self.store.items_for_retest(request.id).await?;
            let Some(updated_item) = items.iter().find(|i| i.test_result_id == result_id) else {
                continue;
            };

            let mut all_differ = true;
            let mut others_differ = true;
            for item in &items {
                let differs = self.item_differs(item).await?;
                if !differs {
                    all_differ = false;
                    if item.test_result_id != result_id {
                        others_differ = false;
                    }
                }
            }
            let updated_unchanged = !self.item_differs(updated_item).await?;

            if all_differ {
                request.mark_completed();
                self.store.update_retest(&request).await?;
                tracing::info!(retest = %request.reference, "retest completed, all items re-measured");
                record_audit(
                    self.audit.as_ref(),
                    AuditChange::new("retest_requests", request.id, AuditAction::Update)
                        .with_old(serde_json::json!({ "status": "pending" }))
                        .with_new(serde_json::json!({ "status": request.status.to_string() }))
                        .with_reason("all items re-measured"),
                )
                .await;
            } else if updated_unchanged && others_differ {
                request.status = RetestStatus::ReviewRequired;
                self.store.update_retest(&request).await?;
                tracing::info!(retest = %request.reference, "retest flagged, re-entered value matches its snapshot");
                record_audit(
                    self.audit.as_ref(),
                    AuditChange::new("retest_requests", request.id, AuditAction::Update)
                        .with_old(serde_json::json!({ "status": "pending" }))
                        .with_new(serde_json::json!({ "status": request.status.to_string() }))
                        .with_reason("re-entered value matches original snapshot"),
                )
                .await;
            }
        }

        self.refresh_pending_flag(lot_id).await
    }

    /// Forces a request to `Completed` regardless of snapshot comparison.
    /// Requires the approval capability.
    pub async fn complete_retest(&self, retest_id: Uuid, approver: &str) -> CertaResult<RetestRequest> {
        if !self.policy.can_approve(approver).await? {
            return Err(CertaError::permission(format!(
                "{approver} does not have the approval capability"
            )));
        }

        let request = self.store.fetch_retest(retest_id).await?;
        let _guard = self.locks.acquire(request.lot_id).await;

        let mut request = self.store.fetch_retest(retest_id).await?;
        if request.status == RetestStatus::Completed {
            return Err(CertaError::validation(
                "status",
                format!("retest {} is already completed", request.reference),
            ));
        }

        let previous = request.status;
        request.mark_completed();
        self.store.update_retest(&request).await?;

        tracing::info!(retest = %request.reference, approver, "retest completed manually");
        record_audit(
            self.audit.as_ref(),
            AuditChange::new("retest_requests", request.id, AuditAction::Update)
                .with_old(serde_json::json!({ "status": previous.to_string() }))
                .with_new(serde_json::json!({ "status": request.status.to_string() }))
                .with_actor(approver)
                .with_reason("manually completed"),
        )
        .await;

        self.refresh_pending_flag(request.lot_id).await?;
        Ok(request)
    }

    /// Does the item's current value differ from its snapshot? Deleted
    /// results count as differing.
    async fn item_differs(&self, item: &RetestItem) -> CertaResult<bool> {
        match self.store.fetch_result(item.test_result_id).await {
            Ok(result) => Ok(result.value.trim() != item.original_value.trim()),
            Err(CertaError::NotFound { .. }) => Ok(true),
            Err(err) => Err(err),
        }
    }

    /// Recomputes `has_pending_retest` from the lot's requests and writes
    /// the lot only when the flag actually flips. Callers hold the lot lock.
    async fn refresh_pending_flag(&self, lot_id: Uuid) -> CertaResult<()> {
        let requests = self.store.retests_for_lot(lot_id).await?;
        let open = requests.iter().any(|r| r.status.is_open());

        let mut lot = self.store.fetch_lot(lot_id).await?;
        if lot.has_pending_retest == open {
            return Ok(());
        }

        lot.has_pending_retest = open;
        lot.updated_at = chrono::Utc::now();
        self.store.update_lot(&lot).await?;

        record_audit(
            self.audit.as_ref(),
            AuditChange::new("lots", lot.id, AuditAction::Update)
                .with_old(serde_json::json!({ "has_pending_retest": !open }))
                .with_new(serde_json::json!({ "has_pending_retest": open }))
                .with_reason("retest activity"),
        )
        .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, StaticApprovalPolicy};
    use certa_models::{Lot, LotType, TestResult};

    fn workflow(store: &InMemoryStore) -> RetestWorkflow {
        let shared: Arc<InMemoryStore> = Arc::new(store.clone());
        RetestWorkflow::new(
            shared.clone(),
            shared,
            Arc::new(StaticApprovalPolicy::new(["qc.lead"])),
            Arc::new(LotLockRegistry::new()),
        )
    }

    fn seeded_lot(store: &InMemoryStore, status: LotStatus) -> Lot {
        let mut lot = Lot::new("FLK-2024-0042", LotType::Standard, vec![Uuid::new_v4()]);
        lot.status = status;
        store.seed_lot(lot.clone());
        lot
    }

    #[test]
    fn test_reference_sequence_counts_from_one() {
        assert_eq!(RetestWorkflow::generate_reference("FLK-2024-0042", 0), "FLK-2024-0042-R1");
        assert_eq!(RetestWorkflow::generate_reference("FLK-2024-0042", 2), "FLK-2024-0042-R3");
    }

    #[tokio::test]
    async fn test_create_validates_membership_and_reason() {
        let store = InMemoryStore::new();
        let lot = seeded_lot(&store, LotStatus::UnderReview);
        let other_lot = seeded_lot(&store, LotStatus::UnderReview);
        let foreign = TestResult::new(other_lot.id, "TPC", "100");
        store.seed_result(foreign.clone());
        let workflow = workflow(&store);

        let err = workflow
            .create_retest(lot.id, &[foreign.id], "disputed", "qc.lead")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = workflow
            .create_retest(lot.id, &[], "disputed", "qc.lead")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let own = TestResult::new(lot.id, "TPC", "100");
        store.seed_result(own.clone());
        let err = workflow
            .create_retest(lot.id, &[own.id], "   ", "qc.lead")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_create_snapshots_values_and_demotes_needs_attention() {
        let store = InMemoryStore::new();
        let lot = seeded_lot(&store, LotStatus::NeedsAttention);
        let result = TestResult::new(lot.id, "TPC", "50000");
        store.seed_result(result.clone());
        let workflow = workflow(&store);

        let request = workflow
            .create_retest(lot.id, &[result.id, result.id], "out of limit", "qc.lead")
            .await
            .unwrap();
        assert_eq!(request.reference, "FLK-2024-0042-R1");
        assert_eq!(request.status, RetestStatus::Pending);

        let items = store.items_for_retest(request.id).await.unwrap();
        assert_eq!(items.len(), 1, "duplicate ids collapse to one item");
        assert_eq!(items[0].original_value, "50000");

        let lot_after = store.fetch_lot(lot.id).await.unwrap();
        assert!(lot_after.has_pending_retest);
        assert_eq!(lot_after.status, LotStatus::PartialResults);
    }

    #[tokio::test]
    async fn test_references_increment_per_lot() {
        let store = InMemoryStore::new();
        let lot = seeded_lot(&store, LotStatus::UnderReview);
        let result = TestResult::new(lot.id, "TPC", "100");
        store.seed_result(result.clone());
        let workflow = workflow(&store);

        let first = workflow
            .create_retest(lot.id, &[result.id], "first pass disputed", "qc.lead")
            .await
            .unwrap();
        let second = workflow
            .create_retest(lot.id, &[result.id], "second pass disputed", "qc.lead")
            .await
            .unwrap();
        assert_eq!(first.reference, "FLK-2024-0042-R1");
        assert_eq!(second.reference, "FLK-2024-0042-R2");
    }

    #[tokio::test]
    async fn test_changed_value_completes_request() {
        let store = InMemoryStore::new();
        let lot = seeded_lot(&store, LotStatus::UnderReview);
        let mut result = TestResult::new(lot.id, "TPC", "50000");
        store.seed_result(result.clone());
        let workflow = workflow(&store);

        let request = workflow
            .create_retest(lot.id, &[result.id], "out of limit", "qc.lead")
            .await
            .unwrap();

        result.value = "5000".to_string();
        store.seed_result(result.clone());
        workflow.on_result_updated(result.id).await.unwrap();

        let after = store.fetch_retest(request.id).await.unwrap();
        assert_eq!(after.status, RetestStatus::Completed);
        assert!(after.completed_at.is_some());

        let lot_after = store.fetch_lot(lot.id).await.unwrap();
        assert!(!lot_after.has_pending_retest);
    }

    #[tokio::test]
    async fn test_unchanged_value_requires_review() {
        let store = InMemoryStore::new();
        let lot = seeded_lot(&store, LotStatus::UnderReview);
        let mut result = TestResult::new(lot.id, "TPC", "50000");
        store.seed_result(result.clone());
        let workflow = workflow(&store);

        let request = workflow
            .create_retest(lot.id, &[result.id], "out of limit", "qc.lead")
            .await
            .unwrap();

        // Re-entered, but identical to the snapshot
        result.value = "50000".to_string();
        store.seed_result(result.clone());
        workflow.on_result_updated(result.id).await.unwrap();

        let after = store.fetch_retest(request.id).await.unwrap();
        assert_eq!(after.status, RetestStatus::ReviewRequired);
        assert!(after.completed_at.is_none());

        let lot_after = store.fetch_lot(lot.id).await.unwrap();
        assert!(lot_after.has_pending_retest, "review still keeps the flag up");
    }

    #[tokio::test]
    async fn test_partially_re_measured_request_stays_pending() {
        let store = InMemoryStore::new();
        let lot = seeded_lot(&store, LotStatus::UnderReview);
        let mut first = TestResult::new(lot.id, "TPC", "50000");
        let second = TestResult::new(lot.id, "Lead", "0.9");
        store.seed_result(first.clone());
        store.seed_result(second.clone());
        let workflow = workflow(&store);

        let request = workflow
            .create_retest(lot.id, &[first.id, second.id], "both disputed", "qc.lead")
            .await
            .unwrap();

        first.value = "4000".to_string();
        store.seed_result(first.clone());
        workflow.on_result_updated(first.id).await.unwrap();

        let after = store.fetch_retest(request.id).await.unwrap();
        assert_eq!(after.status, RetestStatus::Pending);
    }

    #[tokio::test]
    async fn test_complete_retest_forces_completed() {
        let store = InMemoryStore::new();
        let lot = seeded_lot(&store, LotStatus::UnderReview);
        let result = TestResult::new(lot.id, "TPC", "50000");
        store.seed_result(result.clone());
        let workflow = workflow(&store);

        let request = workflow
            .create_retest(lot.id, &[result.id], "out of limit", "qc.lead")
            .await
            .unwrap();

        let err = workflow.complete_retest(request.id, "intern").await.unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");

        let completed = workflow.complete_retest(request.id, "qc.lead").await.unwrap();
        assert_eq!(completed.status, RetestStatus::Completed);

        let err = workflow.complete_retest(request.id, "qc.lead").await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let lot_after = store.fetch_lot(lot.id).await.unwrap();
        assert!(!lot_after.has_pending_retest);
    }
}
