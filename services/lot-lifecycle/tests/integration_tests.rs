//! Certa Lifecycle Integration Tests
//!
//! End-to-end flows through the engine facade over the in-memory store:
//! intake, compliance evaluation, approval, release, and retesting.

use std::sync::Arc;

use uuid::Uuid;

use certa_lot_lifecycle::{InMemoryStore, LifecycleEngine, StaticApprovalPolicy};
use certa_models::{AuditAction, Lot, LotStatus, LotType, ProductTestSpecification, RetestStatus};

struct TestHarness {
    store: InMemoryStore,
    engine: LifecycleEngine,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryStore::new();
        let shared: Arc<InMemoryStore> = Arc::new(store.clone());
        let engine = LifecycleEngine::new(
            shared.clone(),
            shared,
            Arc::new(StaticApprovalPolicy::new(["qc.lead", "qc.manager"])),
        );
        Self { store, engine }
    }

    /// Seeds one standard lot whose product carries the given
    /// (test_name, specification, is_required) rows
    fn seed_lot(&self, reference: &str, specs: &[(&str, &str, bool)]) -> Lot {
        let product_id = Uuid::new_v4();
        let lot = Lot::new(reference, LotType::Standard, vec![product_id]);
        self.store.seed_lot(lot.clone());
        for (name, spec, required) in specs {
            self.store.seed_specification(ProductTestSpecification::new(
                product_id, *name, *spec, *required,
            ));
        }
        lot
    }
}

#[tokio::test]
async fn test_results_drive_lot_status_through_intake() {
    let harness = TestHarness::new();
    let lot = harness.seed_lot(
        "FLK-2024-0042",
        &[("TPC", "< 10000", true), ("Lead", "< 0.5", true)],
    );

    // One of two required tests
    harness
        .engine
        .record_result(lot.id, "TPC", "4500", None, None, "lab.tech")
        .await
        .unwrap();
    assert_eq!(
        harness.engine.lot(lot.id).await.unwrap().status,
        LotStatus::PartialResults
    );

    // Second required test fails its limit
    let lead = harness
        .engine
        .record_result(lot.id, "Lead", "0.9", None, None, "lab.tech")
        .await
        .unwrap();
    assert_eq!(
        harness.engine.lot(lot.id).await.unwrap().status,
        LotStatus::NeedsAttention
    );

    // Corrected value brings the lot into review
    harness
        .engine
        .update_result_value(lead.id, "0.2", "lab.tech")
        .await
        .unwrap();
    assert_eq!(
        harness.engine.lot(lot.id).await.unwrap().status,
        LotStatus::UnderReview
    );

    // Deleting a required result demotes again
    harness
        .engine
        .delete_result(lead.id, "lab.tech", Some("wrong sample"))
        .await
        .unwrap();
    assert_eq!(
        harness.engine.lot(lot.id).await.unwrap().status,
        LotStatus::PartialResults
    );
}

#[tokio::test]
async fn test_full_release_flow() {
    let harness = TestHarness::new();
    let lot = harness.seed_lot("FLK-2024-0042", &[("TPC", "< 10000", true)]);

    let result = harness
        .engine
        .record_result(lot.id, "TPC", "4500", None, None, "lab.tech")
        .await
        .unwrap();
    harness.engine.approve_result(result.id, "qc.lead").await.unwrap();

    let readiness = harness.engine.validate_for_approval(lot.id).await.unwrap();
    assert!(readiness.can_approve, "issues: {:?}", readiness.issues);

    harness
        .engine
        .update_lot_status(lot.id, LotStatus::AwaitingRelease, "qc.lead", None)
        .await
        .unwrap();
    harness
        .engine
        .update_lot_status(lot.id, LotStatus::Approved, "qc.manager", None)
        .await
        .unwrap();
    let released = harness
        .engine
        .update_lot_status(lot.id, LotStatus::Released, "qc.manager", None)
        .await
        .unwrap();
    assert_eq!(released.status, LotStatus::Released);

    // Released is terminal
    let err = harness
        .engine
        .update_lot_status(lot.id, LotStatus::UnderReview, "qc.manager", None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    // New results no longer move the lot
    harness
        .engine
        .record_result(lot.id, "TPC", "99999", None, None, "lab.tech")
        .await
        .unwrap();
    assert_eq!(
        harness.engine.lot(lot.id).await.unwrap().status,
        LotStatus::Released
    );
}

#[tokio::test]
async fn test_override_approval_from_needs_attention() {
    let harness = TestHarness::new();
    let lot = harness.seed_lot("FLK-2024-0042", &[("TPC", "< 10000", true)]);

    let result = harness
        .engine
        .record_result(lot.id, "TPC", "15000", None, None, "lab.tech")
        .await
        .unwrap();
    assert_eq!(
        harness.engine.lot(lot.id).await.unwrap().status,
        LotStatus::NeedsAttention
    );
    harness.engine.approve_result(result.id, "qc.lead").await.unwrap();

    let err = harness
        .engine
        .update_lot_status(lot.id, LotStatus::Approved, "qc.lead", None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    let approved = harness
        .engine
        .update_lot_status(
            lot.id,
            LotStatus::Approved,
            "qc.lead",
            Some("confirmed by retest"),
        )
        .await
        .unwrap();
    assert_eq!(approved.status, LotStatus::Approved);
    assert_eq!(
        approved.override_reason.as_deref(),
        Some("[QC Override] confirmed by retest")
    );
}

#[tokio::test]
async fn test_rejected_lot_reopens_to_awaiting_results() {
    let harness = TestHarness::new();
    let lot = harness.seed_lot("FLK-2024-0042", &[("TPC", "< 10000", true)]);

    harness
        .engine
        .update_lot_status(lot.id, LotStatus::Rejected, "qc.lead", Some("contaminated sample"))
        .await
        .unwrap();
    let rejected = harness.engine.lot(lot.id).await.unwrap();
    assert_eq!(rejected.status, LotStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("contaminated sample"));

    // Sticky while rejected
    harness
        .engine
        .record_result(lot.id, "TPC", "4500", None, None, "lab.tech")
        .await
        .unwrap();
    assert_eq!(
        harness.engine.lot(lot.id).await.unwrap().status,
        LotStatus::Rejected
    );

    let reopened = harness
        .engine
        .update_lot_status(lot.id, LotStatus::AwaitingResults, "qc.lead", None)
        .await
        .unwrap();
    assert!(reopened.rejection_reason.is_none());

    // Recompute now sees the recorded result again
    let recomputed = harness.engine.recompute_lot(lot.id).await.unwrap();
    assert_eq!(recomputed.status, LotStatus::UnderReview);
}

#[tokio::test]
async fn test_bulk_approve_recomputes_each_lot_once() {
    let harness = TestHarness::new();
    let lot = harness.seed_lot("FLK-2024-0042", &[("TPC", "< 10000", true)]);

    let mut ids = Vec::new();
    for value in ["4500", "4600", "4700", "4800"] {
        let result = harness
            .engine
            .record_result(lot.id, "TPC", value, None, None, "lab.tech")
            .await
            .unwrap();
        ids.push(result.id);
    }
    ids.push(Uuid::new_v4()); // unknown id

    let lot_status_changes_before = harness
        .store
        .audit_records()
        .iter()
        .filter(|r| r.table_name == "lots" && r.action == AuditAction::StatusChange)
        .count();

    let outcome = harness.engine.bulk_approve(&ids, "qc.lead").await.unwrap();
    assert_eq!(outcome.approved.len(), 4);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].result_id, ids[4]);

    // The lot was already UnderReview, so the single post-loop recompute
    // changed nothing and wrote nothing
    let lot_status_changes_after = harness
        .store
        .audit_records()
        .iter()
        .filter(|r| r.table_name == "lots" && r.action == AuditAction::StatusChange)
        .count();
    assert_eq!(lot_status_changes_after, lot_status_changes_before);
    assert_eq!(
        harness.engine.lot(lot.id).await.unwrap().status,
        LotStatus::UnderReview
    );
}

#[tokio::test]
async fn test_retest_completes_when_value_changes() {
    let harness = TestHarness::new();
    let lot = harness.seed_lot("FLK-2024-0042", &[("TPC", "< 10000", true)]);

    let result = harness
        .engine
        .record_result(lot.id, "TPC", "50000", None, None, "lab.tech")
        .await
        .unwrap();
    let request = harness
        .engine
        .create_retest(lot.id, &[result.id], "value disputed by lab", "qc.lead")
        .await
        .unwrap();
    assert_eq!(request.reference, "FLK-2024-0042-R1");
    assert!(harness.engine.lot(lot.id).await.unwrap().has_pending_retest);

    harness
        .engine
        .update_result_value(result.id, "5000", "lab.tech")
        .await
        .unwrap();

    let requests = harness.engine.retests_for_lot(lot.id).await.unwrap();
    assert_eq!(requests[0].status, RetestStatus::Completed);
    assert!(requests[0].completed_at.is_some());
    assert!(!harness.engine.lot(lot.id).await.unwrap().has_pending_retest);
}

#[tokio::test]
async fn test_retest_flags_unchanged_value_for_review() {
    let harness = TestHarness::new();
    let lot = harness.seed_lot("FLK-2024-0042", &[("TPC", "< 10000", true)]);

    let result = harness
        .engine
        .record_result(lot.id, "TPC", "50000", None, None, "lab.tech")
        .await
        .unwrap();
    harness
        .engine
        .create_retest(lot.id, &[result.id], "value disputed by lab", "qc.lead")
        .await
        .unwrap();

    harness
        .engine
        .update_result_value(result.id, "50000", "lab.tech")
        .await
        .unwrap();

    let requests = harness.engine.retests_for_lot(lot.id).await.unwrap();
    assert_eq!(requests[0].status, RetestStatus::ReviewRequired);
    assert!(harness.engine.lot(lot.id).await.unwrap().has_pending_retest);

    // Out-of-band confirmation closes it
    harness
        .engine
        .complete_retest(requests[0].id, "qc.lead")
        .await
        .unwrap();
    assert!(!harness.engine.lot(lot.id).await.unwrap().has_pending_retest);
}

#[tokio::test]
async fn test_concurrent_retest_creation_yields_unique_references() {
    let harness = TestHarness::new();
    let lot = harness.seed_lot("FLK-2024-0042", &[("TPC", "< 10000", true)]);
    let result = harness
        .engine
        .record_result(lot.id, "TPC", "50000", None, None, "lab.tech")
        .await
        .unwrap();

    let engine = Arc::new(harness.engine);
    let result_ids = [result.id];
    let (a, b) = tokio::join!(
        engine.create_retest(lot.id, &result_ids, "first dispute", "qc.lead"),
        engine.create_retest(lot.id, &result_ids, "second dispute", "qc.lead"),
    );
    let mut references = vec![a.unwrap().reference, b.unwrap().reference];
    references.sort();
    assert_eq!(references, vec!["FLK-2024-0042-R1", "FLK-2024-0042-R2"]);
}

#[tokio::test]
async fn test_audit_trail_chains_and_verifies() {
    let harness = TestHarness::new();
    let lot = harness.seed_lot("FLK-2024-0042", &[("TPC", "< 10000", true)]);

    let result = harness
        .engine
        .record_result(lot.id, "TPC", "15000", None, None, "lab.tech")
        .await
        .unwrap();
    harness
        .engine
        .create_retest(lot.id, &[result.id], "over limit", "qc.lead")
        .await
        .unwrap();
    harness
        .engine
        .update_result_value(result.id, "4500", "lab.tech")
        .await
        .unwrap();
    harness.engine.approve_result(result.id, "qc.lead").await.unwrap();
    harness.engine.reject_result(result.id, "qc.lead", "typo").await.unwrap();

    let records = harness.store.audit_records();
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r.verify_integrity()));
    assert!(records[0].previous_hash.is_none());
    for pair in records.windows(2) {
        assert_eq!(pair[1].previous_hash.as_deref(), Some(pair[0].hash.as_str()));
    }

    // One approve and one reject entry, exactly
    let approvals = records.iter().filter(|r| r.action == AuditAction::Approve).count();
    let rejections = records.iter().filter(|r| r.action == AuditAction::Reject).count();
    assert_eq!(approvals, 1);
    assert_eq!(rejections, 1);
}

#[tokio::test]
async fn test_each_mutation_writes_exactly_one_audit_entry() {
    let harness = TestHarness::new();
    let lot = harness.seed_lot("FLK-2024-0042", &[("TPC", "< 10000", true)]);

    // Intake writes a result entry plus a lot status entry
    harness
        .engine
        .record_result(lot.id, "TPC", "4500", None, None, "lab.tech")
        .await
        .unwrap();
    let records = harness.store.audit_records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].table_name, "test_results");
    assert_eq!(records[0].action, AuditAction::Create);
    assert_eq!(records[1].table_name, "lots");
    assert_eq!(records[1].action, AuditAction::StatusChange);

    // Recompute without change writes nothing
    harness.engine.recompute_lot(lot.id).await.unwrap();
    assert_eq!(harness.store.audit_records().len(), 2);
}

#[tokio::test]
async fn test_unknown_actor_cannot_approve_or_complete_retests() {
    let harness = TestHarness::new();
    let lot = harness.seed_lot("FLK-2024-0042", &[("TPC", "< 10000", true)]);
    let result = harness
        .engine
        .record_result(lot.id, "TPC", "4500", None, None, "lab.tech")
        .await
        .unwrap();

    let err = harness.engine.approve_result(result.id, "intern").await.unwrap_err();
    assert_eq!(err.error_code(), "PERMISSION_DENIED");

    let err = harness
        .engine
        .bulk_approve(&[result.id], "intern")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "PERMISSION_DENIED");

    let request = harness
        .engine
        .create_retest(lot.id, &[result.id], "disputed", "lab.tech")
        .await
        .unwrap();
    let err = harness
        .engine
        .complete_retest(request.id, "intern")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "PERMISSION_DENIED");
}
