//! Certa Lifecycle Property Tests
//!
//! Property-based checks driving the engine with randomized inputs: the
//! manual transition table, recompute convergence, retest reference
//! sequencing, and audit chain integrity under arbitrary operation
//! interleavings.

use std::sync::Arc;

use proptest::prelude::*;
use uuid::Uuid;

use certa_lot_lifecycle::{InMemoryStore, LifecycleEngine, StaticApprovalPolicy};
use certa_models::{Lot, LotStatus, LotType, ProductTestSpecification};

const ALL_STATUSES: [LotStatus; 8] = [
    LotStatus::AwaitingResults,
    LotStatus::PartialResults,
    LotStatus::NeedsAttention,
    LotStatus::UnderReview,
    LotStatus::AwaitingRelease,
    LotStatus::Approved,
    LotStatus::Released,
    LotStatus::Rejected,
];

const TEST_NAMES: [&str; 4] = ["TPC", "E.coli", "Lead", "Protein"];

fn arb_status() -> impl Strategy<Value = LotStatus> {
    (0usize..ALL_STATUSES.len()).prop_map(|i| ALL_STATUSES[i])
}

fn arb_value() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u32..100_000).prop_map(|n| n.to_string()),
        Just("< 10".to_string()),
        Just("ND".to_string()),
        Just("Absent".to_string()),
        Just("Conforms".to_string()),
        Just(String::new()),
    ]
}

#[derive(Debug, Clone)]
enum Op {
    Record { name_idx: usize, value: String },
    Update { result_idx: usize, value: String },
    Delete { result_idx: usize },
    Approve { result_idx: usize },
    Reject { result_idx: usize },
    Retest { result_idx: usize },
    ManualStatus { status_idx: usize },
    Recompute,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        ((0usize..TEST_NAMES.len()), arb_value())
            .prop_map(|(name_idx, value)| Op::Record { name_idx, value }),
        ((0usize..8), arb_value()).prop_map(|(result_idx, value)| Op::Update { result_idx, value }),
        (0usize..8).prop_map(|result_idx| Op::Delete { result_idx }),
        (0usize..8).prop_map(|result_idx| Op::Approve { result_idx }),
        (0usize..8).prop_map(|result_idx| Op::Reject { result_idx }),
        (0usize..8).prop_map(|result_idx| Op::Retest { result_idx }),
        (0usize..ALL_STATUSES.len()).prop_map(|status_idx| Op::ManualStatus { status_idx }),
        Just(Op::Recompute),
    ]
}

struct Fixture {
    store: InMemoryStore,
    engine: LifecycleEngine,
    lot: Lot,
}

fn fixture(initial: LotStatus) -> Fixture {
    let store = InMemoryStore::new();
    let shared: Arc<InMemoryStore> = Arc::new(store.clone());
    let engine = LifecycleEngine::new(
        shared.clone(),
        shared,
        Arc::new(StaticApprovalPolicy::new(["qc.lead"])),
    );

    let product_id = Uuid::new_v4();
    let mut lot = Lot::new("FLK-2024-0042", LotType::Standard, vec![product_id]);
    lot.status = initial;
    store.seed_lot(lot.clone());
    store.seed_specification(ProductTestSpecification::new(product_id, "TPC", "< 10000", true));
    store.seed_specification(ProductTestSpecification::new(product_id, "E.coli", "Absent", true));
    store.seed_specification(ProductTestSpecification::new(product_id, "Lead", "< 0.5", false));

    Fixture { store, engine, lot }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A manual transition succeeds exactly when the edge table allows it;
    /// with no recorded results the approval guard is vacuous and the
    /// override reason is always supplied.
    #[test]
    fn prop_manual_transitions_follow_the_edge_table(from in arb_status(), to in arb_status()) {
        runtime().block_on(async {
            let fx = fixture(from);
            let outcome = fx.engine
                .update_lot_status(fx.lot.id, to, "qc.lead", Some("routine move"))
                .await;
            prop_assert_eq!(outcome.is_ok(), from.can_transition_to(to));
            Ok(())
        })?;
    }

    /// Recompute of a non-decided lot lands in a working status and a
    /// second recompute changes nothing.
    #[test]
    fn prop_recompute_converges(values in proptest::collection::vec((0usize..TEST_NAMES.len(), arb_value()), 0..6)) {
        runtime().block_on(async {
            let fx = fixture(LotStatus::AwaitingResults);
            for (name_idx, value) in values {
                let _ = fx.engine
                    .record_result(fx.lot.id, TEST_NAMES[name_idx], &value, None, None, "lab.tech")
                    .await;
            }

            let first = fx.engine.recompute_lot(fx.lot.id).await.unwrap();
            prop_assert!(!first.status.is_decided());
            let second = fx.engine.recompute_lot(fx.lot.id).await.unwrap();
            prop_assert_eq!(first.status, second.status);
            Ok(())
        })?;
    }

    /// Retest references stay dense and strictly increasing no matter how
    /// many requests a lot accumulates.
    #[test]
    fn prop_retest_references_are_sequential(count in 1usize..6) {
        runtime().block_on(async {
            let fx = fixture(LotStatus::UnderReview);
            let result = fx.engine
                .record_result(fx.lot.id, "TPC", "50000", None, None, "lab.tech")
                .await
                .unwrap();

            for n in 1..=count {
                let request = fx.engine
                    .create_retest(fx.lot.id, &[result.id], "disputed", "qc.lead")
                    .await
                    .unwrap();
                prop_assert_eq!(request.reference, format!("FLK-2024-0042-R{n}"));
            }
            Ok(())
        })?;
    }

    /// Any interleaving of operations leaves a verifiable audit chain and
    /// a pending-retest flag that agrees with the open requests.
    #[test]
    fn prop_operation_walks_preserve_audit_and_flags(ops in proptest::collection::vec(arb_op(), 0..24)) {
        runtime().block_on(async {
            let fx = fixture(LotStatus::AwaitingResults);
            let mut result_ids: Vec<Uuid> = Vec::new();

            for op in ops {
                match op {
                    Op::Record { name_idx, value } => {
                        if let Ok(result) = fx.engine
                            .record_result(fx.lot.id, TEST_NAMES[name_idx], &value, None, None, "lab.tech")
                            .await
                        {
                            result_ids.push(result.id);
                        }
                    }
                    Op::Update { result_idx, value } => {
                        if let Some(&id) = pick(&result_ids, result_idx) {
                            let _ = fx.engine.update_result_value(id, &value, "lab.tech").await;
                        }
                    }
                    Op::Delete { result_idx } => {
                        if let Some(&id) = pick(&result_ids, result_idx) {
                            let _ = fx.engine.delete_result(id, "lab.tech", None).await;
                        }
                    }
                    Op::Approve { result_idx } => {
                        if let Some(&id) = pick(&result_ids, result_idx) {
                            let _ = fx.engine.approve_result(id, "qc.lead").await;
                        }
                    }
                    Op::Reject { result_idx } => {
                        if let Some(&id) = pick(&result_ids, result_idx) {
                            let _ = fx.engine.reject_result(id, "qc.lead", "random audit").await;
                        }
                    }
                    Op::Retest { result_idx } => {
                        if let Some(&id) = pick(&result_ids, result_idx) {
                            let _ = fx.engine
                                .create_retest(fx.lot.id, &[id], "spot check", "qc.lead")
                                .await;
                        }
                    }
                    Op::ManualStatus { status_idx } => {
                        let _ = fx.engine
                            .update_lot_status(fx.lot.id, ALL_STATUSES[status_idx], "qc.lead", Some("walk"))
                            .await;
                    }
                    Op::Recompute => {
                        let _ = fx.engine.recompute_lot(fx.lot.id).await;
                    }
                }
            }

            let records = fx.store.audit_records();
            for record in &records {
                prop_assert!(record.verify_integrity());
            }
            for pair in records.windows(2) {
                prop_assert_eq!(pair[1].previous_hash.as_deref(), Some(pair[0].hash.as_str()));
            }

            let lot = fx.engine.lot(fx.lot.id).await.unwrap();
            let open = fx.engine
                .retests_for_lot(fx.lot.id)
                .await
                .unwrap()
                .iter()
                .any(|r| r.status.is_open());
            prop_assert_eq!(lot.has_pending_retest, open);
            Ok(())
        })?;
    }
}

fn pick<T>(items: &[T], idx: usize) -> Option<&T> {
    if items.is_empty() {
        None
    } else {
        items.get(idx % items.len())
    }
}
