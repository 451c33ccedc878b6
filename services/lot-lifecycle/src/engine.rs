//! Engine facade.
//!
//! Wires the state machine and the three workflows over one set of ports
//! and one shared lock registry, and exposes the whole lifecycle as a flat
//! API. Embedders construct it once with their store, audit sink, and
//! approval policy, then call operations; everything else is internal
//! plumbing.

use std::sync::Arc;

use uuid::Uuid;

use certa_models::{Lot, LotStatus, RetestRequest, TestResult};
use certa_utils::CertaResult;

use crate::approval::{ApprovalReadiness, ApprovalWorkflow, BulkApprovalOutcome};
use crate::results::ResultIntake;
use crate::retest::RetestWorkflow;
use crate::state_machine::{LotLockRegistry, LotStateMachine};
use crate::store::{ApprovalPolicy, AuditSink, LifecycleStore};

pub struct LifecycleEngine {
    store: Arc<dyn LifecycleStore>,
    state_machine: Arc<LotStateMachine>,
    approvals: ApprovalWorkflow,
    retests: Arc<RetestWorkflow>,
    results: ResultIntake,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        audit: Arc<dyn AuditSink>,
        policy: Arc<dyn ApprovalPolicy>,
    ) -> Self {
        let locks = Arc::new(LotLockRegistry::new());
        let state_machine = Arc::new(LotStateMachine::new(
            store.clone(),
            audit.clone(),
            locks.clone(),
        ));
        let retests = Arc::new(RetestWorkflow::new(
            store.clone(),
            audit.clone(),
            policy.clone(),
            locks,
        ));
        let approvals = ApprovalWorkflow::new(
            store.clone(),
            audit.clone(),
            policy,
            state_machine.clone(),
        );
        let results = ResultIntake::new(
            store.clone(),
            audit,
            state_machine.clone(),
            retests.clone(),
        );

        Self {
            store,
            state_machine,
            approvals,
            retests,
            results,
        }
    }

    // Reads

    pub async fn lot(&self, lot_id: Uuid) -> CertaResult<Lot> {
        self.store.fetch_lot(lot_id).await
    }

    pub async fn results_for_lot(&self, lot_id: Uuid) -> CertaResult<Vec<TestResult>> {
        self.store.results_for_lot(lot_id).await
    }

    pub async fn retests_for_lot(&self, lot_id: Uuid) -> CertaResult<Vec<RetestRequest>> {
        self.store.retests_for_lot(lot_id).await
    }

    // Lot status

    pub async fn update_lot_status(
        &self,
        lot_id: Uuid,
        target: LotStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> CertaResult<Lot> {
        self.state_machine.update_status(lot_id, target, actor, reason).await
    }

    pub async fn recompute_lot(&self, lot_id: Uuid) -> CertaResult<Lot> {
        self.state_machine.auto_recompute(lot_id).await
    }

    // Result intake

    pub async fn record_result(
        &self,
        lot_id: Uuid,
        test_name: &str,
        value: &str,
        specification: Option<&str>,
        confidence: Option<f64>,
        actor: &str,
    ) -> CertaResult<TestResult> {
        self.results
            .record_result(lot_id, test_name, value, specification, confidence, actor)
            .await
    }

    pub async fn update_result_value(
        &self,
        result_id: Uuid,
        value: &str,
        actor: &str,
    ) -> CertaResult<TestResult> {
        self.results.update_value(result_id, value, actor).await
    }

    pub async fn delete_result(
        &self,
        result_id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> CertaResult<()> {
        self.results.delete_result(result_id, actor, reason).await
    }

    // Approval

    pub async fn approve_result(&self, result_id: Uuid, approver: &str) -> CertaResult<TestResult> {
        self.approvals.approve(result_id, approver).await
    }

    pub async fn reject_result(
        &self,
        result_id: Uuid,
        rejector: &str,
        reason: &str,
    ) -> CertaResult<TestResult> {
        self.approvals.reject(result_id, rejector, reason).await
    }

    pub async fn bulk_approve(
        &self,
        result_ids: &[Uuid],
        approver: &str,
    ) -> CertaResult<BulkApprovalOutcome> {
        self.approvals.bulk_approve(result_ids, approver).await
    }

    pub async fn validate_for_approval(&self, lot_id: Uuid) -> CertaResult<ApprovalReadiness> {
        self.approvals.validate_for_approval(lot_id).await
    }

    // Retests

    pub async fn create_retest(
        &self,
        lot_id: Uuid,
        result_ids: &[Uuid],
        reason: &str,
        requester: &str,
    ) -> CertaResult<RetestRequest> {
        self.retests.create_retest(lot_id, result_ids, reason, requester).await
    }

    pub async fn complete_retest(&self, retest_id: Uuid, approver: &str) -> CertaResult<RetestRequest> {
        self.retests.complete_retest(retest_id, approver).await
    }
}
