//! Persistence, audit, and permission ports consumed by the engine.
//!
//! The engine never talks to a database directly. Implementations live in
//! `certa-database` (Postgres) and in [`crate::memory`] (in-memory, used by
//! tests and embedders). Each mutating method is one transaction boundary:
//! an implementation must apply the whole call or none of it.

use async_trait::async_trait;
use uuid::Uuid;

use certa_models::{
    AuditChange, AuditRecord, Lot, ProductTestSpecification, RetestItem, RetestRequest, TestResult,
};
use certa_utils::CertaResult;

#[async_trait]
pub trait LifecycleStore: Send + Sync {
    async fn fetch_lot(&self, lot_id: Uuid) -> CertaResult<Lot>;
    async fn fetch_result(&self, result_id: Uuid) -> CertaResult<TestResult>;
    async fn fetch_retest(&self, retest_id: Uuid) -> CertaResult<RetestRequest>;

    async fn results_for_lot(&self, lot_id: Uuid) -> CertaResult<Vec<TestResult>>;
    /// Union of specification rows across every product attached to the lot
    async fn specifications_for_lot(&self, lot_id: Uuid)
        -> CertaResult<Vec<ProductTestSpecification>>;
    async fn retests_for_lot(&self, lot_id: Uuid) -> CertaResult<Vec<RetestRequest>>;
    async fn items_for_retest(&self, retest_id: Uuid) -> CertaResult<Vec<RetestItem>>;
    /// Pending requests holding an item that references this result
    async fn pending_retests_for_result(&self, result_id: Uuid)
        -> CertaResult<Vec<RetestRequest>>;
    async fn count_retests_for_lot(&self, lot_id: Uuid) -> CertaResult<u32>;

    async fn insert_result(&self, result: &TestResult) -> CertaResult<()>;
    async fn update_result(&self, result: &TestResult) -> CertaResult<()>;
    async fn delete_result(&self, result_id: Uuid) -> CertaResult<()>;
    async fn update_lot(&self, lot: &Lot) -> CertaResult<()>;
    async fn update_retest(&self, retest: &RetestRequest) -> CertaResult<()>;
    /// Persists the request, its items, and the updated lot atomically
    async fn create_retest(
        &self,
        request: &RetestRequest,
        items: &[RetestItem],
        lot: &Lot,
    ) -> CertaResult<()>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_change(&self, change: AuditChange) -> CertaResult<AuditRecord>;
}

#[async_trait]
pub trait ApprovalPolicy: Send + Sync {
    async fn can_approve(&self, actor: &str) -> CertaResult<bool>;
}

/// Writes one audit entry for an already-applied mutation. A sink failure
/// is recorded and swallowed; the business mutation stands either way.
pub(crate) async fn record_audit(sink: &dyn AuditSink, change: AuditChange) {
    if let Err(err) = sink.log_change(change).await {
        tracing::error!(error = %err, "audit sink rejected change for an applied mutation");
    }
}
