//! In-memory implementations of the engine ports.
//!
//! Backs the engine in tests and lightweight embedders without a database.
//! Clones share state, so one store can serve as [`LifecycleStore`] and
//! [`AuditSink`] for several workflow objects at once. Interior locks are
//! held only for the duration of a map operation, never across an await.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use certa_models::{
    AuditChange, AuditRecord, Lot, ProductTestSpecification, RetestItem, RetestRequest,
    RetestStatus, TestResult,
};
use certa_utils::{CertaError, CertaResult};

use crate::store::{ApprovalPolicy, AuditSink, LifecycleStore};

#[derive(Clone, Default)]
pub struct InMemoryStore {
    lots: Arc<RwLock<HashMap<Uuid, Lot>>>,
    results: Arc<RwLock<HashMap<Uuid, TestResult>>>,
    specifications: Arc<RwLock<HashMap<Uuid, ProductTestSpecification>>>,
    retests: Arc<RwLock<HashMap<Uuid, RetestRequest>>>,
    items: Arc<RwLock<HashMap<Uuid, RetestItem>>>,
    audit: Arc<RwLock<Vec<AuditRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_lot(&self, lot: Lot) {
        write(&self.lots).insert(lot.id, lot);
    }

    pub fn seed_result(&self, result: TestResult) {
        write(&self.results).insert(result.id, result);
    }

    pub fn seed_specification(&self, specification: ProductTestSpecification) {
        write(&self.specifications).insert(specification.id, specification);
    }

    pub fn seed_retest(&self, request: RetestRequest) {
        write(&self.retests).insert(request.id, request);
    }

    pub fn seed_item(&self, item: RetestItem) {
        write(&self.items).insert(item.id, item);
    }

    /// Full audit trail in insertion order
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        read(&self.audit).clone()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl LifecycleStore for InMemoryStore {
    async fn fetch_lot(&self, lot_id: Uuid) -> CertaResult<Lot> {
        read(&self.lots)
            .get(&lot_id)
            .cloned()
            .ok_or_else(|| CertaError::not_found(format!("lot {lot_id}")))
    }

    async fn fetch_result(&self, result_id: Uuid) -> CertaResult<TestResult> {
        read(&self.results)
            .get(&result_id)
            .cloned()
            .ok_or_else(|| CertaError::not_found(format!("test result {result_id}")))
    }

    async fn fetch_retest(&self, retest_id: Uuid) -> CertaResult<RetestRequest> {
        read(&self.retests)
            .get(&retest_id)
            .cloned()
            .ok_or_else(|| CertaError::not_found(format!("retest request {retest_id}")))
    }

    async fn results_for_lot(&self, lot_id: Uuid) -> CertaResult<Vec<TestResult>> {
        let mut results: Vec<TestResult> = read(&self.results)
            .values()
            .filter(|r| r.lot_id == lot_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| (a.created_at, &a.test_name).cmp(&(b.created_at, &b.test_name)));
        Ok(results)
    }

    async fn specifications_for_lot(
        &self,
        lot_id: Uuid,
    ) -> CertaResult<Vec<ProductTestSpecification>> {
        let lot = self.fetch_lot(lot_id).await?;
        let mut specs: Vec<ProductTestSpecification> = read(&self.specifications)
            .values()
            .filter(|s| lot.product_ids.contains(&s.product_id))
            .cloned()
            .collect();
        specs.sort_by(|a, b| (&a.test_name, a.created_at).cmp(&(&b.test_name, b.created_at)));
        Ok(specs)
    }

    async fn retests_for_lot(&self, lot_id: Uuid) -> CertaResult<Vec<RetestRequest>> {
        let mut requests: Vec<RetestRequest> = read(&self.retests)
            .values()
            .filter(|r| r.lot_id == lot_id)
            .cloned()
            .collect();
        requests.sort_by(|a, b| (a.created_at, &a.reference).cmp(&(b.created_at, &b.reference)));
        Ok(requests)
    }

    async fn items_for_retest(&self, retest_id: Uuid) -> CertaResult<Vec<RetestItem>> {
        let mut items: Vec<RetestItem> = read(&self.items)
            .values()
            .filter(|i| i.retest_request_id == retest_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(items)
    }

    async fn pending_retests_for_result(
        &self,
        result_id: Uuid,
    ) -> CertaResult<Vec<RetestRequest>> {
        let request_ids: HashSet<Uuid> = read(&self.items)
            .values()
            .filter(|i| i.test_result_id == result_id)
            .map(|i| i.retest_request_id)
            .collect();
        let mut requests: Vec<RetestRequest> = read(&self.retests)
            .values()
            .filter(|r| r.status == RetestStatus::Pending && request_ids.contains(&r.id))
            .cloned()
            .collect();
        requests.sort_by(|a, b| (a.created_at, &a.reference).cmp(&(b.created_at, &b.reference)));
        Ok(requests)
    }

    async fn count_retests_for_lot(&self, lot_id: Uuid) -> CertaResult<u32> {
        Ok(read(&self.retests).values().filter(|r| r.lot_id == lot_id).count() as u32)
    }

    async fn insert_result(&self, result: &TestResult) -> CertaResult<()> {
        write(&self.results).insert(result.id, result.clone());
        Ok(())
    }

    async fn update_result(&self, result: &TestResult) -> CertaResult<()> {
        let mut results = write(&self.results);
        if !results.contains_key(&result.id) {
            return Err(CertaError::not_found(format!("test result {}", result.id)));
        }
        results.insert(result.id, result.clone());
        Ok(())
    }

    async fn delete_result(&self, result_id: Uuid) -> CertaResult<()> {
        write(&self.results)
            .remove(&result_id)
            .map(|_| ())
            .ok_or_else(|| CertaError::not_found(format!("test result {result_id}")))
    }

    async fn update_lot(&self, lot: &Lot) -> CertaResult<()> {
        let mut lots = write(&self.lots);
        if !lots.contains_key(&lot.id) {
            return Err(CertaError::not_found(format!("lot {}", lot.id)));
        }
        lots.insert(lot.id, lot.clone());
        Ok(())
    }

    async fn update_retest(&self, retest: &RetestRequest) -> CertaResult<()> {
        let mut retests = write(&self.retests);
        if !retests.contains_key(&retest.id) {
            return Err(CertaError::not_found(format!("retest request {}", retest.id)));
        }
        retests.insert(retest.id, retest.clone());
        Ok(())
    }

    async fn create_retest(
        &self,
        request: &RetestRequest,
        items: &[RetestItem],
        lot: &Lot,
    ) -> CertaResult<()> {
        {
            let mut lots = write(&self.lots);
            if !lots.contains_key(&lot.id) {
                return Err(CertaError::not_found(format!("lot {}", lot.id)));
            }
            lots.insert(lot.id, lot.clone());
        }
        write(&self.retests).insert(request.id, request.clone());
        let mut stored = write(&self.items);
        for item in items {
            stored.insert(item.id, item.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn log_change(&self, change: AuditChange) -> CertaResult<AuditRecord> {
        let mut records = write(&self.audit);
        let previous_hash = records.last().map(|r| r.hash.clone());
        let record = AuditRecord::new(change, previous_hash);
        records.push(record.clone());
        Ok(record)
    }
}

/// Fixed-list approval policy. Anyone not on the list lacks the approval
/// capability; there are no other roles.
#[derive(Clone, Default)]
pub struct StaticApprovalPolicy {
    approvers: HashSet<String>,
}

impl StaticApprovalPolicy {
    pub fn new<I, S>(approvers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            approvers: approvers.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ApprovalPolicy for StaticApprovalPolicy {
    async fn can_approve(&self, actor: &str) -> CertaResult<bool> {
        Ok(self.approvers.contains(actor))
    }
}
