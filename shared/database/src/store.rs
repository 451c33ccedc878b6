//! Postgres implementations of the lifecycle engine ports
//!
//! [`PgLifecycleStore`] backs [`LifecycleStore`] with the tables created by
//! [`crate::migrations`]; [`PgAuditSink`] appends to the hash-chained audit
//! log. Multi-row mutations run in a transaction, and retest creation locks
//! the lot row so two writers cannot mint the same retest reference.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use certa_lot_lifecycle::{AuditSink, LifecycleStore};
use certa_models::{
    AuditChange, AuditRecord, Lot, ProductTestSpecification, RetestItem, RetestRequest, TestResult,
};
use certa_utils::{CertaError, CertaResult};

use crate::repositories::retest::RetestRow;
use crate::repositories::{AuditRepository, LotRepository, RetestRepository, TestResultRepository};

pub struct PgLifecycleStore {
    pool: PgPool,
    lots: LotRepository,
    results: TestResultRepository,
    retests: RetestRepository,
}

impl PgLifecycleStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            lots: LotRepository::new(pool.clone()),
            results: TestResultRepository::new(pool.clone()),
            retests: RetestRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl LifecycleStore for PgLifecycleStore {
    async fn fetch_lot(&self, lot_id: Uuid) -> CertaResult<Lot> {
        self.lots
            .find_by_id(lot_id)
            .await?
            .ok_or_else(|| CertaError::not_found(format!("lot {lot_id}")))
    }

    async fn fetch_result(&self, result_id: Uuid) -> CertaResult<TestResult> {
        self.results
            .find_by_id(result_id)
            .await?
            .ok_or_else(|| CertaError::not_found(format!("test result {result_id}")))
    }

    async fn fetch_retest(&self, retest_id: Uuid) -> CertaResult<RetestRequest> {
        self.retests
            .find_by_id(retest_id)
            .await?
            .ok_or_else(|| CertaError::not_found(format!("retest request {retest_id}")))
    }

    async fn results_for_lot(&self, lot_id: Uuid) -> CertaResult<Vec<TestResult>> {
        self.results.find_by_lot(lot_id).await
    }

    async fn specifications_for_lot(
        &self,
        lot_id: Uuid,
    ) -> CertaResult<Vec<ProductTestSpecification>> {
        let specs = sqlx::query_as::<_, ProductTestSpecification>(
            r#"
            SELECT s.id, s.product_id, s.test_name, s.specification, s.is_required,
                   s.notes, s.min_value, s.max_value, s.created_at, s.updated_at
            FROM product_test_specifications s
            JOIN lot_products lp ON lp.product_id = s.product_id
            WHERE lp.lot_id = $1
            ORDER BY s.test_name, s.created_at
            "#,
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(specs)
    }

    async fn retests_for_lot(&self, lot_id: Uuid) -> CertaResult<Vec<RetestRequest>> {
        self.retests.find_by_lot(lot_id).await
    }

    async fn items_for_retest(&self, retest_id: Uuid) -> CertaResult<Vec<RetestItem>> {
        self.retests.items_for_request(retest_id).await
    }

    async fn pending_retests_for_result(
        &self,
        result_id: Uuid,
    ) -> CertaResult<Vec<RetestRequest>> {
        let rows = sqlx::query_as::<_, RetestRow>(
            r#"
            SELECT DISTINCT r.id, r.lot_id, r.reference, r.status, r.reason,
                   r.requested_by, r.completed_at, r.created_at
            FROM retest_requests r
            JOIN retest_items i ON i.retest_request_id = r.id
            WHERE i.test_result_id = $1 AND r.status = 'pending'
            ORDER BY r.created_at
            "#,
        )
        .bind(result_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RetestRequest::try_from).collect()
    }

    async fn count_retests_for_lot(&self, lot_id: Uuid) -> CertaResult<u32> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM retest_requests WHERE lot_id = $1")
                .bind(lot_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u32)
    }

    async fn insert_result(&self, result: &TestResult) -> CertaResult<()> {
        self.results.create(result).await
    }

    async fn update_result(&self, result: &TestResult) -> CertaResult<()> {
        self.results.update(result).await
    }

    async fn delete_result(&self, result_id: Uuid) -> CertaResult<()> {
        self.results.delete(result_id).await
    }

    async fn update_lot(&self, lot: &Lot) -> CertaResult<()> {
        self.lots.update(lot).await
    }

    async fn update_retest(&self, retest: &RetestRequest) -> CertaResult<()> {
        let outcome = sqlx::query(
            r#"
            UPDATE retest_requests
            SET status = $2, reason = $3, completed_at = $4
            WHERE id = $1
            "#,
        )
        .bind(retest.id)
        .bind(retest.status.to_string())
        .bind(&retest.reason)
        .bind(retest.completed_at)
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(CertaError::not_found(format!("retest request {}", retest.id)));
        }
        Ok(())
    }

    async fn create_retest(
        &self,
        request: &RetestRequest,
        items: &[RetestItem],
        lot: &Lot,
    ) -> CertaResult<()> {
        let mut tx = self.pool.begin().await?;

        // Lock the lot row for the duration of the insert so a concurrent
        // request against the same lot waits and then sees this one
        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM lots WHERE id = $1 FOR UPDATE")
            .bind(lot.id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(CertaError::not_found(format!("lot {}", lot.id)));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO retest_requests
                (id, lot_id, reference, status, reason, requested_by, completed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(request.id)
        .bind(request.lot_id)
        .bind(&request.reference)
        .bind(request.status.to_string())
        .bind(&request.reason)
        .bind(&request.requested_by)
        .bind(request.completed_at)
        .bind(request.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if crate::repositories::is_unique_violation(&err) {
                return Err(CertaError::conflict(format!(
                    "retest reference '{}' already exists for lot {}",
                    request.reference, request.lot_id
                )));
            }
            return Err(err.into());
        }

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO retest_items
                    (id, retest_request_id, test_result_id, original_value, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(item.id)
            .bind(item.retest_request_id)
            .bind(item.test_result_id)
            .bind(&item.original_value)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE lots
            SET status = $2, has_pending_retest = $3, rejection_reason = $4,
                override_reason = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(lot.id)
        .bind(lot.status.to_string())
        .bind(lot.has_pending_retest)
        .bind(&lot.rejection_reason)
        .bind(&lot.override_reason)
        .bind(lot.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(
            lot_id = %lot.id,
            reference = %request.reference,
            items = items.len(),
            "Created retest request"
        );
        Ok(())
    }
}

/// Audit sink that appends to the Postgres hash chain
pub struct PgAuditSink {
    audit: AuditRepository,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            audit: AuditRepository::new(pool),
        }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn log_change(&self, change: AuditChange) -> CertaResult<AuditRecord> {
        self.audit.append(change).await
    }
}
