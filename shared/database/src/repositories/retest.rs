//! Retest request repository for PostgreSQL operations

use certa_models::{RetestItem, RetestRequest, RetestStatus};
use certa_utils::{CertaError, CertaResult};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub(crate) struct RetestRow {
    pub id: Uuid,
    pub lot_id: Uuid,
    pub reference: String,
    pub status: String,
    pub reason: String,
    pub requested_by: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RetestRow> for RetestRequest {
    type Error = CertaError;

    fn try_from(row: RetestRow) -> Result<Self, Self::Error> {
        let status = RetestStatus::from_str(&row.status).ok_or_else(|| {
            CertaError::database(format!(
                "retest request {} has unknown status '{}'",
                row.id, row.status
            ))
        })?;

        Ok(RetestRequest {
            id: row.id,
            lot_id: row.lot_id,
            reference: row.reference,
            status,
            reason: row.reason,
            requested_by: row.requested_by,
            completed_at: row.completed_at,
            created_at: row.created_at,
        })
    }
}

pub struct RetestRepository {
    pool: PgPool,
}

impl RetestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> CertaResult<Option<RetestRequest>> {
        let row = sqlx::query_as::<_, RetestRow>(
            r#"
            SELECT id, lot_id, reference, status, reason, requested_by, completed_at, created_at
            FROM retest_requests
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RetestRequest::try_from).transpose()
    }

    pub async fn find_by_lot(&self, lot_id: Uuid) -> CertaResult<Vec<RetestRequest>> {
        let rows = sqlx::query_as::<_, RetestRow>(
            r#"
            SELECT id, lot_id, reference, status, reason, requested_by, completed_at, created_at
            FROM retest_requests
            WHERE lot_id = $1
            ORDER BY created_at, reference
            "#,
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RetestRequest::try_from).collect()
    }

    /// Open requests across all lots, oldest first
    pub async fn find_open(&self) -> CertaResult<Vec<RetestRequest>> {
        let rows = sqlx::query_as::<_, RetestRow>(
            r#"
            SELECT id, lot_id, reference, status, reason, requested_by, completed_at, created_at
            FROM retest_requests
            WHERE status IN ('pending', 'review_required')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RetestRequest::try_from).collect()
    }

    pub async fn items_for_request(&self, retest_request_id: Uuid) -> CertaResult<Vec<RetestItem>> {
        let items = sqlx::query_as::<_, RetestItem>(
            r#"
            SELECT id, retest_request_id, test_result_id, original_value, created_at
            FROM retest_items
            WHERE retest_request_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(retest_request_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }
}
