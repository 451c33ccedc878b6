//! Lot repository for PostgreSQL operations

use certa_models::{Lot, LotStatus, LotType, Sublot};
use certa_utils::{CertaError, CertaResult};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Raw lot row; status and lot_type are stored as strings and the
/// product ids come back as an aggregated array
#[derive(Debug, Clone, FromRow)]
pub(crate) struct LotRow {
    pub id: Uuid,
    pub reference_number: String,
    pub status: String,
    pub lot_type: String,
    pub generate_coa: bool,
    pub has_pending_retest: bool,
    pub rejection_reason: Option<String>,
    pub override_reason: Option<String>,
    pub mfg_date: Option<NaiveDate>,
    pub exp_date: Option<NaiveDate>,
    pub product_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<LotRow> for Lot {
    type Error = CertaError;

    fn try_from(row: LotRow) -> Result<Self, Self::Error> {
        let status = LotStatus::from_str(&row.status).ok_or_else(|| {
            CertaError::database(format!("lot {} has unknown status '{}'", row.id, row.status))
        })?;
        let lot_type = LotType::from_str(&row.lot_type).ok_or_else(|| {
            CertaError::database(format!("lot {} has unknown type '{}'", row.id, row.lot_type))
        })?;

        Ok(Lot {
            id: row.id,
            reference_number: row.reference_number,
            status,
            lot_type,
            generate_coa: row.generate_coa,
            has_pending_retest: row.has_pending_retest,
            rejection_reason: row.rejection_reason,
            override_reason: row.override_reason,
            mfg_date: row.mfg_date,
            exp_date: row.exp_date,
            product_ids: row.product_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct LotRepository {
    pool: PgPool,
}

impl LotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the lot and its product links in one transaction
    pub async fn create(&self, lot: &Lot) -> CertaResult<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO lots (id, reference_number, status, lot_type, generate_coa,
                              has_pending_retest, rejection_reason, override_reason,
                              mfg_date, exp_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(lot.id)
        .bind(&lot.reference_number)
        .bind(lot.status.to_string())
        .bind(lot.lot_type.to_string())
        .bind(lot.generate_coa)
        .bind(lot.has_pending_retest)
        .bind(&lot.rejection_reason)
        .bind(&lot.override_reason)
        .bind(lot.mfg_date)
        .bind(lot.exp_date)
        .bind(lot.created_at)
        .bind(lot.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if super::is_unique_violation(&err) {
                return Err(CertaError::conflict(format!(
                    "lot reference '{}' already exists",
                    lot.reference_number
                )));
            }
            return Err(err.into());
        }

        for product_id in &lot.product_ids {
            sqlx::query(
                "INSERT INTO lot_products (lot_id, product_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(lot.id)
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(lot_id = %lot.id, reference = %lot.reference_number, "Created lot");
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> CertaResult<Option<Lot>> {
        let row = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT l.id, l.reference_number, l.status, l.lot_type, l.generate_coa,
                   l.has_pending_retest, l.rejection_reason, l.override_reason,
                   l.mfg_date, l.exp_date,
                   COALESCE(array_agg(lp.product_id) FILTER (WHERE lp.product_id IS NOT NULL),
                            ARRAY[]::uuid[]) AS product_ids,
                   l.created_at, l.updated_at
            FROM lots l
            LEFT JOIN lot_products lp ON lp.lot_id = l.id
            WHERE l.id = $1
            GROUP BY l.id
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Lot::try_from).transpose()
    }

    pub async fn find_by_reference(&self, reference_number: &str) -> CertaResult<Option<Lot>> {
        let row = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT l.id, l.reference_number, l.status, l.lot_type, l.generate_coa,
                   l.has_pending_retest, l.rejection_reason, l.override_reason,
                   l.mfg_date, l.exp_date,
                   COALESCE(array_agg(lp.product_id) FILTER (WHERE lp.product_id IS NOT NULL),
                            ARRAY[]::uuid[]) AS product_ids,
                   l.created_at, l.updated_at
            FROM lots l
            LEFT JOIN lot_products lp ON lp.lot_id = l.id
            WHERE l.reference_number = $1
            GROUP BY l.id
            "#,
        )
        .bind(reference_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Lot::try_from).transpose()
    }

    pub async fn find_by_status(&self, status: LotStatus) -> CertaResult<Vec<Lot>> {
        let rows = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT l.id, l.reference_number, l.status, l.lot_type, l.generate_coa,
                   l.has_pending_retest, l.rejection_reason, l.override_reason,
                   l.mfg_date, l.exp_date,
                   COALESCE(array_agg(lp.product_id) FILTER (WHERE lp.product_id IS NOT NULL),
                            ARRAY[]::uuid[]) AS product_ids,
                   l.created_at, l.updated_at
            FROM lots l
            LEFT JOIN lot_products lp ON lp.lot_id = l.id
            WHERE l.status = $1
            GROUP BY l.id
            ORDER BY l.created_at DESC
            "#,
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Lot::try_from).collect()
    }

    pub async fn find_all(&self) -> CertaResult<Vec<Lot>> {
        let rows = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT l.id, l.reference_number, l.status, l.lot_type, l.generate_coa,
                   l.has_pending_retest, l.rejection_reason, l.override_reason,
                   l.mfg_date, l.exp_date,
                   COALESCE(array_agg(lp.product_id) FILTER (WHERE lp.product_id IS NOT NULL),
                            ARRAY[]::uuid[]) AS product_ids,
                   l.created_at, l.updated_at
            FROM lots l
            LEFT JOIN lot_products lp ON lp.lot_id = l.id
            GROUP BY l.id
            ORDER BY l.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Lot::try_from).collect()
    }

    /// Updates the lot's scalar columns; product links are managed through
    /// [`Self::attach_product`]
    pub async fn update(&self, lot: &Lot) -> CertaResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE lots
            SET reference_number = $2, status = $3, lot_type = $4, generate_coa = $5,
                has_pending_retest = $6, rejection_reason = $7, override_reason = $8,
                mfg_date = $9, exp_date = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(lot.id)
        .bind(&lot.reference_number)
        .bind(lot.status.to_string())
        .bind(lot.lot_type.to_string())
        .bind(lot.generate_coa)
        .bind(lot.has_pending_retest)
        .bind(&lot.rejection_reason)
        .bind(&lot.override_reason)
        .bind(lot.mfg_date)
        .bind(lot.exp_date)
        .bind(lot.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CertaError::not_found(format!("lot {}", lot.id)));
        }
        Ok(())
    }

    pub async fn attach_product(&self, lot_id: Uuid, product_id: Uuid) -> CertaResult<()> {
        sqlx::query(
            "INSERT INTO lot_products (lot_id, product_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(lot_id)
        .bind(product_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_sublot(&self, sublot: &Sublot) -> CertaResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sublots (id, lot_id, reference_number, quantity, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(sublot.id)
        .bind(sublot.lot_id)
        .bind(&sublot.reference_number)
        .bind(sublot.quantity)
        .bind(&sublot.notes)
        .bind(sublot.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn sublots_for_lot(&self, lot_id: Uuid) -> CertaResult<Vec<Sublot>> {
        let sublots = sqlx::query_as::<_, Sublot>(
            r#"
            SELECT id, lot_id, reference_number, quantity, notes, created_at
            FROM sublots
            WHERE lot_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sublots)
    }

    /// Deletes a lot along with its results, retests and sublots (cascade)
    pub async fn delete(&self, id: Uuid) -> CertaResult<()> {
        let result = sqlx::query("DELETE FROM lots WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CertaError::not_found(format!("lot {id}")));
        }
        Ok(())
    }
}
