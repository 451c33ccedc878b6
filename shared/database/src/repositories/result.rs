//! Test result repository for PostgreSQL operations

use certa_models::{TestResult, TestResultStatus};
use certa_utils::{CertaError, CertaResult};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub(crate) struct TestResultRow {
    pub id: Uuid,
    pub lot_id: Uuid,
    pub test_name: String,
    pub value: String,
    pub status: String,
    pub confidence: Option<f64>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub specification: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TestResultRow> for TestResult {
    type Error = CertaError;

    fn try_from(row: TestResultRow) -> Result<Self, Self::Error> {
        let status = TestResultStatus::from_str(&row.status).ok_or_else(|| {
            CertaError::database(format!(
                "test result {} has unknown status '{}'",
                row.id, row.status
            ))
        })?;

        Ok(TestResult {
            id: row.id,
            lot_id: row.lot_id,
            test_name: row.test_name,
            value: row.value,
            status,
            confidence: row.confidence,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            notes: row.notes,
            specification: row.specification,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct TestResultRepository {
    pool: PgPool,
}

impl TestResultRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, result: &TestResult) -> CertaResult<()> {
        sqlx::query(
            r#"
            INSERT INTO test_results (id, lot_id, test_name, value, status, confidence,
                                      approved_by, approved_at, notes, specification,
                                      created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(result.id)
        .bind(result.lot_id)
        .bind(&result.test_name)
        .bind(&result.value)
        .bind(result.status.to_string())
        .bind(result.confidence)
        .bind(&result.approved_by)
        .bind(result.approved_at)
        .bind(&result.notes)
        .bind(&result.specification)
        .bind(result.created_at)
        .bind(result.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> CertaResult<Option<TestResult>> {
        let row = sqlx::query_as::<_, TestResultRow>(
            r#"
            SELECT id, lot_id, test_name, value, status, confidence, approved_by,
                   approved_at, notes, specification, created_at, updated_at
            FROM test_results
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TestResult::try_from).transpose()
    }

    pub async fn find_by_lot(&self, lot_id: Uuid) -> CertaResult<Vec<TestResult>> {
        let rows = sqlx::query_as::<_, TestResultRow>(
            r#"
            SELECT id, lot_id, test_name, value, status, confidence, approved_by,
                   approved_at, notes, specification, created_at, updated_at
            FROM test_results
            WHERE lot_id = $1
            ORDER BY created_at, test_name
            "#,
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TestResult::try_from).collect()
    }

    pub async fn update(&self, result: &TestResult) -> CertaResult<()> {
        let outcome = sqlx::query(
            r#"
            UPDATE test_results
            SET test_name = $2, value = $3, status = $4, confidence = $5,
                approved_by = $6, approved_at = $7, notes = $8, specification = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(result.id)
        .bind(&result.test_name)
        .bind(&result.value)
        .bind(result.status.to_string())
        .bind(result.confidence)
        .bind(&result.approved_by)
        .bind(result.approved_at)
        .bind(&result.notes)
        .bind(&result.specification)
        .bind(result.updated_at)
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(CertaError::not_found(format!("test result {}", result.id)));
        }
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> CertaResult<()> {
        let outcome = sqlx::query("DELETE FROM test_results WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if outcome.rows_affected() == 0 {
            return Err(CertaError::not_found(format!("test result {id}")));
        }
        Ok(())
    }
}
