//! Lab test type catalog repository

use certa_models::LabTestType;
use certa_utils::{CertaError, CertaResult};
use sqlx::PgPool;
use uuid::Uuid;

pub struct LabTestTypeRepository {
    pool: PgPool,
}

impl LabTestTypeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Registers a test type; names are unique across the catalog
    pub async fn create(&self, test_type: &LabTestType) -> CertaResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO lab_test_types (id, name, category, unit, method, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(test_type.id)
        .bind(&test_type.name)
        .bind(&test_type.category)
        .bind(&test_type.unit)
        .bind(&test_type.method)
        .bind(test_type.created_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(err) if super::is_unique_violation(&err) => Err(CertaError::conflict(format!(
                "lab test type '{}' already exists",
                test_type.name
            ))),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> CertaResult<Option<LabTestType>> {
        let test_type = sqlx::query_as::<_, LabTestType>(
            r#"
            SELECT id, name, category, unit, method, created_at
            FROM lab_test_types
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(test_type)
    }

    pub async fn find_by_name(&self, name: &str) -> CertaResult<Option<LabTestType>> {
        let test_type = sqlx::query_as::<_, LabTestType>(
            r#"
            SELECT id, name, category, unit, method, created_at
            FROM lab_test_types
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(test_type)
    }

    pub async fn find_all(&self) -> CertaResult<Vec<LabTestType>> {
        let test_types = sqlx::query_as::<_, LabTestType>(
            r#"
            SELECT id, name, category, unit, method, created_at
            FROM lab_test_types
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(test_types)
    }

    /// Deletes a test type. Refused while any product specification still
    /// references the name; the FK on product_test_specifications backs
    /// this check up at the database level.
    pub async fn delete(&self, id: Uuid) -> CertaResult<()> {
        let test_type = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| CertaError::not_found(format!("lab test type {id}")))?;

        let references: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM product_test_specifications WHERE test_name = $1",
        )
        .bind(&test_type.name)
        .fetch_one(&self.pool)
        .await?;

        if references > 0 {
            return Err(CertaError::validation(
                "name",
                format!(
                    "lab test type '{}' is referenced by {} product specification(s)",
                    test_type.name, references
                ),
            ));
        }

        let outcome = sqlx::query("DELETE FROM lab_test_types WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(err) if super::is_foreign_key_violation(&err) => Err(CertaError::validation(
                "name",
                format!(
                    "lab test type '{}' is still referenced by product specifications",
                    test_type.name
                ),
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Renames a test type; specification rows follow via ON UPDATE CASCADE
    pub async fn rename(&self, id: Uuid, new_name: &str) -> CertaResult<()> {
        let outcome = sqlx::query("UPDATE lab_test_types SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(new_name)
            .execute(&self.pool)
            .await;

        match outcome {
            Ok(result) if result.rows_affected() == 0 => {
                Err(CertaError::not_found(format!("lab test type {id}")))
            }
            Ok(_) => Ok(()),
            Err(err) if super::is_unique_violation(&err) => Err(CertaError::conflict(format!(
                "lab test type '{new_name}' already exists"
            ))),
            Err(err) => Err(err.into()),
        }
    }
}
