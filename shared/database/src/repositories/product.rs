//! Product repository for PostgreSQL operations
//!
//! Products own their test specifications, so the specification CRUD
//! lives here as well. The one-spec-per-test-per-product rule is
//! enforced by the UNIQUE constraint and surfaced as a conflict.

use certa_models::{Product, ProductTestSpecification};
use certa_utils::{CertaError, CertaResult};
use sqlx::PgPool;
use uuid::Uuid;

pub struct ProductRepository {
    pool: PgPool,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, product: &Product) -> CertaResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, brand, name, flavor, size, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(product.id)
        .bind(&product.brand)
        .bind(&product.name)
        .bind(&product.flavor)
        .bind(&product.size)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> CertaResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, brand, name, flavor, size, created_at, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    pub async fn find_all(&self) -> CertaResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, brand, name, flavor, size, created_at, updated_at
            FROM products
            ORDER BY brand, name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    pub async fn update(&self, product: &Product) -> CertaResult<()> {
        let outcome = sqlx::query(
            r#"
            UPDATE products
            SET brand = $2, name = $3, flavor = $4, size = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(product.id)
        .bind(&product.brand)
        .bind(&product.name)
        .bind(&product.flavor)
        .bind(&product.size)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(CertaError::not_found(format!("product {}", product.id)));
        }
        Ok(())
    }

    /// Deletes a product together with its specifications (cascade)
    pub async fn delete(&self, id: Uuid) -> CertaResult<()> {
        let outcome = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if outcome.rows_affected() == 0 {
            return Err(CertaError::not_found(format!("product {id}")));
        }
        Ok(())
    }

    /// Adds a specification row. A second specification for the same test on
    /// the same product is a conflict, and a test name that is not in the
    /// lab test type catalog is a validation error.
    pub async fn create_specification(
        &self,
        spec: &ProductTestSpecification,
    ) -> CertaResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO product_test_specifications
                (id, product_id, test_name, specification, is_required, notes,
                 min_value, max_value, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(spec.id)
        .bind(spec.product_id)
        .bind(&spec.test_name)
        .bind(&spec.specification)
        .bind(spec.is_required)
        .bind(&spec.notes)
        .bind(spec.min_value)
        .bind(spec.max_value)
        .bind(spec.created_at)
        .bind(spec.updated_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(err) if super::is_unique_violation(&err) => Err(CertaError::conflict(format!(
                "product {} already has a specification for test '{}'",
                spec.product_id, spec.test_name
            ))),
            Err(err) if super::is_foreign_key_violation(&err) => Err(CertaError::validation(
                "test_name",
                format!("'{}' is not a registered lab test type", spec.test_name),
            )),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn specifications_for_product(
        &self,
        product_id: Uuid,
    ) -> CertaResult<Vec<ProductTestSpecification>> {
        let specs = sqlx::query_as::<_, ProductTestSpecification>(
            r#"
            SELECT id, product_id, test_name, specification, is_required, notes,
                   min_value, max_value, created_at, updated_at
            FROM product_test_specifications
            WHERE product_id = $1
            ORDER BY test_name
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(specs)
    }

    pub async fn update_specification(
        &self,
        spec: &ProductTestSpecification,
    ) -> CertaResult<()> {
        let outcome = sqlx::query(
            r#"
            UPDATE product_test_specifications
            SET specification = $2, is_required = $3, notes = $4,
                min_value = $5, max_value = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(spec.id)
        .bind(&spec.specification)
        .bind(spec.is_required)
        .bind(&spec.notes)
        .bind(spec.min_value)
        .bind(spec.max_value)
        .bind(spec.updated_at)
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(CertaError::not_found(format!("specification {}", spec.id)));
        }
        Ok(())
    }

    pub async fn delete_specification(&self, id: Uuid) -> CertaResult<()> {
        let outcome = sqlx::query("DELETE FROM product_test_specifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if outcome.rows_affected() == 0 {
            return Err(CertaError::not_found(format!("specification {id}")));
        }
        Ok(())
    }
}
