use anyhow::Result;
use sqlx::PgPool;

pub async fn run_postgres_migrations(pool: &PgPool) -> Result<()> {
    tracing::info!("Running PostgreSQL migrations");

    // Create products table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            brand VARCHAR NOT NULL,
            name VARCHAR NOT NULL,
            flavor VARCHAR,
            size VARCHAR,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create lab_test_types table; specifications reference tests by name
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lab_test_types (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name VARCHAR NOT NULL UNIQUE,
            category VARCHAR,
            unit VARCHAR,
            method VARCHAR,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create product_test_specifications table. The name FK blocks deleting
    // a lab test type that still has specifications.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_test_specifications (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            product_id UUID NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            test_name VARCHAR NOT NULL REFERENCES lab_test_types(name) ON UPDATE CASCADE,
            specification VARCHAR NOT NULL,
            is_required BOOLEAN NOT NULL DEFAULT TRUE,
            notes VARCHAR,
            min_value DOUBLE PRECISION,
            max_value DOUBLE PRECISION,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (product_id, test_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create lots table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lots (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            reference_number VARCHAR NOT NULL UNIQUE,
            status VARCHAR NOT NULL DEFAULT 'awaiting_results',
            lot_type VARCHAR NOT NULL DEFAULT 'standard',
            generate_coa BOOLEAN NOT NULL DEFAULT TRUE,
            has_pending_retest BOOLEAN NOT NULL DEFAULT FALSE,
            rejection_reason VARCHAR,
            override_reason VARCHAR,
            mfg_date DATE,
            exp_date DATE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create lot_products join table; composite lots carry several products
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lot_products (
            lot_id UUID NOT NULL REFERENCES lots(id) ON DELETE CASCADE,
            product_id UUID NOT NULL REFERENCES products(id),
            PRIMARY KEY (lot_id, product_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create sublots table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sublots (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            lot_id UUID NOT NULL REFERENCES lots(id) ON DELETE CASCADE,
            reference_number VARCHAR NOT NULL,
            quantity DOUBLE PRECISION,
            notes VARCHAR,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create test_results table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS test_results (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            lot_id UUID NOT NULL REFERENCES lots(id) ON DELETE CASCADE,
            test_name VARCHAR NOT NULL,
            value VARCHAR NOT NULL DEFAULT '',
            status VARCHAR NOT NULL DEFAULT 'draft',
            confidence DOUBLE PRECISION,
            approved_by VARCHAR,
            approved_at TIMESTAMPTZ,
            notes TEXT,
            specification VARCHAR,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create retest_requests table; the per-lot reference is unique so two
    // writers can never mint the same suffix
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS retest_requests (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            lot_id UUID NOT NULL REFERENCES lots(id) ON DELETE CASCADE,
            reference VARCHAR NOT NULL,
            status VARCHAR NOT NULL DEFAULT 'pending',
            reason TEXT NOT NULL,
            requested_by VARCHAR NOT NULL,
            completed_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (lot_id, reference)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create retest_items table. test_result_id deliberately has no FK:
    // a snapshot must survive deletion of the result it was taken from.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS retest_items (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            retest_request_id UUID NOT NULL REFERENCES retest_requests(id) ON DELETE CASCADE,
            test_result_id UUID NOT NULL,
            original_value VARCHAR NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create audit_log table (append only)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            table_name VARCHAR NOT NULL,
            record_id UUID NOT NULL,
            action VARCHAR NOT NULL,
            old_values JSONB,
            new_values JSONB,
            actor VARCHAR,
            reason VARCHAR,
            hash VARCHAR NOT NULL,
            previous_hash VARCHAR,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_specifications_product_id ON product_test_specifications(product_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_test_results_lot_id ON test_results(lot_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_retest_requests_lot_id ON retest_requests(lot_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_retest_items_request_id ON retest_items(retest_request_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_retest_items_result_id ON retest_items(test_result_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_log_record ON audit_log(table_name, record_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log(created_at)")
        .execute(pool)
        .await?;

    tracing::info!("PostgreSQL migrations completed successfully");
    Ok(())
}
