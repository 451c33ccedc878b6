//! Audit repository
//!
//! Append-only hash-chained audit log. Appends serialize on a Postgres
//! advisory lock so concurrent writers cannot fork the chain.

use certa_models::{AuditAction, AuditChange, AuditRecord};
use certa_utils::CertaResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub(crate) struct AuditRow {
    pub id: Uuid,
    pub table_name: String,
    pub record_id: Uuid,
    pub action: String,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub hash: String,
    pub previous_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditRecord {
    fn from(row: AuditRow) -> Self {
        AuditRecord {
            id: row.id,
            table_name: row.table_name,
            record_id: row.record_id,
            // An unparseable action shows up as a broken hash during
            // verification, so a default here cannot hide tampering
            action: AuditAction::from_str(&row.action).unwrap_or(AuditAction::Update),
            old_values: row.old_values,
            new_values: row.new_values,
            actor: row.actor,
            reason: row.reason,
            hash: row.hash,
            previous_hash: row.previous_hash,
            created_at: row.created_at,
        }
    }
}

/// Outcome of a full chain walk
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerification {
    pub is_valid: bool,
    pub entries_verified: usize,
    pub broken_links: Vec<Uuid>,
}

pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends a change onto the chain (immutable, no update/delete)
    pub async fn append(&self, change: AuditChange) -> CertaResult<AuditRecord> {
        let mut tx = self.pool.begin().await?;

        // Serialize appends so the chain tip cannot move between the
        // read below and our insert
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('audit_log'))")
            .execute(&mut *tx)
            .await?;

        let previous_hash: Option<String> = sqlx::query_scalar(
            "SELECT hash FROM audit_log ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let record = AuditRecord::new(change, previous_hash);

        sqlx::query(
            r#"
            INSERT INTO audit_log
                (id, table_name, record_id, action, old_values, new_values,
                 actor, reason, hash, previous_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(&record.table_name)
        .bind(record.record_id)
        .bind(record.action.to_string())
        .bind(&record.old_values)
        .bind(&record.new_values)
        .bind(&record.actor)
        .bind(&record.reason)
        .bind(&record.hash)
        .bind(&record.previous_hash)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    /// History of a single record, oldest first
    pub async fn find_by_record(
        &self,
        table_name: &str,
        record_id: Uuid,
    ) -> CertaResult<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, table_name, record_id, action, old_values, new_values,
                   actor, reason, hash, previous_hash, created_at
            FROM audit_log
            WHERE table_name = $1 AND record_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(table_name)
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditRecord::from).collect())
    }

    pub async fn find_recent(&self, limit: i64) -> CertaResult<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, table_name, record_id, action, old_values, new_values,
                   actor, reason, hash, previous_hash, created_at
            FROM audit_log
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditRecord::from).collect())
    }

    /// Walks the whole chain checking per-record integrity and the link
    /// from each record to its predecessor
    pub async fn verify_chain(&self) -> CertaResult<ChainVerification> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, table_name, record_id, action, old_values, new_values,
                   actor, reason, hash, previous_hash, created_at
            FROM audit_log
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut broken_links = Vec::new();
        let mut expected_previous: Option<String> = None;

        for row in &rows {
            let record = AuditRecord::from(row.clone());
            if !record.verify_integrity() || record.previous_hash != expected_previous {
                broken_links.push(record.id);
            }
            expected_previous = Some(row.hash.clone());
        }

        Ok(ChainVerification {
            is_valid: broken_links.is_empty(),
            entries_verified: rows.len(),
            broken_links,
        })
    }
}
