//! Result intake.
//!
//! The mutation entry points for test results. Each one applies its change,
//! writes one audit entry, lets the retest workflow react where a value
//! changed, and ends with a lot recompute so the lot status always reflects
//! the data on file. Approved results are immutable; reject them first.

use std::sync::Arc;

use uuid::Uuid;

use certa_models::{AuditAction, AuditChange, TestResult};
use certa_utils::{validate_non_empty, CertaError, CertaResult};

use crate::retest::RetestWorkflow;
use crate::state_machine::LotStateMachine;
use crate::store::{record_audit, AuditSink, LifecycleStore};

pub struct ResultIntake {
    store: Arc<dyn LifecycleStore>,
    audit: Arc<dyn AuditSink>,
    state_machine: Arc<LotStateMachine>,
    retests: Arc<RetestWorkflow>,
}

impl ResultIntake {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        audit: Arc<dyn AuditSink>,
        state_machine: Arc<LotStateMachine>,
        retests: Arc<RetestWorkflow>,
    ) -> Self {
        Self {
            store,
            audit,
            state_machine,
            retests,
        }
    }

    /// Records a new draft result for a lot.
    ///
    /// When no display specification is passed, the matching row from the
    /// lot's products is snapshotted instead. The value is stored exactly
    /// as reported, blanks included.
    pub async fn record_result(
        &self,
        lot_id: Uuid,
        test_name: &str,
        value: &str,
        specification: Option<&str>,
        confidence: Option<f64>,
        actor: &str,
    ) -> CertaResult<TestResult> {
        validate_non_empty("test_name", test_name)?;
        let lot = self.store.fetch_lot(lot_id).await?;

        let specification = match specification {
            Some(spec) => Some(spec.to_string()),
            None => self
                .store
                .specifications_for_lot(lot_id)
                .await?
                .into_iter()
                .find(|s| s.test_name.trim() == test_name.trim())
                .map(|s| s.specification),
        };

        let mut result = TestResult::new(lot_id, test_name.trim(), value);
        result.specification = specification;
        result.confidence = confidence;
        self.store.insert_result(&result).await?;

        tracing::info!(
            result = %result.test_name,
            lot = %lot.reference_number,
            actor,
            "test result recorded"
        );
        record_audit(
            self.audit.as_ref(),
            AuditChange::new("test_results", result.id, AuditAction::Create)
                .with_new(serde_json::json!({
                    "test_name": result.test_name,
                    "value": result.value,
                    "specification": result.specification,
                }))
                .with_actor(actor),
        )
        .await;

        self.state_machine.auto_recompute(lot_id).await?;
        Ok(result)
    }

    /// Rewrites the reported value of a draft result, then lets any pending
    /// retest react to the change before the lot recomputes
    pub async fn update_value(
        &self,
        result_id: Uuid,
        value: &str,
        actor: &str,
    ) -> CertaResult<TestResult> {
        let mut result = self.store.fetch_result(result_id).await?;
        if result.is_approved() {
            return Err(CertaError::validation(
                "status",
                format!(
                    "result {} is approved and cannot be edited, reject it first",
                    result.test_name
                ),
            ));
        }

        let old_value = result.value.clone();
        result.value = value.to_string();
        result.updated_at = chrono::Utc::now();
        self.store.update_result(&result).await?;

        tracing::info!(result = %result.test_name, lot_id = %result.lot_id, actor, "test result value updated");
        record_audit(
            self.audit.as_ref(),
            AuditChange::new("test_results", result.id, AuditAction::Update)
                .with_old(serde_json::json!({ "value": old_value }))
                .with_new(serde_json::json!({ "value": result.value }))
                .with_actor(actor),
        )
        .await;

        self.retests.on_result_updated(result_id).await?;
        self.state_machine.auto_recompute(result.lot_id).await?;
        Ok(result)
    }

    /// Removes a draft result and recomputes the lot
    pub async fn delete_result(
        &self,
        result_id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> CertaResult<()> {
        let result = self.store.fetch_result(result_id).await?;
        if result.is_approved() {
            return Err(CertaError::validation(
                "status",
                format!(
                    "result {} is approved and cannot be deleted, reject it first",
                    result.test_name
                ),
            ));
        }

        self.store.delete_result(result_id).await?;

        tracing::info!(result = %result.test_name, lot_id = %result.lot_id, actor, "test result deleted");
        let mut change = AuditChange::new("test_results", result.id, AuditAction::Delete)
            .with_old(serde_json::json!({
                "test_name": result.test_name,
                "value": result.value,
            }))
            .with_actor(actor);
        if let Some(reason) = reason {
            change = change.with_reason(reason);
        }
        record_audit(self.audit.as_ref(), change).await;

        self.state_machine.auto_recompute(result.lot_id).await?;
        Ok(())
    }
}
