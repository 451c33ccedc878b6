//! # Certa Lot Lifecycle Engine
//!
//! Drives a laboratory sample lot from intake to release. The engine owns
//! the compliance rules (specification matching, completeness, the lot
//! status machine) and the QC workflows (result approval, retesting); it
//! talks to the outside world only through the ports in [`store`].
//!
//! ## Components
//!
//! - **SpecificationMatcher**: evaluates a reported value against a
//!   free-text specification
//! - **CompletenessEvaluator**: checks required-test coverage for a lot
//! - **LotStateMachine**: manual status transitions and automatic
//!   recomputation, serialized per lot
//! - **ApprovalWorkflow**: per-result approval, rejection, bulk approval,
//!   and the release pre-flight check
//! - **RetestWorkflow**: snapshot-based re-measurement tracking
//! - **ResultIntake**: result create/update/delete entry points
//! - **LifecycleEngine**: facade wiring all of the above over one store
//!
//! The in-memory port implementations in [`memory`] make the whole engine
//! runnable in tests without a database; `certa-database` provides the
//! Postgres-backed ones.

pub mod approval;
pub mod completeness;
pub mod engine;
pub mod matching;
pub mod memory;
pub mod results;
pub mod retest;
pub mod state_machine;
pub mod store;

pub use approval::{ApprovalReadiness, ApprovalWorkflow, BulkApprovalFailure, BulkApprovalOutcome};
pub use completeness::{CompletenessEvaluator, CompletenessReport};
pub use engine::LifecycleEngine;
pub use matching::{MatchOutcome, MatchRule, SpecificationMatcher};
pub use memory::{InMemoryStore, StaticApprovalPolicy};
pub use results::ResultIntake;
pub use retest::RetestWorkflow;
pub use state_machine::{LotLockRegistry, LotStateMachine, OVERRIDE_PREFIX};
pub use store::{ApprovalPolicy, AuditSink, LifecycleStore};
