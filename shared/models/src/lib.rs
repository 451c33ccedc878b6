//! # Certa Core Domain Models
//!
//! Core domain models for the Certa laboratory sample tracking system.
//! All models implement serialization/deserialization with serde and
//! validation with the validator crate.
//!
//! ## Key Models
//!
//! - **Product / LabTestType / ProductTestSpecification**: the catalog of
//!   what must be tested and to what limit
//! - **Lot / Sublot**: a manufacturing or sample batch moving through the
//!   release workflow, plus its child batches
//! - **TestResult**: one measured value for one test on one lot, with its
//!   own draft/approved lifecycle
//! - **RetestRequest / RetestItem**: re-examination of disputed results,
//!   with immutable original-value snapshots
//! - **AuditRecord**: append-only, hash-chained change history
//!
//! ## Status Enumerations
//!
//! `LotStatus` carries the legal transition table for manual status changes;
//! `TestResultStatus` and `RetestStatus` are the smaller per-entity
//! lifecycles. All three round-trip through their lowercase string forms
//! for storage.

pub mod audit;
pub mod lot;
pub mod product;
pub mod result;
pub mod retest;


pub use audit::*;
pub use lot::*;
pub use product::*;
pub use result::*;
pub use retest::*;
