//! Repository module for database CRUD operations
//!
//! Typed repositories for the catalog and lifecycle entities. Lifecycle
//! workflows go through the port implementations in [`crate::store`];
//! these repositories serve embedders and administrative tooling.

pub mod audit;
pub mod lot;
pub mod product;
pub mod result;
pub mod retest;
pub mod test_type;

pub use audit::{AuditRepository, ChainVerification};
pub use lot::LotRepository;
pub use product::ProductRepository;
pub use result::TestResultRepository;
pub use retest::RetestRepository;
pub use test_type::LabTestTypeRepository;

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503"))
}
