//! Product catalog models.
//!
//! Products own their test specifications; lab test types are the canonical
//! test definitions that specifications and results reference by name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Validate, PartialEq)]
pub struct Product {
    pub id: Uuid,
    #[validate(length(min = 1, max = 100, message = "Brand is required"))]
    pub brand: String,
    #[validate(length(min = 1, max = 200, message = "Product name is required"))]
    pub name: String,
    #[validate(length(max = 100))]
    pub flavor: Option<String>,
    #[validate(length(max = 50))]
    pub size: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Canonical test definition, referenced by specifications and results by name
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Validate, PartialEq)]
pub struct LabTestType {
    pub id: Uuid,
    #[validate(length(min = 1, max = 100, message = "Test name is required"))]
    pub name: String,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    #[validate(length(max = 20))]
    pub unit: Option<String>,
    #[validate(length(max = 100))]
    pub method: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One requirement row: which test a product needs and the limit it must meet.
/// Unique per (product_id, test_name).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Validate, PartialEq)]
pub struct ProductTestSpecification {
    pub id: Uuid,
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 100, message = "Test name is required"))]
    pub test_name: String,
    /// Free-text limit expression, e.g. `< 10000`, `10-100`, `Absent`
    #[validate(length(min = 1, max = 200, message = "Specification is required"))]
    pub specification: String,
    pub is_required: bool,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Product {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            brand: String::new(),
            name: String::new(),
            flavor: None,
            size: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Product {
    pub fn new(brand: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            brand: brand.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Human-readable label, e.g. "Flakes Whey Isolate Vanilla 2lb"
    pub fn display_name(&self) -> String {
        let mut parts = vec![self.brand.as_str(), self.name.as_str()];
        if let Some(flavor) = &self.flavor {
            parts.push(flavor);
        }
        if let Some(size) = &self.size {
            parts.push(size);
        }
        parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl LabTestType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category: None,
            unit: None,
            method: None,
            created_at: Utc::now(),
        }
    }
}

impl ProductTestSpecification {
    pub fn new(
        product_id: Uuid,
        test_name: impl Into<String>,
        specification: impl Into<String>,
        is_required: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            test_name: test_name.into(),
            specification: specification.into(),
            is_required,
            notes: None,
            min_value: None,
            max_value: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
