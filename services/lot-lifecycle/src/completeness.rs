//! Completeness evaluation.
//!
//! Answers "does this lot have every required test on file?" by unioning
//! the specification rows of every product attached to the lot against the
//! results recorded so far. Only presence counts here; whether values pass
//! their specifications is the state machine's concern.

use std::collections::BTreeSet;

use certa_models::{LotStatus, ProductTestSpecification, TestResult};

#[derive(Debug, Clone, PartialEq)]
pub struct CompletenessReport {
    pub is_complete: bool,
    /// Required test names with no recorded value, sorted
    pub missing_required: Vec<String>,
    /// Optional test names that do have a recorded value, sorted
    pub present_optional: Vec<String>,
    pub recommendation: LotStatus,
}

pub struct CompletenessEvaluator;

impl CompletenessEvaluator {
    /// Pure and idempotent; callers pass the lot's unioned specification
    /// rows and its recorded results.
    pub fn evaluate(
        specifications: &[ProductTestSpecification],
        results: &[TestResult],
    ) -> CompletenessReport {
        // A test required by any attached product is required for the lot,
        // even if another product lists it as optional
        let mut required: BTreeSet<&str> = BTreeSet::new();
        let mut optional: BTreeSet<&str> = BTreeSet::new();
        for spec in specifications {
            let name = spec.test_name.trim();
            if name.is_empty() {
                continue;
            }
            if spec.is_required {
                optional.remove(name);
                required.insert(name);
            } else if !required.contains(name) {
                optional.insert(name);
            }
        }

        let present: BTreeSet<&str> = results
            .iter()
            .filter(|r| r.has_value())
            .map(|r| r.test_name.trim())
            .collect();

        let missing_required: Vec<String> = required
            .iter()
            .filter(|name| !present.contains(**name))
            .map(|name| name.to_string())
            .collect();

        let present_optional: Vec<String> = optional
            .iter()
            .filter(|name| present.contains(**name))
            .map(|name| name.to_string())
            .collect();

        let is_complete = missing_required.is_empty();

        // A lot with nothing recorded yet stays in its intake state even
        // when no specification requires anything
        let recommendation = if results.is_empty() {
            LotStatus::AwaitingResults
        } else if !is_complete {
            LotStatus::PartialResults
        } else {
            LotStatus::UnderReview
        };

        CompletenessReport {
            is_complete,
            missing_required,
            present_optional,
            recommendation,
        }
    }
}
