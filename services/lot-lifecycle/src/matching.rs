//! Specification matching.
//!
//! Evaluates one reported result value against one product specification
//! string. Specifications are free text entered by QC staff (`< 10000`,
//! `> 2.5`, `10-100`, `Absent`, `Gluten Free`); values are whatever the lab
//! reported (`4500`, `< 10`, `ND`, `Conforms`). Matching never fails and
//! never panics: input that fits no rule passes by default and is logged.
//! That default is a deliberate product decision carried in from QC
//! practice; ambiguous specifications must not block a lot.

/// Which rule decided the outcome, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    /// Value is a categorical negative (`ND`, `Absent`, ...); always passes
    NegativeVocabulary,
    /// Specification `< N`
    BelowLimit,
    /// Specification `> N`
    AboveLimit,
    /// Specification `A-B`
    WithinRange,
    /// Literal case-insensitive equality
    ExactMatch,
    /// Specification mentions absent/negative and the value is categorical
    NegativeKeyword,
    /// Nothing fit; passed by default
    DefaultPass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    pub passed: bool,
    pub rule: MatchRule,
}

impl MatchOutcome {
    fn new(passed: bool, rule: MatchRule) -> Self {
        Self { passed, rule }
    }

    fn pass(rule: MatchRule) -> Self {
        Self::new(true, rule)
    }
}

/// Values labs report when a substance is not present
const NEGATIVE_VOCABULARY: &[&str] = &["nd", "not detected", "absent", "negative", "none", "nil"];

pub struct SpecificationMatcher;

impl SpecificationMatcher {
    /// Does `value` satisfy `specification`?
    pub fn matches(specification: &str, value: &str) -> bool {
        Self::evaluate(specification, value).passed
    }

    /// Like [`Self::matches`] but reports which rule decided
    pub fn evaluate(specification: &str, value: &str) -> MatchOutcome {
        let spec = specification.trim().to_lowercase();
        let val = value.trim().to_lowercase();

        // 1. Categorical negatives pass regardless of the specification
        if is_negative_vocabulary(&val) {
            return MatchOutcome::pass(MatchRule::NegativeVocabulary);
        }

        // 2. Upper limit: `< N`
        if let Some(limit) = spec.strip_prefix('<').and_then(parse_number) {
            // The lab already reporting "below limit" counts as passing
            if val.starts_with('<') {
                return MatchOutcome::pass(MatchRule::BelowLimit);
            }
            if let Some(v) = parse_number(&val) {
                return MatchOutcome::new(v < limit, MatchRule::BelowLimit);
            }
            return Self::keyword_or_default(&spec, &val);
        }

        // 3. Lower limit: `> N`
        if let Some(limit) = spec.strip_prefix('>').and_then(parse_number) {
            if val.starts_with('>') {
                return MatchOutcome::pass(MatchRule::AboveLimit);
            }
            if let Some(v) = parse_number(&val) {
                return MatchOutcome::new(v > limit, MatchRule::AboveLimit);
            }
            return Self::keyword_or_default(&spec, &val);
        }

        // 4. Range: `A-B`. A leading dash is a negative number, not a range.
        if !spec.starts_with('-') {
            if let Some((low, high)) = parse_range(&spec) {
                if let Some(v) = parse_number(&val) {
                    return MatchOutcome::new(low <= v && v <= high, MatchRule::WithinRange);
                }
            }
        }

        // 5. Literal equality
        if spec == val {
            return MatchOutcome::pass(MatchRule::ExactMatch);
        }

        Self::keyword_or_default(&spec, &val)
    }

    fn keyword_or_default(spec: &str, val: &str) -> MatchOutcome {
        // 6. A specification asking for absence accepts categorical negatives
        if (spec.contains("absent") || spec.contains("negative")) && is_negative_vocabulary(val) {
            return MatchOutcome::pass(MatchRule::NegativeKeyword);
        }

        // 7. Nothing fit. Ambiguous specifications never block a result.
        tracing::warn!(
            specification = %spec,
            value = %val,
            "specification fits no matching rule, passing by default"
        );
        MatchOutcome::pass(MatchRule::DefaultPass)
    }
}

fn is_negative_vocabulary(value: &str) -> bool {
    NEGATIVE_VOCABULARY.contains(&value)
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

fn parse_range(spec: &str) -> Option<(f64, f64)> {
    let (low, high) = spec.split_once('-')?;
    Some((parse_number(low)?, parse_number(high)?))
}
