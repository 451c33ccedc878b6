use crate::error::{CertaError, CertaResult};
use regex::Regex;
use validator::{Validate, ValidationErrors};

pub fn validate_model<T: Validate>(model: &T) -> CertaResult<()> {
    match model.validate() {
        Ok(()) => Ok(()),
        Err(errors) => {
            let error_messages = format_validation_errors(&errors);
            Err(CertaError::validation("model", error_messages))
        }
    }
}

pub fn format_validation_errors(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();

    for (field, field_errors) in errors.field_errors() {
        for error in field_errors {
            let message = match &error.code {
                std::borrow::Cow::Borrowed("length") => {
                    format!("Length validation failed for field '{}'", field)
                }
                std::borrow::Cow::Borrowed("range") => {
                    format!("Value out of range for field '{}'", field)
                }
                std::borrow::Cow::Borrowed("required") => {
                    format!("Field '{}' is required", field)
                }
                _ => format!("Validation failed for field '{}': {}", field, error.code),
            };
            messages.push(message);
        }
    }

    messages.join(", ")
}

/// Lot and sublot reference numbers: uppercase alphanumeric segments joined
/// by single dashes, e.g. `FLK-2024-0042` or `FLK-2024-0042-R1`.
pub fn validate_reference_number(reference: &str) -> CertaResult<()> {
    let reference_regex = Regex::new(r"^[A-Z0-9]+(-[A-Z0-9]+)*$").unwrap();

    if reference.len() < 3 || reference.len() > 64 {
        return Err(CertaError::validation(
            "reference_number",
            "Reference number must be between 3 and 64 characters",
        ));
    }

    if !reference_regex.is_match(reference) {
        return Err(CertaError::validation(
            "reference_number",
            "Reference number must be uppercase alphanumeric segments joined by dashes",
        ));
    }

    Ok(())
}

pub fn validate_non_empty(field: &str, value: &str) -> CertaResult<()> {
    if value.trim().is_empty() {
        return Err(CertaError::validation(
            field,
            format!("Field '{}' must not be empty", field),
        ));
    }

    Ok(())
}

pub fn validate_uuid(uuid_str: &str) -> CertaResult<uuid::Uuid> {
    uuid::Uuid::parse_str(uuid_str)
        .map_err(|_| CertaError::validation("uuid", "Invalid UUID format"))
}

pub fn validate_date_range(start_date: chrono::DateTime<chrono::Utc>, end_date: chrono::DateTime<chrono::Utc>) -> CertaResult<()> {
    if start_date >= end_date {
        return Err(CertaError::validation(
            "date_range",
            "Start date must be before end date",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_reference_number_valid() {
        assert!(validate_reference_number("FLK-2024-0042").is_ok());
        assert!(validate_reference_number("BATCH01").is_ok());
        assert!(validate_reference_number("FLK-2024-0042-R1").is_ok());
    }

    #[test]
    fn test_validate_reference_number_invalid() {
        assert!(validate_reference_number("").is_err());
        assert!(validate_reference_number("ab").is_err());
        assert!(validate_reference_number("flk-2024").is_err());
        assert!(validate_reference_number("FLK--2024").is_err());
        assert!(validate_reference_number("-FLK-2024").is_err());
    }

    #[test]
    fn test_validate_non_empty() {
        assert!(validate_non_empty("reason", "needs retest").is_ok());
        assert!(validate_non_empty("reason", "   ").is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_validate_date_range() {
        let start = chrono::Utc::now();
        let end = start + chrono::Duration::days(365);
        assert!(validate_date_range(start, end).is_ok());
        assert!(validate_date_range(end, start).is_err());
    }

    proptest::proptest! {
        #[test]
        fn reference_numbers_from_grammar_always_validate(
            segments in proptest::collection::vec("[A-Z0-9]{2,8}", 1..4)
        ) {
            let reference = segments.join("-");
            if reference.len() >= 3 && reference.len() <= 64 {
                proptest::prop_assert!(validate_reference_number(&reference).is_ok());
            }
        }

        #[test]
        fn lowercase_references_never_validate(reference in "[a-z]{3,20}") {
            proptest::prop_assert!(validate_reference_number(&reference).is_err());
        }
    }
}
