use chrono::NaiveDate;
use validator::{ValidateEmail, ValidateLength};

use crate::limits::*;

use super::{EngineError, SchedulingPolicy};

fn too_long(field: &str, max: usize) -> EngineError {
    EngineError::Validation(format!("{field} must be at most {max} characters"))
}

/// Trim a mandatory text field and bound its length.
pub(crate) fn required_text(field: &'static str, value: &str, max: usize) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if !value.validate_length(None, Some(max as u64), None) {
        return Err(too_long(field, max));
    }
    Ok(value.to_string())
}

/// Trim an optional text field; blank counts as absent.
pub(crate) fn optional_text(
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> Result<Option<String>, EngineError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if !v.validate_length(None, Some(max as u64), None) => Err(too_long(field, max)),
        Some(v) => Ok(Some(v.to_string())),
    }
}

pub(crate) fn phone(value: &str) -> Result<String, EngineError> {
    let value = required_text("phone", value, MAX_PHONE_LEN)?;
    let allowed = |c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')');
    if !value.chars().all(allowed) || !value.chars().any(|c| c.is_ascii_digit()) {
        return Err(EngineError::Validation(format!("phone {value:?} is not a phone number")));
    }
    Ok(value)
}

pub(crate) fn email(value: Option<&str>) -> Result<Option<String>, EngineError> {
    let Some(value) = optional_text("email", value, MAX_EMAIL_LEN)? else {
        return Ok(None);
    };
    if !value.validate_email() {
        return Err(EngineError::Validation(format!("email {value:?} is not an address")));
    }
    Ok(Some(value))
}

/// Resolve a requested venue to its configured spelling.
pub(crate) fn venue(policy: &SchedulingPolicy, value: &str) -> Result<String, EngineError> {
    let value = value.trim();
    policy
        .venues
        .iter()
        .find(|v| v.eq_ignore_ascii_case(value))
        .cloned()
        .ok_or_else(|| EngineError::Validation(format!("unknown venue {value:?}")))
}

pub(crate) fn not_past(date: NaiveDate, today: NaiveDate) -> Result<(), EngineError> {
    if date < today {
        return Err(EngineError::Validation(format!(
            "date {date} is in the past"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_trimmed_and_bounded() {
        assert_eq!(required_text("name", "  Ana  ", 10).unwrap(), "Ana");
        assert!(matches!(
            required_text("name", "   ", 10),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            required_text("name", "abcdefghijk", 10),
            Err(EngineError::Validation(_))
        ));
        assert_eq!(required_text("name", "ñññññññññ", 10).unwrap(), "ñññññññññ");
        assert!(matches!(
            optional_text("officiant", Some("abcdefghijk"), 10),
            Err(EngineError::Validation(_))
        ));
        assert_eq!(optional_text("officiant", Some(" "), 10).unwrap(), None);
    }

    #[test]
    fn phone_numbers() {
        assert_eq!(phone("09123456789").unwrap(), "09123456789");
        assert_eq!(phone(" +63 (912) 345-6789 ").unwrap(), "+63 (912) 345-6789");
        assert!(phone("call me").is_err());
        assert!(phone("+-()").is_err());
        assert!(phone("").is_err());
    }

    #[test]
    fn email_addresses() {
        assert_eq!(email(None).unwrap(), None);
        assert_eq!(email(Some("")).unwrap(), None);
        assert_eq!(
            email(Some("juan@example.org")).unwrap().as_deref(),
            Some("juan@example.org")
        );
        for bad in ["juan", "@example.org", "juan@", "juan@@example.org", "ju an@example.org"] {
            assert!(email(Some(bad)).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn venues_resolve_to_configured_spelling() {
        let policy = SchedulingPolicy::default();
        assert_eq!(venue(&policy, "chapel").unwrap(), "Chapel");
        assert_eq!(venue(&policy, " Parish Hall ").unwrap(), "Parish Hall");
        assert!(venue(&policy, "Gymnasium").is_err());
    }

    #[test]
    fn past_dates_rejected() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        assert!(not_past(today, today).is_ok());
        assert!(not_past(today.succ_opt().unwrap(), today).is_ok());
        assert!(not_past(today.pred_opt().unwrap(), today).is_err());
    }
}
