//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::session::MAX_TEXT_LEN;

/// Validates that a free-text field holds something besides whitespace and
/// stays within [`MAX_TEXT_LEN`].
///
/// # Examples
///
/// ```ignore
/// validate_not_blank("Login flow") // Ok
/// validate_not_blank("   ")        // Err - blank
/// ```
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Value must not be empty or whitespace only".into());
        return Err(err);
    }

    let length = trimmed.chars().count();
    if length > MAX_TEXT_LEN {
        let mut err = ValidationError::new("too_long");
        err.message = Some(
            format!("Value must be at most {MAX_TEXT_LEN} characters (got {length})").into(),
        );
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_blank_valid() {
        assert!(validate_not_blank("Alice").is_ok());
        assert!(validate_not_blank("  padded  ").is_ok());
    }

    #[test]
    fn test_validate_not_blank_blank() {
        assert!(validate_not_blank("").is_err());
        assert!(validate_not_blank(" \t\n").is_err());
    }

    #[test]
    fn test_validate_not_blank_too_long() {
        let long = "x".repeat(MAX_TEXT_LEN + 1);
        assert!(validate_not_blank(&long).is_err());
        assert!(validate_not_blank(&"x".repeat(MAX_TEXT_LEN)).is_ok());
    }
}
