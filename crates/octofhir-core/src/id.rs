use thiserror::Error;

/// Maximum length of a FHIR `id` per the base spec (64 characters).
const MAX_ID_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("id must not be empty")]
    Empty,
    #[error("id exceeds {MAX_ID_LEN} characters")]
    TooLong,
    #[error("id contains character not in [A-Za-z0-9-.]: '{0}'")]
    InvalidCharacter(char),
}

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Validates against the FHIR `id` regex `[A-Za-z0-9\-\.]{1,64}` (§3).
pub fn validate_id(id: &str) -> Result<(), IdError> {
    if id.is_empty() {
        return Err(IdError::Empty);
    }
    if id.chars().count() > MAX_ID_LEN {
        return Err(IdError::TooLong);
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '.'))
    {
        return Err(IdError::InvalidCharacter(c));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_validate() {
        let id = generate_id();
        assert!(validate_id(&id).is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(validate_id(""), Err(IdError::Empty));
    }

    #[test]
    fn rejects_too_long() {
        let id = "a".repeat(65);
        assert_eq!(validate_id(&id), Err(IdError::TooLong));
    }

    #[test]
    fn accepts_max_length() {
        let id = "a".repeat(64);
        assert!(validate_id(&id).is_ok());
    }

    #[test]
    fn rejects_invalid_character() {
        assert_eq!(
            validate_id("patient_123"),
            Err(IdError::InvalidCharacter('_'))
        );
    }

    #[test]
    fn accepts_dashes_and_dots() {
        assert!(validate_id("patient-123.v2").is_ok());
    }
}
