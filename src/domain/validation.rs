use crate::domain::errors::{AuthError, PurchaseError};

const MIN_PASSWORD_LEN: usize = 6;
const MIN_USERNAME_LEN: usize = 3;
const MIN_PHONE_LEN: usize = 10;

pub fn validate_email(value: &str) -> Result<String, AuthError> {
    let value = value.trim();
    let (local, domain) = value.split_once('@').ok_or(AuthError::InvalidEmail)?;
    if local.is_empty()
        || domain.is_empty()
        || domain.contains('@')
        || value.chars().any(char::is_whitespace)
    {
        return Err(AuthError::InvalidEmail);
    }
    Ok(value.to_string())
}

pub fn validate_password(value: &str) -> Result<(), AuthError> {
    if value.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidPassword);
    }
    Ok(())
}

pub fn validate_username(value: &str) -> Result<String, AuthError> {
    let value = value.trim();
    if value.chars().count() < MIN_USERNAME_LEN {
        return Err(AuthError::InvalidUsername);
    }
    Ok(value.to_string())
}

// Optional leading '+', then digits and the usual separators.
pub fn validate_phone_number(value: &str) -> Result<String, PurchaseError> {
    if value.chars().count() < MIN_PHONE_LEN {
        return Err(PurchaseError::InvalidPhoneNumber);
    }
    let body = value.strip_prefix('+').unwrap_or(value);
    if body.is_empty()
        || !body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'))
    {
        return Err(PurchaseError::InvalidPhoneNumber);
    }
    Ok(value.to_string())
}
