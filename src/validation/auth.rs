use garde::Validate;

use crate::error::{AppError, Result};

/// The longest account number accepted (IBAN upper bound).
const MAX_BANK_ACCOUNT_LEN: usize = 34;

/// Runs the derived `garde` rules of a request payload.
pub fn validate_payload<T>(payload: &T) -> Result<()>
where
    T: Validate,
    T::Context: Default,
{
    payload
        .validate()
        .map_err(|report| AppError::Validation(report.to_string()))
}

/// Validates a bank account number: letters and digits, spaces allowed as separators.
pub fn validate_bank_account(value: &str) -> Result<()> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();

    if compact.is_empty() {
        return Err(AppError::Validation(
            "Bank account cannot be empty".to_string(),
        ));
    }

    if compact.len() > MAX_BANK_ACCOUNT_LEN {
        return Err(AppError::Validation(format!(
            "Bank account must be at most {} characters",
            MAX_BANK_ACCOUNT_LEN
        )));
    }

    if !compact.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::Validation(
            "Bank account can only contain letters and digits".to_string(),
        ));
    }

    Ok(())
}
