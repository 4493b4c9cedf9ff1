use crate::error::ApiError;

pub fn validate_weeks(value: u8, max_weeks: u8) -> Result<u8, ApiError> {
    if (1..=max_weeks).contains(&value) {
        Ok(value)
    } else {
        Err(ApiError::bad_request(format!(
            "weeks must be between 1 and {max_weeks}"
        )))
    }
}
