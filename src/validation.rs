use once_cell::sync::Lazy;
use regex::Regex;
use rocket::serde::json::Json;
use validator::{Validate, ValidationError};

use crate::error::AppError;

/// `YYYY-MM-DDTHH:MM`, seconds optional, as produced by datetime-local inputs.
pub static LOCAL_DATETIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(:\d{2})?$").expect("valid regex"));

pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> Result<T, AppError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn validate_custom(self) -> Result<T, AppError> {
        let inner = self.into_inner();
        inner.validate()?;
        Ok(inner)
    }
}

pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("blank");
        error.message = Some("must not be blank".into());
        return Err(error);
    }
    Ok(())
}
