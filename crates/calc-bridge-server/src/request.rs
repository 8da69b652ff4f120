//! Request parsing for `POST /calculate`.
//!
//! The body is validated here, before the module is touched: both operands
//! must be present and must be JSON numbers.

use bytes::Bytes;
use serde_json::Value;

/// Validated calculation request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalculateRequest {
    /// First operand.
    pub a: f64,
    /// Second operand.
    pub b: f64,
}

/// Why a request body was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The body is not a JSON object.
    #[error("Request body must be a JSON object")]
    NotAnObject,

    /// `a` or `b` is absent (or `null`).
    #[error("Both 'a' and 'b' are required")]
    Missing,

    /// The named field is present but not a number.
    #[error("'{0}' must be a number")]
    NotANumber(&'static str),
}

impl CalculateRequest {
    /// Parse and validate a request body.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first problem found.
    pub fn parse(body: &Bytes) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|_| ValidationError::NotAnObject)?;
        let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

        let a = object.get("a").filter(|v| !v.is_null());
        let b = object.get("b").filter(|v| !v.is_null());
        let (Some(a), Some(b)) = (a, b) else {
            return Err(ValidationError::Missing);
        };

        Ok(Self {
            a: number(a, "a")?,
            b: number(b, "b")?,
        })
    }
}

fn number(value: &Value, field: &'static str) -> Result<f64, ValidationError> {
    value.as_f64().ok_or(ValidationError::NotANumber(field))
}
