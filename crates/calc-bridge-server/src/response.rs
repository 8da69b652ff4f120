//! JSON responses.
//!
//! Every endpoint answers with a JSON body built through [`ApiResponse`].

use axum::Json;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

/// A JSON response with a status code and optional extra headers.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Extra response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Value,
}

impl ApiResponse {
    /// Create a JSON response.
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    /// `200 {"result": n}`.
    pub fn result(value: i64) -> Self {
        Self::json(200, json!({ "result": value }))
    }

    /// Create an error response: `{"error": message}`.
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }

    /// Create an error response with details:
    /// `{"error": message, "details": details}`.
    pub fn error_with_details(status: u16, message: &str, details: &str) -> Self {
        Self::json(status, json!({ "error": message, "details": details }))
    }

    /// Add a header to the response.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Convert to Axum response.
    pub fn into_axum_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = (status, Json(self.body)).into_response();

        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().insert(name, value);
            }
        }

        response
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        self.into_axum_response()
    }
}
