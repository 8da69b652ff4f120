//! Request handlers.
//!
//! This module provides the calculation handler and the health and
//! readiness checks.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use calc_bridge_common::CallError;
use calc_bridge_core::GuestReturn;

use crate::request::CalculateRequest;
use crate::response::ApiResponse;
use crate::state::AppState;

/// Add two numbers through the Wasm module.
///
/// This handler:
/// 1. Validates the body (400 without touching the module)
/// 2. Makes sure the module is ready, initializing it if needed
/// 3. Calls the module's export and maps the outcome to a response
#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn calculate(State(state): State<AppState>, body: Bytes) -> Response {
    let start = Instant::now();

    let request = match CalculateRequest::parse(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejected request body");
            return ApiResponse::error(400, &e.to_string()).into_axum_response();
        }
    };

    let host = state.host();

    if let Err(e) = host.ensure_ready().await {
        error!(error = %e, "Module initialization failed");
        return ApiResponse::error_with_details(500, "Module initialization failed", &e.to_string())
            .into_axum_response();
    }

    let result = host.invoke(request.a, request.b).await;

    let response = match result {
        Ok(GuestReturn::Value(value)) => {
            info!(
                a = request.a,
                b = request.b,
                result = value,
                duration_ms = start.elapsed().as_millis(),
                "Calculation completed"
            );
            ApiResponse::result(value)
        }
        Ok(GuestReturn::Error(message)) => {
            warn!(reason = %message, "Module rejected input");
            ApiResponse::error(400, &message)
        }
        Err(e) => {
            error!(
                error = %e,
                duration_ms = start.elapsed().as_millis(),
                "Calculation failed"
            );
            call_error_to_response(&e)
        }
    };

    response.into_axum_response()
}

/// Seconds a client should wait before retrying a 503.
const RETRY_AFTER_SECS: &str = "1";

/// Convert a [`CallError`] to an HTTP response.
fn call_error_to_response(error: &CallError) -> ApiResponse {
    if error.is_unavailable() {
        return ApiResponse::error(503, "WebAssembly module is not ready")
            .with_header("Retry-After", RETRY_AFTER_SECS);
    }
    ApiResponse::error_with_details(500, "Calculation failed", &error.to_string())
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
///
/// Returns 200 if the module is ready to serve calls, 503 otherwise. Never
/// triggers initialization.
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    let module_state = state.host().state();

    if state.host().is_ready() {
        ApiResponse::json(200, json!({ "status": "ready", "state": module_state }))
            .into_axum_response()
    } else {
        ApiResponse::json(
            503,
            json!({ "status": "not_ready", "state": module_state }),
        )
        .with_header("Retry-After", RETRY_AFTER_SECS)
        .into_axum_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_maps_to_503() {
        let resp = call_error_to_response(&CallError::NotReady);
        assert_eq!(resp.status, 503);
        assert!(
            resp.headers
                .iter()
                .any(|(name, value)| name == "Retry-After" && value == "1")
        );
        assert_eq!(call_error_to_response(&CallError::Terminated).status, 503);
    }

    #[test]
    fn test_call_failures_map_to_500() {
        let resp = call_error_to_response(&CallError::FuelExhausted);
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body["error"], "Calculation failed");

        let resp = call_error_to_response(&CallError::trap("unreachable"));
        assert_eq!(resp.status, 500);
        assert!(resp.body["details"].as_str().unwrap().contains("unreachable"));

        let resp = call_error_to_response(&CallError::Timeout { duration_ms: 1000 });
        assert_eq!(resp.status, 500);
        assert!(resp.headers.is_empty());
    }
}
