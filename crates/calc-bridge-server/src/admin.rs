//! Admin API handlers for module management.
//!
//! # Authentication
//!
//! All Admin API endpoints require the `X-Admin-Token` header
//! to match the configured admin token. Tokens are compared in constant time.
//!
//! # Endpoints
//!
//! - `GET /admin/status` - Module state, counters and recent guest logs
//! - `POST /admin/reset` - Drop the running module; the next request reloads it

use axum::{
    Extension, Json, Router,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

use calc_bridge_core::{LogEntry, ModuleState};

use crate::state::AppState;

/// Admin API state containing app state and auth token.
#[derive(Clone)]
pub struct AdminState {
    /// Application state.
    pub app_state: AppState,
    /// Expected admin token for authentication.
    pub admin_token: String,
}

/// Module status for API responses.
#[derive(Debug, Serialize)]
pub struct ModuleStatus {
    /// Lifecycle state.
    pub state: ModuleState,
    /// Whether the module can serve calls right now.
    pub ready: bool,
    /// Initialization attempts started since boot.
    pub initializations: u64,
    /// Identifier of the running instance.
    pub runtime_id: Option<String>,
    /// Process mode.
    pub mode: String,
    /// Registered export names.
    pub exports: Vec<String>,
    /// Recent guest log lines, oldest first.
    pub guest_logs: Vec<GuestLogLine>,
}

/// One guest log line.
#[derive(Debug, Serialize)]
pub struct GuestLogLine {
    /// Log level.
    pub level: String,
    /// Message text.
    pub message: String,
}

impl From<&LogEntry> for GuestLogLine {
    fn from(entry: &LogEntry) -> Self {
        Self {
            level: entry.level.to_string(),
            message: entry.message.clone(),
        }
    }
}

/// Build the Admin API router.
///
/// Returns a router that uses Extension to pass the admin state,
/// allowing it to be nested into routers with different state types.
pub fn build_admin_router(admin_state: AdminState) -> Router<AppState> {
    Router::new()
        .route("/status", get(module_status))
        .route("/reset", post(reset_module))
        .layer(Extension(admin_state))
}

/// Verify the admin token from request headers.
fn verify_token(headers: &HeaderMap, expected: &str) -> Result<(), (StatusCode, &'static str)> {
    let Some(token) = headers.get("X-Admin-Token") else {
        return Err((StatusCode::UNAUTHORIZED, "Missing X-Admin-Token header"));
    };

    if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "Invalid admin token"))
    }
}

/// Report the module's status.
///
/// # Request
///
/// `GET /admin/status`
///
/// # Response
///
/// ```json
/// {
///   "state": "ready",
///   "ready": true,
///   "initializations": 1,
///   "runtime_id": "0b6f...",
///   "mode": "development",
///   "exports": ["add"],
///   "guest_logs": [{ "level": "INFO", "message": "Guest module initialized" }]
/// }
/// ```
#[instrument(skip(admin_state, headers))]
pub async fn module_status(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = verify_token(&headers, &admin_state.admin_token) {
        warn!("Rejected admin request");
        return e.into_response();
    }

    let host = admin_state.app_state.host();
    let mut exports = host.registry().names();
    exports.sort();

    Json(ModuleStatus {
        state: host.state(),
        ready: host.is_ready(),
        initializations: host.initializations(),
        runtime_id: host.runtime_id(),
        mode: host.mode().to_string(),
        exports,
        guest_logs: host.guest_logs().iter().map(GuestLogLine::from).collect(),
    })
    .into_response()
}

/// Force a reset of the module.
///
/// # Request
///
/// `POST /admin/reset`
///
/// # Response
///
/// ```json
/// {
///   "dropped": true,
///   "message": "Module reset"
/// }
/// ```
#[instrument(skip(admin_state, headers))]
pub async fn reset_module(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = verify_token(&headers, &admin_state.admin_token) {
        warn!("Rejected admin request");
        return e.into_response();
    }

    let dropped = admin_state.app_state.host().reset().await;
    info!(dropped, "Module reset via Admin API");

    Json(serde_json::json!({
        "dropped": dropped,
        "message": "Module reset"
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_token_valid() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Admin-Token", "secret".parse().unwrap());

        let result = verify_token(&headers, "secret");
        assert!(result.is_ok());
    }

    #[test]
    fn test_verify_token_invalid() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Admin-Token", "wrong".parse().unwrap());

        let result = verify_token(&headers, "secret");
        assert_eq!(result.unwrap_err().0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_verify_token_prefix_is_not_enough() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Admin-Token", "sec".parse().unwrap());

        assert!(verify_token(&headers, "secret").is_err());
    }

    #[test]
    fn test_verify_token_missing() {
        let headers = HeaderMap::new();

        let result = verify_token(&headers, "secret");
        assert_eq!(
            result.unwrap_err(),
            (StatusCode::UNAUTHORIZED, "Missing X-Admin-Token header")
        );
    }
}
