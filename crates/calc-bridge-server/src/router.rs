//! HTTP router configuration.
//!
//! This module provides functions to build the Axum router with all
//! necessary routes and middleware.

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::admin::{AdminState, build_admin_router};
use crate::handler::{calculate, health_check, readiness_check};
use crate::state::AppState;

/// Admin API configuration for router.
#[derive(Debug, Clone)]
pub struct AdminRouterConfig {
    /// Admin API prefix (e.g., "/admin").
    pub prefix: String,
    /// Admin authentication token.
    pub token: String,
}

/// Build the main application router.
///
/// Routes:
/// - `POST /calculate` - Add `a` and `b` through the Wasm module
/// - `GET /health` - Health check
/// - `GET /ready` - Readiness check
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    build_router_with_admin(state, request_timeout, None)
}

/// Build the main application router with optional Admin API.
///
/// # Arguments
///
/// * `state` - Application state
/// * `request_timeout` - Request timeout duration
/// * `admin_config` - Optional Admin API configuration
pub fn build_router_with_admin(
    state: AppState,
    request_timeout: Duration,
    admin_config: Option<AdminRouterConfig>,
) -> Router {
    let mut router = Router::new()
        .route("/calculate", post(calculate))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check));

    if let Some(config) = admin_config {
        let admin_state = AdminState {
            app_state: state.clone(),
            admin_token: config.token,
        };
        router = router.nest(&config.prefix, build_admin_router(admin_state));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use calc_bridge_common::{ModuleConfig, RuntimeConfig};
    use serde_json::Value;
    use tower::util::ServiceExt;

    const GUESTS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../guests/adder");

    fn adder_config() -> RuntimeConfig {
        RuntimeConfig {
            module: ModuleConfig::new(
                format!("{GUESTS}/bridge.toml"),
                format!("{GUESTS}/adder.wat"),
            ),
            ..Default::default()
        }
    }

    fn setup(config: &RuntimeConfig) -> (AppState, Router) {
        let state = AppState::new(config).unwrap();
        let admin = AdminRouterConfig {
            prefix: "/admin".into(),
            token: "secret".into(),
        };
        let router = build_router_with_admin(state.clone(), Duration::from_secs(30), Some(admin));
        (state, router)
    }

    fn post_calculate(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/calculate")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_, app) = setup(&RuntimeConfig::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_before_first_request() {
        let (state, app) = setup(&adder_config());

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()["retry-after"], "1");
        let body = json_body(response).await;
        assert_eq!(body["state"], "uninitialized");
        // Readiness probes never load the module
        assert_eq!(state.host().initializations(), 0);
    }

    #[tokio::test]
    async fn test_calculate_cold_start() {
        let (state, app) = setup(&adder_config());

        let response = app
            .clone()
            .oneshot(post_calculate(r#"{"a": 15, "b": 7}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!({ "result": 22 }));

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.host().initializations(), 1);
    }

    #[tokio::test]
    async fn test_calculate_invalid_input_skips_module() {
        let (state, app) = setup(&adder_config());

        let response = app
            .oneshot(post_calculate(r#"{"a": "hello", "b": 7}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "'a' must be a number");
        assert_eq!(state.host().initializations(), 0);
    }

    #[tokio::test]
    async fn test_calculate_missing_field() {
        let (_, app) = setup(&adder_config());

        let response = app.oneshot(post_calculate(r#"{"a": 1}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "Both 'a' and 'b' are required"
        );
    }

    #[tokio::test]
    async fn test_calculate_init_failure() {
        let config = RuntimeConfig {
            module: ModuleConfig::new("/nonexistent/bridge.toml", "/nonexistent/adder.wasm"),
            ..Default::default()
        };
        let (_, app) = setup(&config);

        let response = app.oneshot(post_calculate(r#"{"a": 1, "b": 2}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Module initialization failed");
        assert!(body["details"].as_str().unwrap().contains("/nonexistent/bridge.toml"));
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let (_, app) = setup(&adder_config());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_status_and_reset() {
        let (state, app) = setup(&adder_config());

        let response = app
            .clone()
            .oneshot(post_calculate(r#"{"a": 1, "b": 2}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/admin/status")
                    .header("X-Admin-Token", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = json_body(response).await;
        assert_eq!(status["state"], "ready");
        assert_eq!(status["initializations"], 1);
        assert_eq!(status["exports"], serde_json::json!(["add"]));
        assert_eq!(status["guest_logs"][0]["message"], "Guest module initialized");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/reset")
                    .header("X-Admin-Token", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["dropped"], true);
        assert!(!state.host().is_ready());

        // Next request reloads
        let response = app
            .oneshot(post_calculate(r#"{"a": -5, "b": 5}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["result"], 0);
        assert_eq!(state.host().initializations(), 2);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (_, app) = setup(&RuntimeConfig::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/functions/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
