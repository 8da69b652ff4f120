//! End-to-end tests for calc-bridge-server.
//!
//! Each test starts a real server on an ephemeral port and talks to it over
//! HTTP with `reqwest`.

use calc_bridge_common::{ModuleConfig, RuntimeConfig};
use calc_bridge_server::{CalcServer, ServerConfig};
use serde_json::{Value, json};

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

async fn post(url: &str, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{url}/calculate"))
        .json(&body)
        .send()
        .await
        .unwrap();

    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

// ============================================================================
// Test: Calculation
// ============================================================================

#[tokio::test]
async fn test_cold_process_adds() {
    let server = CalcServer::start_test(&adder_config()).await.unwrap();

    let (status, body) = post(&server.url(), json!({ "a": 15, "b": 7 })).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "result": 22 }));

    let (status, body) = post(&server.url(), json!({ "a": -5, "b": 5 })).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "result": 0 }));

    assert_eq!(server.state().host().initializations(), 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_input_is_rejected() {
    let server = CalcServer::start_test(&adder_config()).await.unwrap();

    let (status, body) = post(&server.url(), json!({ "a": "x", "b": 1 })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "'a' must be a number");

    let (status, body) = post(&server.url(), json!({ "b": 1 })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Both 'a' and 'b' are required");

    assert_eq!(server.state().host().initializations(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_cold_requests() {
    let server = CalcServer::start_test(&adder_config()).await.unwrap();
    let url = server.url();

    let requests: Vec<_> = (0..10_i32)
        .map(|i| {
            let url = url.clone();
            tokio::spawn(async move { post(&url, json!({ "a": i, "b": i })).await })
        })
        .collect();

    for (i, request) in (0..10_i64).zip(requests) {
        let (status, body) = request.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body["result"], i * 2);
    }

    assert_eq!(server.state().host().initializations(), 1);
    server.shutdown().await;
}

// ============================================================================
// Test: Initialization Failures
// ============================================================================

#[tokio::test]
async fn test_missing_binary_reports_details() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("bridge.toml");
    std::fs::copy(format!("{GUESTS}/bridge.toml"), &manifest).unwrap();
    let binary = dir.path().join("adder.wat");

    let config = RuntimeConfig {
        module: ModuleConfig::new(&manifest, &binary),
        ..Default::default()
    };
    let server = CalcServer::start_test(&config).await.unwrap();

    let (status, body) = post(&server.url(), json!({ "a": 1, "b": 2 })).await;
    assert_eq!(status, 500);
    assert_eq!(body["error"], "Module initialization failed");
    assert!(body["details"].as_str().unwrap().contains("adder.wat"));

    // The binary shows up; the next request retries from scratch
    std::fs::copy(format!("{GUESTS}/adder.wat"), &binary).unwrap();

    let (status, body) = post(&server.url(), json!({ "a": 1, "b": 2 })).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], 3);
    assert_eq!(server.state().host().initializations(), 2);

    server.shutdown().await;
}

// ============================================================================
// Test: Probes and Admin API
// ============================================================================

#[tokio::test]
async fn test_health_and_ready() {
    let server = CalcServer::start_test(&adder_config()).await.unwrap();
    let client = reqwest::Client::new();

    let health = client
        .get(format!("{}/health", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status().as_u16(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");

    let ready = client
        .get(format!("{}/ready", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status().as_u16(), 503);

    post(&server.url(), json!({ "a": 1, "b": 1 })).await;

    let ready = client
        .get(format!("{}/ready", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status().as_u16(), 200);

    server.shutdown().await;
}

#[tokio::test]
async fn test_admin_reset_over_http() {
    let server_config = ServerConfig::default().with_admin("/admin", "secret");
    let server = CalcServer::start_test_with(&adder_config(), server_config)
        .await
        .unwrap();
    let client = reqwest::Client::new();

    post(&server.url(), json!({ "a": 1, "b": 1 })).await;

    let unauthorized = client
        .post(format!("{}/admin/reset", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status().as_u16(), 401);
    assert!(server.state().host().is_ready());

    let reset = client
        .post(format!("{}/admin/reset", server.url()))
        .header("X-Admin-Token", "secret")
        .send()
        .await
        .unwrap();
    assert_eq!(reset.status().as_u16(), 200);
    assert!(!server.state().host().is_ready());

    let status: Value = client
        .get(format!("{}/admin/status", server.url()))
        .header("X-Admin-Token", "secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["state"], "uninitialized");
    assert_eq!(status["initializations"], 1);

    server.shutdown().await;
}
