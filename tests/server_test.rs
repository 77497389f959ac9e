#![cfg(feature = "server")]

//! HTTP surface tests: the router driven in-process
mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::RecordingProvider;
use fragments::config::ProvisionerConfig;
use fragments::sandbox::CodeExecution;
use fragments::server::{router, AppState};
use fragments::SessionProvisioner;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(provider: &RecordingProvider, api_key: Option<&str>) -> axum::Router {
    app_with_deadline(provider, api_key, Duration::from_secs(60))
}

fn app_with_deadline(
    provider: &RecordingProvider,
    api_key: Option<&str>,
    max_request: Duration,
) -> axum::Router {
    let config = ProvisionerConfig::new(api_key.map(str::to_string));
    let state = Arc::new(AppState {
        provisioner: SessionProvisioner::new(config, Arc::new(provider.clone())),
    });
    router(state, max_request)
}

async fn post_sandbox(app: axum::Router, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/sandbox")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_missing_key_returns_configuration_error() {
    let provider = RecordingProvider::new("sbx_1");
    let (status, body) = post_sandbox(
        app(&provider, None),
        json!({ "fragment": { "template": "node", "code": "x", "file_path": "index.js" } }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "E2B API key not configured" }));
    assert!(!provider.created());
}

#[tokio::test]
async fn test_creation_failure_body() {
    let mut provider = RecordingProvider::new("sbx_1");
    provider.create_error = Some("quota exceeded".to_string());

    let (status, body) = post_sandbox(
        app(&provider, Some("e2b_key")),
        json!({ "fragment": { "template": "node", "code": "x", "file_path": "index.js" } }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({
            "error": "Failed to create sandbox",
            "details": "quota exceeded",
            "apiKeySet": true
        })
    );
}

#[tokio::test]
async fn test_interpreter_request() {
    let mut provider = RecordingProvider::new("sbx_1");
    provider.execution = CodeExecution {
        stdout: vec!["2".to_string()],
        ..CodeExecution::default()
    };

    let (status, body) = post_sandbox(
        app(&provider, Some("e2b_key")),
        json!({
            "fragment": {
                "template": "code-interpreter-v1",
                "code": "print(1+1)",
                "file_path": "main.py",
                "has_additional_dependencies": false
            },
            "userID": "user-1"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "sbxId": "sbx_1",
            "template": "code-interpreter-v1",
            "stdout": ["2"],
            "stderr": [],
            "runtimeError": null,
            "cellResults": []
        })
    );
}

#[tokio::test]
async fn test_web_request() {
    let provider = RecordingProvider::new("sbx_2");
    let (status, body) = post_sandbox(
        app(&provider, Some("e2b_key")),
        json!({
            "fragment": {
                "template": "node",
                "code": "...",
                "file_path": "index.js",
                "port": 3000
            }
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "sbxId": "sbx_2",
            "template": "node",
            "url": "https://3000-sbx_2.provider.dev"
        })
    );
}

#[tokio::test]
async fn test_later_stage_failure_is_500() {
    let mut provider = RecordingProvider::new("sbx_3");
    provider.failing_path = Some("index.js".to_string());

    let (status, body) = post_sandbox(
        app(&provider, Some("e2b_key")),
        json!({ "fragment": { "template": "node", "code": "x", "file_path": "index.js" } }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("index.js"));
    assert!(body.get("apiKeySet").is_none());
}

#[tokio::test]
async fn test_interpreter_failure_is_500_without_key_flag() {
    let mut provider = RecordingProvider::new("sbx_4");
    provider.run_code_error = Some("interpreter unreachable".to_string());

    let (status, body) = post_sandbox(
        app(&provider, Some("e2b_key")),
        json!({
            "fragment": {
                "template": "code-interpreter-v1",
                "code": "print(1)",
                "file_path": "main.py"
            }
        }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("sbx_4"));
    assert!(error.contains("interpreter unreachable"));
    assert!(body.get("apiKeySet").is_none());
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn test_handler_deadline_returns_gateway_timeout() {
    let mut provider = RecordingProvider::new("sbx_5");
    provider.write_delay = Duration::from_millis(500);

    let (status, body) = post_sandbox(
        app_with_deadline(&provider, Some("e2b_key"), Duration::from_millis(50)),
        json!({ "fragment": { "template": "node", "code": "x", "file_path": "index.js" } }),
    )
    .await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body, json!({ "error": "Sandbox request timed out" }));
    // The sandbox was acquired before the deadline hit and is left to its own timeout.
    assert!(provider.created());
    assert!(provider.writes().is_empty());
}

#[tokio::test]
async fn test_out_of_range_port_is_rejected_before_creation() {
    let provider = RecordingProvider::new("sbx_6");
    let body = json!({
        "fragment": { "template": "node", "code": "x", "file_path": "index.js", "port": 70000 }
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/sandbox")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app(&provider, Some("e2b_key")).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn test_health() {
    let provider = RecordingProvider::new("sbx_1");
    let response = app(&provider, None)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}
