//! End-to-end exercises of `build_router` over `tower::ServiceExt::oneshot`,
//! the same in-process style `msgvault_sled`'s own unit tests use for the
//! storage layer, one level up the stack (spec §6 "RPC surface", §8
//! "write, read back, subscribe").

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use msgvault::Store;
use msgvault_registry::RegistryHandle;
use msgvault_server::{build_router, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

async fn test_state() -> (TempDir, Arc<AppState>, String) {
    let dir = TempDir::new().expect("tempdir");
    let backend = msgvault_sled::SledBackend::new(dir.path().join("sled"));
    let location = backend.namespace_create("acme").await.expect("namespace_create");

    let registry = RegistryHandle::open(dir.path().join("registry"), None).expect("registry open");
    let token_hash = msgvault_server::hash_token("acme-token");
    registry
        .create(
            "acme".to_string(),
            token_hash,
            location,
            "test tenant".to_string(),
            json!({}),
        )
        .await
        .expect("registry create");

    let state = Arc::new(AppState::new(Arc::new(backend), registry));
    (dir, state, "acme-token".to_string())
}

async fn rpc(state: &Arc<AppState>, token: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/rpc")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn writes_and_reads_back_a_stream() {
    let (_dir, state, token) = test_state().await;

    let (status, body) = rpc(
        &state,
        &token,
        json!(["stream.write", "account-123", {"type": "Opened", "data": {"balance": 0}}]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["position"], json!(0));
    assert_eq!(body["global_position"], json!(1));

    let (status, body) = rpc(&state, &token, json!(["stream.get", "account-123", {}])).await;
    assert_eq!(status, StatusCode::OK);
    let tuples = body.as_array().expect("tuple array");
    assert_eq!(tuples.len(), 1);
    assert_eq!(tuples[0][1], json!("Opened"));
}

#[tokio::test]
async fn rejects_requests_without_a_bearer_token() {
    let (_dir, state, _token) = test_state().await;

    let (status, body) = rpc(&state, "", json!(["stream.get", "account-123", {}])).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!("auth_required"));
}

#[tokio::test]
async fn rejects_an_unknown_bearer_token() {
    let (_dir, state, _token) = test_state().await;

    let (status, _body) = rpc(&state, "not-a-real-token", json!(["stream.get", "account-123", {}])).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn util_methods_require_no_authentication() {
    let (_dir, state, _token) = test_state().await;

    let (status, body) = rpc(&state, "", json!(["util.category", "account-123"])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("account"));
}

#[tokio::test]
async fn version_conflicts_surface_as_409() {
    let (_dir, state, token) = test_state().await;

    let write = json!(["stream.write", "account-123", {"type": "Opened", "data": {}}, {"expected_version": 5}]);
    let (status, body) = rpc(&state, &token, write).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], json!("version_conflict"));
}
