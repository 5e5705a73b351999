//! End-to-end tests for the v1 "simple batch" API.

use hyper::StatusCode;
use serde_json::json;

use crate::common::{make_app, post_json};

#[tokio::test]
async fn batch_of_statements() {
    let app = make_app();
    let (status, body) = post_json(
        &app,
        "/",
        json!({"statements": [
            "CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)",
            {"q": "INSERT INTO t(v) VALUES(?)", "params": ["hi"]},
            "SELECT * FROM t",
        ]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 3);

    let select = &entries[2]["results"];
    assert_eq!(select["columns"], json!(["id", "v"]));
    assert_eq!(select["rows"], json!([[1, "hi"]]));
    assert_eq!(select["rows_written"], 0);
    assert_eq!(select["rows_read"], 1);
    assert!(select["query_duration_ms"].is_number());

    let insert = &entries[1]["results"];
    assert_eq!(insert["rows_written"], 1);
    assert_eq!(insert["rows"], json!([]));
}

#[tokio::test]
async fn any_failure_fails_the_whole_batch() {
    let app = make_app();
    let (status, body) = post_json(
        &app,
        "/",
        json!({"statements": [
            "CREATE TABLE t(x)",
            "SELECT notacolumn",
            "SELECT 1",
        ]}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("notacolumn"));
    assert!(body.get("results").is_none());
}

#[tokio::test]
async fn v1_is_served_on_both_roots() {
    let app = make_app();
    for uri in ["/", "/v1"] {
        let (status, body) = post_json(&app, uri, json!({"statements": ["SELECT 1 AS x"]})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["results"]["rows"], json!([[1]]));
    }
}

#[tokio::test]
async fn named_parameters_bind_by_name() {
    let app = make_app();
    let (status, body) = post_json(
        &app,
        "/",
        json!({"statements": [
            "CREATE TABLE t(a, b)",
            {"q": "INSERT INTO t(a, b) VALUES (:a, :b)", "params": {"b": "bee", "a": "ay"}},
            "SELECT a, b FROM t",
        ]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[2]["results"]["rows"], json!([["ay", "bee"]]));
}

#[tokio::test]
async fn blobs_use_the_base64_object_encoding() {
    let app = make_app();
    let (status, body) = post_json(
        &app,
        "/",
        json!({"statements": [
            {"q": "SELECT ? AS b", "params": [{"type": "blob", "base64": "Af8"}]},
        ]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["results"]["rows"], json!([[{"base64": "Af8"}]]));
}

#[tokio::test]
async fn transaction_control_statements_are_no_ops() {
    let app = make_app();
    let (status, body) = post_json(
        &app,
        "/",
        json!({"statements": ["BEGIN", "CREATE TABLE t(x)", "COMMIT"]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["results"]["columns"], json!([]));
    assert_eq!(entries[0]["results"]["rows"], json!([]));
    assert_eq!(entries[2]["results"]["rows_written"], 0);
}

#[tokio::test]
async fn malformed_body_is_a_400() {
    let app = make_app();
    let (status, body) = post_json(&app, "/", json!({"queries": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
