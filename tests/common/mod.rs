#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use hyper::{Body, Request, StatusCode};
use tower::ServiceExt;
use tower_http::normalize_path::NormalizePath;

use libsql_do_http::database::sqlite::SqliteExecutor;
use libsql_do_http::database::Executor;
use libsql_do_http::{hrana, http};

pub type App = NormalizePath<Router>;

/// A full protocol server over a fresh in-memory database.
pub fn make_app() -> App {
    let db: Arc<dyn Executor> = Arc::new(SqliteExecutor::open_in_memory().unwrap());
    let hrana_http_srv = Arc::new(hrana::http::Server::new());
    http::into_service(http::router(db, hrana_http_srv))
}

pub async fn post_json(
    app: &App,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub async fn get(app: &App, uri: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// POSTs a pipeline request and returns `(status, body)`.
pub async fn pipeline(
    app: &App,
    version: &str,
    baton: serde_json::Value,
    requests: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    post_json(
        app,
        &format!("/{version}/pipeline"),
        serde_json::json!({ "baton": baton, "requests": requests }),
    )
    .await
}

pub fn baton_of(body: &serde_json::Value) -> String {
    body["baton"].as_str().expect("response has a baton").to_owned()
}
