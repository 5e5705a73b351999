mod legacy;

use std::sync::Arc;

use axum::extract::State as AxumState;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use hyper::{Body, Request, Response, StatusCode};
use tower::Layer as _;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::{cors, trace::TraceLayer};

use crate::database::Executor;
use crate::error::Error;
use crate::hrana;
use crate::version;

/// Router wide state that each request has access to via axum's `State` extractor.
#[derive(Clone)]
pub(crate) struct AppState {
    db: Arc<dyn Executor>,
    hrana_http_srv: Arc<hrana::http::Server>,
}

/// Builds the protocol router. The caller owns the hrana server (and is expected to run its
/// expiry task) so that it can outlive router clones.
pub fn router(db: Arc<dyn Executor>, hrana_http_srv: Arc<hrana::http::Server>) -> Router {
    let state = AppState { db, hrana_http_srv };

    macro_rules! handle_hrana {
        ($version:expr,) => {{
            async fn handle_hrana(
                AxumState(state): AxumState<AppState>,
                req: Request<Body>,
            ) -> Result<Response<Body>, Error> {
                Ok(state
                    .hrana_http_srv
                    .handle_pipeline(state.db.clone(), req, $version)
                    .await?)
            }
            handle_hrana
        }};
    }

    Router::new()
        .route("/", post(legacy::handle_query))
        .route("/v1", post(legacy::handle_query))
        .route("/version", get(handle_version))
        .route("/health", get(handle_probe))
        .route("/v2", get(handle_probe))
        .route(
            "/v2/pipeline",
            post(handle_hrana!(hrana::Version::Hrana2,)),
        )
        .route("/v3", get(handle_probe))
        .route(
            "/v3/pipeline",
            post(handle_hrana!(hrana::Version::Hrana3,)),
        )
        .route("/v3-protobuf", get(handle_protobuf))
        .fallback(handle_fallback)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_methods(cors::AllowMethods::any())
                .allow_headers(cors::Any)
                .allow_origin(cors::Any),
        )
}

/// Wraps the router so that trailing-slash variants of every path dispatch the same. The
/// normalization has to sit outside the router, which is why this is not a plain `.layer()`
/// on it.
pub fn into_service(router: Router) -> NormalizePath<Router> {
    NormalizePathLayer::trim_trailing_slash().layer(router)
}

async fn handle_probe() -> &'static str {
    "OK"
}

async fn handle_version() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "version": version::version() }))
}

async fn handle_protobuf() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({ "error": "protobuf encoding is not supported" })),
    )
}

async fn handle_fallback(req: Request<Body>) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({
            "error": format!("no such endpoint: {} {}", req.method(), req.uri().path()),
        })),
    )
}
