use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;

use super::{proto, ProtocolError, Version};
use crate::database::Executor;
use crate::hrana::http::stream::StreamError;

mod request;
pub(crate) mod stream;

/// The Hrana-over-HTTP endpoint. Owns the stream registry; everything else about a pipeline
/// request is scoped to that request.
pub struct Server {
    stream_state: Mutex<stream::ServerStreamState>,
}

impl Server {
    pub fn new() -> Self {
        Self {
            stream_state: Mutex::new(stream::ServerStreamState::new()),
        }
    }

    /// Sweeps expired streams. Never resolves; run it as a background task.
    pub async fn run_expire(&self) {
        stream::run_expire(self).await
    }

    pub async fn handle_pipeline(
        &self,
        db: Arc<dyn Executor>,
        req: hyper::Request<hyper::Body>,
        version: Version,
    ) -> Result<hyper::Response<hyper::Body>> {
        handle_pipeline(self, db, req, version)
            .await
            .map_err(|e| {
                tracing::error!("hrana server: {}", e);
                e
            })
            .or_else(|err| err.downcast::<StreamError>().map(stream_error_response))
            .or_else(|err| err.downcast::<ProtocolError>().map(protocol_error_response))
    }

    pub(crate) fn stream_state(&self) -> &Mutex<stream::ServerStreamState> {
        &self.stream_state
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

async fn handle_pipeline(
    server: &Server,
    db: Arc<dyn Executor>,
    req: hyper::Request<hyper::Body>,
    version: Version,
) -> Result<hyper::Response<hyper::Body>> {
    let body = hyper::body::to_bytes(req.into_body())
        .await
        .context("Could not read request body")?;
    let req_body: proto::PipelineReqBody = serde_json::from_slice(&body)
        .map_err(|err| ProtocolError::JsonDeserialize { source: err })
        .context("Could not deserialize JSON request body")?;

    let mut stream_guard = stream::acquire(server, req_body.baton.as_deref())?;

    let mut results = Vec::with_capacity(req_body.requests.len());
    for request in req_body.requests.into_iter() {
        tracing::debug!("pipeline:{{ {:?}, {:?} }}", version, request);
        let result = request::handle(&mut stream_guard, db.as_ref(), request, version)?;
        results.push(result);
    }

    let resp_body = proto::PipelineRespBody {
        baton: stream_guard.release(),
        base_url: None,
        results,
    };
    Ok(json_response(hyper::StatusCode::OK, &resp_body))
}

fn protocol_error_response(err: ProtocolError) -> hyper::Response<hyper::Body> {
    error_response(hyper::StatusCode::BAD_REQUEST, &err.to_string())
}

fn stream_error_response(err: StreamError) -> hyper::Response<hyper::Body> {
    error_response(hyper::StatusCode::BAD_REQUEST, &err.to_string())
}

fn error_response(status: hyper::StatusCode, message: &str) -> hyper::Response<hyper::Body> {
    json_response(status, &serde_json::json!({ "error": message }))
}

fn json_response<T: Serialize>(
    status: hyper::StatusCode,
    resp_body: &T,
) -> hyper::Response<hyper::Body> {
    let resp_body = serde_json::to_vec(resp_body).unwrap();
    hyper::Response::builder()
        .status(status)
        .header(hyper::http::header::CONTENT_TYPE, "application/json")
        .body(hyper::Body::from(resp_body))
        .unwrap()
}
