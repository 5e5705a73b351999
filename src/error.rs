use axum::response::IntoResponse;
use hyper::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Query error: `{0}`")]
    QueryError(String),
    #[error("Database value error: `{0}`")]
    DbValueError(String),
    #[error("Could not read request body: {0}")]
    Hyper(#[from] hyper::Error),
    // Catch-all error since we use anyhow in certain places
    #[error("Internal Error: `{0}`")]
    Anyhow(#[from] anyhow::Error),
}

pub trait ResponseError: std::error::Error {
    fn format_err(&self, status: StatusCode) -> axum::response::Response {
        let json = serde_json::json!({ "error": self.to_string() });
        tracing::error!("HTTP API: {}, {:?}", status, self);
        (status, axum::Json(json)).into_response()
    }
}

impl ResponseError for Error {}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        (&self).into_response()
    }
}

impl IntoResponse for &Error {
    fn into_response(self) -> axum::response::Response {
        use Error::*;

        match self {
            Json(_) => self.format_err(StatusCode::BAD_REQUEST),
            QueryError(_) => self.format_err(StatusCode::BAD_REQUEST),
            DbValueError(_) => self.format_err(StatusCode::BAD_REQUEST),
            Hyper(_) => self.format_err(StatusCode::INTERNAL_SERVER_ERROR),
            Anyhow(_) => self.format_err(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}
