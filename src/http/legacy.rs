//! The v1 "simple batch" API: a flat list of statements in, a flat list of results out.
//! There are no streams and no cross-request state, and any failing statement turns the
//! whole response into a single error.

use std::collections::HashMap;

use axum::extract::State as AxumState;
use base64::prelude::BASE64_STANDARD_NO_PAD;
use base64::Engine;
use hyper::{header, Body, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::Number;

use super::AppState;
use crate::error::Error;
use crate::hrana::stmt::{execute_stmt, proto_value_to_value, StmtError};
use crate::hrana::{proto, ProtocolError, Version};
use crate::query::{Params, Query};
use crate::query_analysis::Statement;

#[derive(Debug, Deserialize)]
struct HttpQuery {
    statements: Vec<QueryObject>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueryObject {
    Sql(String),
    Query {
        q: String,
        #[serde(default, deserialize_with = "deserialize_params")]
        params: Params,
    },
}

/// Positional parameters arrive as an array, named ones as a mapping. Individual values use
/// the same liberal decoding as the hrana protocols: raw scalars or tagged objects.
fn deserialize_params<'de, D: serde::Deserializer<'de>>(de: D) -> Result<Params, D::Error> {
    use serde::de::Error as _;

    let raw = serde_json::Value::deserialize(de)?;
    match raw {
        serde_json::Value::Array(items) => {
            let values = items
                .iter()
                .map(|item| proto::Value::decode(item).map(|v| proto_value_to_value(&v)))
                .collect::<Result<Vec<_>, _>>()
                .map_err(D::Error::custom)?;
            Ok(Params::new_positional(values))
        }
        serde_json::Value::Object(fields) => {
            let values = fields
                .iter()
                .map(|(name, value)| {
                    proto::Value::decode(value)
                        .map(|v| (name.clone(), proto_value_to_value(&v)))
                })
                .collect::<Result<HashMap<_, _>, _>>()
                .map_err(D::Error::custom)?;
            Ok(Params::new_named(values))
        }
        _ => Err(D::Error::custom("parameters must be an array or a mapping")),
    }
}

pub(crate) async fn handle_query(
    AxumState(state): AxumState<AppState>,
    req: Request<Body>,
) -> Result<Response<Body>, Error> {
    let body = hyper::body::to_bytes(req.into_body()).await?;
    let req_body: HttpQuery = serde_json::from_slice(&body)?;

    let mut results = Vec::with_capacity(req_body.statements.len());
    for statement in req_body.statements {
        let (sql, params) = match statement {
            QueryObject::Sql(sql) => (sql, Params::empty()),
            QueryObject::Query { q, params } => (q, params),
        };
        let query = Query {
            stmt: Statement::from_sql(sql),
            params,
            want_rows: true,
        };
        // any failure fails the whole batch; the successful prefix is not returned
        let result = execute_stmt(state.db.as_ref(), &query, Version::Hrana1)
            .map_err(batch_query_error)?;
        results.push(stmt_result_to_v1_response(result)?);
    }

    let body = serde_json::to_vec(&results)?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap())
}

fn batch_query_error(err: anyhow::Error) -> Error {
    let err = match err.downcast::<StmtError>() {
        Ok(stmt_error) => return Error::QueryError(stmt_error.to_string()),
        Err(err) => err,
    };
    match err.downcast::<ProtocolError>() {
        Ok(proto_error) => Error::QueryError(proto_error.to_string()),
        Err(err) => Error::Anyhow(err),
    }
}

fn stmt_result_to_v1_response(result: proto::StmtResult) -> Result<serde_json::Value, Error> {
    let columns = result
        .cols
        .into_iter()
        .map(|col| col.name.unwrap_or_default())
        .collect::<Vec<_>>();
    let rows = result
        .rows
        .iter()
        .map(|row| row.iter().map(v1_value).collect::<Result<Vec<_>, _>>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(serde_json::json!({
        "results": {
            "columns": columns,
            "rows": rows,
            "rows_read": result.rows_read.unwrap_or(0),
            "rows_written": result.rows_written.unwrap_or(0),
            "query_duration_ms": result.query_duration_ms.unwrap_or(0.0),
        }
    }))
}

/// The v1 value encoding: raw JSON scalars, with blobs as `{"base64": …}`.
fn v1_value(value: &proto::Value) -> Result<serde_json::Value, Error> {
    let value = match value {
        proto::Value::Null => serde_json::Value::Null,
        proto::Value::Integer { value } => serde_json::Value::Number(Number::from(*value)),
        proto::Value::Float { value } => {
            serde_json::Value::Number(Number::from_f64(*value).ok_or_else(|| {
                Error::DbValueError(format!(
                    "Cannot convert database value `{value}` to a JSON number"
                ))
            })?)
        }
        proto::Value::Text { value } => serde_json::Value::String(value.clone()),
        proto::Value::Blob { value } => serde_json::json!({
            "base64": BASE64_STANDARD_NO_PAD.encode(value),
        }),
    };

    Ok(value)
}
