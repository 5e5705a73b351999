use anyhow::{bail, Result};
use bytesize::ByteSize;

use super::super::{batch, stmt, ProtocolError, Version};
use super::stream;
use crate::database::Executor;
use crate::hrana::proto;

const MAX_SQL_COUNT: usize = 50;
const MAX_STORED_SQL_SIZE: ByteSize = ByteSize::kb(5);

/// An error from executing a [`proto::StreamRequest`]
#[derive(thiserror::Error, Debug)]
enum StreamResponseError {
    #[error("The server already stores {count} SQL texts, it cannot store more")]
    SqlTooMany { count: usize },
    #[error("The statement is too large to be stored: {size}/{MAX_STORED_SQL_SIZE}")]
    SqlTooLarge { size: ByteSize },
}

/// Handles one stream request, isolating its failure: whatever goes wrong with this request is
/// reported in its result slot and the rest of the pipeline still runs. Only errors that no
/// client could have caused are propagated.
pub fn handle(
    stream_guard: &mut stream::Guard<'_>,
    db: &dyn Executor,
    request: proto::StreamRequest,
    version: Version,
) -> Result<proto::StreamResult> {
    let result = match try_handle(stream_guard, db, request, version) {
        Ok(response) => proto::StreamResult::Ok { response },
        Err(err) => {
            let error = proto_error_from_request_error(err)?;
            proto::StreamResult::Error { error }
        }
    };
    Ok(result)
}

fn try_handle(
    stream_guard: &mut stream::Guard<'_>,
    db: &dyn Executor,
    request: proto::StreamRequest,
    version: Version,
) -> Result<proto::StreamResponse> {
    Ok(match request {
        proto::StreamRequest::Close(_req) => {
            stream_guard.close();
            proto::StreamResponse::Close(proto::CloseStreamResp {})
        }
        proto::StreamRequest::Execute(req) => {
            stream_guard.ensure_open()?;
            let query = stmt::proto_stmt_to_query(&req.stmt, stream_guard.sqls())?;
            let result = stmt::execute_stmt(db, &query, version)?;
            proto::StreamResponse::Execute(proto::ExecuteStreamResp { result })
        }
        proto::StreamRequest::Batch(req) => {
            stream_guard.ensure_open()?;
            let result = batch::execute_batch(db, version, &req.batch, stream_guard.sqls())?;
            proto::StreamResponse::Batch(proto::BatchStreamResp { result })
        }
        proto::StreamRequest::Sequence(req) => {
            stream_guard.ensure_open()?;
            let sql =
                stmt::proto_sql_to_sql(req.sql.as_deref(), req.sql_id, stream_guard.sqls())?;
            batch::execute_sequence(db, sql)?;
            proto::StreamResponse::Sequence(proto::SequenceStreamResp {})
        }
        proto::StreamRequest::Describe(req) => {
            stream_guard.ensure_open()?;
            let sql =
                stmt::proto_sql_to_sql(req.sql.as_deref(), req.sql_id, stream_guard.sqls())?;
            let result = stmt::describe_stmt(sql);
            proto::StreamResponse::Describe(proto::DescribeStreamResp { result })
        }
        proto::StreamRequest::StoreSql(req) => {
            let sqls = stream_guard.sqls_mut();
            // replacing an already stored id is allowed, last write wins
            if !sqls.contains_key(&req.sql_id) && sqls.len() >= MAX_SQL_COUNT {
                bail!(StreamResponseError::SqlTooMany { count: sqls.len() })
            } else if req.sql.len() > MAX_STORED_SQL_SIZE.as_u64() as usize {
                bail!(StreamResponseError::SqlTooLarge {
                    size: ByteSize::b(req.sql.len() as _)
                })
            }
            sqls.insert(req.sql_id, req.sql);
            proto::StreamResponse::StoreSql(proto::StoreSqlStreamResp {})
        }
        proto::StreamRequest::CloseSql(req) => {
            let sqls = stream_guard.sqls_mut();
            sqls.remove(&req.sql_id);
            proto::StreamResponse::CloseSql(proto::CloseSqlStreamResp {})
        }
        proto::StreamRequest::GetAutocommit(_req) => {
            // the backend runs every statement in its own implicit transaction
            proto::StreamResponse::GetAutocommit(proto::GetAutocommitStreamResp {
                is_autocommit: true,
            })
        }
    })
}

fn proto_error_from_request_error(err: anyhow::Error) -> Result<proto::Error> {
    let err = match err.downcast::<StreamResponseError>() {
        Ok(resp_error) => {
            return Ok(proto::Error {
                message: resp_error.to_string(),
                code: resp_error.code().into(),
            })
        }
        Err(err) => err,
    };
    let err = match err.downcast::<stmt::StmtError>() {
        Ok(stmt_error) => return Ok(stmt::proto_error_from_stmt_error(&stmt_error)),
        Err(err) => err,
    };
    match err.downcast::<ProtocolError>() {
        Ok(proto_error) => Ok(proto::Error {
            message: proto_error.to_string(),
            code: proto_error.code().into(),
        }),
        Err(err) => Err(err),
    }
}

impl StreamResponseError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SqlTooMany { .. } => "SQL_STORE_TOO_MANY",
            Self::SqlTooLarge { .. } => "SQL_STORE_TOO_LARGE",
        }
    }
}
