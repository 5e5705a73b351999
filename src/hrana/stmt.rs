use std::collections::HashMap;
use std::time::Instant;

use anyhow::{anyhow, bail, Result};

use super::{proto, ProtocolError, Version};
use crate::database::{Cursor, ExecError, Executor};
use crate::query::{Params, Query, Value};
use crate::query_analysis::{self, Statement, StmtKind};

/// An error during execution of an SQL statement.
#[derive(thiserror::Error, Debug)]
pub enum StmtError {
    #[error("Specifying both positional and named arguments is not supported")]
    ArgsBothPositionalAndNamed,
    #[error(transparent)]
    Backend(#[from] ExecError),
}

/// Executes one statement against the backend and shapes the result for the given protocol
/// version.
///
/// Transaction-control statements never reach the backend: it runs in implicit autocommit and
/// would reject them, which breaks clients that speculatively emit `BEGIN`/`COMMIT` pairs.
/// They succeed with an empty result instead.
pub fn execute_stmt(
    db: &dyn Executor,
    query: &Query,
    version: Version,
) -> Result<proto::StmtResult> {
    let start = Instant::now();

    if query.stmt.kind.is_txn_control() {
        tracing::debug!("intercepted transaction control statement: {}", query.stmt.stmt);
        let mut result = proto::StmtResult::default();
        if version.wants_stats() {
            result.rows_read = Some(0);
            result.rows_written = Some(0);
            result.query_duration_ms = Some(duration_ms(start));
        }
        return Ok(result);
    }

    let cursor = db
        .exec(&query.stmt.stmt, &query.params)
        .map_err(|e| anyhow!(StmtError::Backend(e)))?;
    let elapsed = duration_ms(start);

    let is_write = query.stmt.kind == StmtKind::Write;
    let affected_row_count = if is_write {
        cursor.affected_rows.unwrap_or(1)
    } else {
        0
    };
    let last_insert_rowid = if query.stmt.is_insert {
        probe_last_insert_rowid(db)
    } else {
        None
    };

    let Cursor { cols, rows, .. } = cursor;
    let cols = cols
        .into_iter()
        .map(|col| proto::Col {
            name: Some(col.name),
            decltype: col.decltype,
        })
        .collect();
    let rows = if query.want_rows {
        rows.into_iter()
            .map(|row| row.into_iter().map(proto_value_from_value).collect())
            .collect()
    } else {
        Vec::new()
    };

    let mut result = proto::StmtResult {
        cols,
        rows,
        affected_row_count,
        last_insert_rowid,
        ..Default::default()
    };
    if version.wants_stats() {
        result.rows_read = Some(result.rows.len() as u64);
        result.rows_written = Some(u64::from(is_write));
        result.query_duration_ms = Some(elapsed);
    }

    Ok(result)
}

/// The `last_insert_rowid` field is populated with a separate probe, keeping the executor
/// interface at a single `exec` entry point. A failed probe leaves the field null.
fn probe_last_insert_rowid(db: &dyn Executor) -> Option<i64> {
    let cursor = db.exec("SELECT last_insert_rowid()", &Params::empty()).ok()?;
    match cursor.rows.first()?.first()? {
        Value::Integer(rowid) => Some(*rowid),
        _ => None,
    }
}

fn duration_ms(start: Instant) -> f64 {
    start.elapsed().as_micros() as f64 / 1_000.0
}

/// Describes a statement without preparing it: `params` and `cols` stay empty, the flags come
/// from the same token scan the executor classifies with.
pub fn describe_stmt(sql: &str) -> proto::DescribeResult {
    proto::DescribeResult {
        params: Vec::new(),
        cols: Vec::new(),
        is_explain: query_analysis::is_explain(sql),
        is_readonly: StmtKind::classify(sql) != StmtKind::Write,
    }
}

pub fn proto_stmt_to_query(proto_stmt: &proto::Stmt, sqls: &HashMap<i32, String>) -> Result<Query> {
    let sql = proto_sql_to_sql(proto_stmt.sql.as_deref(), proto_stmt.sql_id, sqls)?;
    let stmt = Statement::from_sql(sql);

    let params = if proto_stmt.named_args.is_empty() {
        let values = proto_stmt.args.iter().map(proto_value_to_value).collect();
        Params::Positional(values)
    } else if proto_stmt.args.is_empty() {
        let values = proto_stmt
            .named_args
            .iter()
            .map(|arg| (arg.name.clone(), proto_value_to_value(&arg.value)))
            .collect::<HashMap<_, _>>();
        Params::Named(values)
    } else {
        bail!(StmtError::ArgsBothPositionalAndNamed)
    };

    let want_rows = proto_stmt.want_rows.unwrap_or(true);
    Ok(Query {
        stmt,
        params,
        want_rows,
    })
}

pub fn proto_sql_to_sql<'s>(
    proto_sql: Option<&'s str>,
    proto_sql_id: Option<i32>,
    sqls: &'s HashMap<i32, String>,
) -> Result<&'s str, ProtocolError> {
    match (proto_sql, proto_sql_id) {
        (Some(sql), None) => Ok(sql),
        (None, Some(sql_id)) => match sqls.get(&sql_id) {
            Some(sql) => Ok(sql),
            None => Err(ProtocolError::SqlNotFound { sql_id }),
        },
        (Some(_), Some(_)) => Err(ProtocolError::SqlIdAndSqlGiven),
        (None, None) => Err(ProtocolError::SqlIdOrSqlNotGiven),
    }
}

pub fn proto_value_to_value(proto_value: &proto::Value) -> Value {
    match proto_value {
        proto::Value::Null => Value::Null,
        proto::Value::Integer { value } => Value::Integer(*value),
        proto::Value::Float { value } => Value::Real(*value),
        proto::Value::Text { value } => Value::Text(value.clone()),
        proto::Value::Blob { value } => Value::Blob(value.to_vec()),
    }
}

pub fn proto_value_from_value(value: Value) -> proto::Value {
    match value {
        Value::Null => proto::Value::Null,
        Value::Integer(value) => proto::Value::Integer { value },
        Value::Real(value) => proto::Value::Float { value },
        Value::Text(value) => proto::Value::Text { value },
        Value::Blob(value) => proto::Value::Blob {
            value: value.into(),
        },
    }
}

pub fn proto_error_from_stmt_error(error: &StmtError) -> proto::Error {
    proto::Error {
        message: error.to_string(),
        code: error.code().into(),
    }
}

impl StmtError {
    pub fn code(&self) -> &str {
        match self {
            Self::ArgsBothPositionalAndNamed => "ARGS_BOTH_POSITIONAL_AND_NAMED",
            Self::Backend(e) => &e.code,
        }
    }
}
