use std::path::Path;

use parking_lot::Mutex;

use super::{Column, Cursor, ExecError, Executor};
use crate::query::{Params, Value};

/// [`Executor`] over an embedded rusqlite connection. The connection is not thread-safe, so
/// all access goes through a mutex; statements from concurrent requests serialize here.
pub struct SqliteExecutor {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteExecutor {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Executor for SqliteExecutor {
    fn exec(&self, sql: &str, params: &Params) -> Result<Cursor, ExecError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(exec_error)?;

        params
            .bind(&mut stmt)
            .map_err(|e| ExecError::new(e.to_string(), "ARGS_INVALID"))?;

        let cols = stmt
            .columns()
            .iter()
            .map(|col| Column {
                name: col.name().to_owned(),
                decltype: col.decl_type().map(str::to_owned),
            })
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        let mut raw_rows = stmt.raw_query();
        while let Some(row) = raw_rows.next().map_err(exec_error)? {
            let mut values = Vec::with_capacity(cols.len());
            for i in 0..cols.len() {
                let value = row
                    .get_ref(i)
                    .map_err(exec_error)
                    .and_then(|v| {
                        Value::try_from(v).map_err(|e| ExecError::new(e.to_string(), "SQLITE_MISMATCH"))
                    })?;
                values.push(value);
            }
            rows.push(values);
        }
        drop(raw_rows);
        drop(stmt);

        Ok(Cursor {
            cols,
            rows,
            affected_rows: Some(conn.changes()),
        })
    }

    fn exec_script(&self, sql: &str) -> Result<(), ExecError> {
        let conn = self.conn.lock();
        conn.execute_batch(sql).map_err(exec_error)
    }
}

fn exec_error(err: rusqlite::Error) -> ExecError {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(message)) => {
            ExecError::new(message, sqlite_error_code(e.code))
        }
        rusqlite::Error::SqliteFailure(e, None) => {
            ExecError::new(e.to_string(), sqlite_error_code(e.code))
        }
        rusqlite::Error::SqlInputError {
            msg: message,
            offset,
            ..
        } => ExecError::new(
            format!("{message} (at offset {offset})"),
            "SQL_INPUT_ERROR",
        ),
        err => ExecError::new(err.to_string(), "SQLITE_UNKNOWN"),
    }
}

fn sqlite_error_code(code: rusqlite::ffi::ErrorCode) -> &'static str {
    match code {
        rusqlite::ErrorCode::InternalMalfunction => "SQLITE_INTERNAL",
        rusqlite::ErrorCode::PermissionDenied => "SQLITE_PERM",
        rusqlite::ErrorCode::OperationAborted => "SQLITE_ABORT",
        rusqlite::ErrorCode::DatabaseBusy => "SQLITE_BUSY",
        rusqlite::ErrorCode::DatabaseLocked => "SQLITE_LOCKED",
        rusqlite::ErrorCode::OutOfMemory => "SQLITE_NOMEM",
        rusqlite::ErrorCode::ReadOnly => "SQLITE_READONLY",
        rusqlite::ErrorCode::OperationInterrupted => "SQLITE_INTERRUPT",
        rusqlite::ErrorCode::SystemIoFailure => "SQLITE_IOERR",
        rusqlite::ErrorCode::DatabaseCorrupt => "SQLITE_CORRUPT",
        rusqlite::ErrorCode::NotFound => "SQLITE_NOTFOUND",
        rusqlite::ErrorCode::DiskFull => "SQLITE_FULL",
        rusqlite::ErrorCode::CannotOpen => "SQLITE_CANTOPEN",
        rusqlite::ErrorCode::FileLockingProtocolFailed => "SQLITE_PROTOCOL",
        rusqlite::ErrorCode::SchemaChanged => "SQLITE_SCHEMA",
        rusqlite::ErrorCode::TooBig => "SQLITE_TOOBIG",
        rusqlite::ErrorCode::ConstraintViolation => "SQLITE_CONSTRAINT",
        rusqlite::ErrorCode::TypeMismatch => "SQLITE_MISMATCH",
        rusqlite::ErrorCode::ApiMisuse => "SQLITE_MISUSE",
        rusqlite::ErrorCode::NoLargeFileSupport => "SQLITE_NOLFS",
        rusqlite::ErrorCode::AuthorizationForStatementDenied => "SQLITE_AUTH",
        rusqlite::ErrorCode::ParameterOutOfRange => "SQLITE_RANGE",
        rusqlite::ErrorCode::NotADatabase => "SQLITE_NOTADB",
        _ => "SQLITE_UNKNOWN",
    }
}
