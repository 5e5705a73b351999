use crate::query::{Params, Value};

pub mod sqlite;

/// The embedded query executor backing the protocol server.
///
/// The server treats the executor as an opaque collaborator: one statement in, one fully
/// materialized result set out. The executor runs every statement in its own implicit
/// transaction and is not expected to be thread-safe; implementations serialize access
/// internally.
pub trait Executor: Send + Sync + 'static {
    /// Execute a single statement with the given parameters and return its result set.
    fn exec(&self, sql: &str, params: &Params) -> Result<Cursor, ExecError>;

    /// Execute a multi-statement script. No results are returned; the first failing statement
    /// aborts the rest.
    fn exec_script(&self, sql: &str) -> Result<(), ExecError>;
}

/// An in-memory result set.
#[derive(Debug, Default)]
pub struct Cursor {
    pub cols: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
    /// Number of rows changed by the statement, when the backend reports one. Only meaningful
    /// for writes; reads leave whatever the previous write set.
    pub affected_rows: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub decltype: Option<String>,
}

/// A failure reported by the executor, already flattened to the message and machine-readable
/// code that the wire protocols surface.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ExecError {
    pub message: String,
    pub code: String,
}

impl ExecError {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
        }
    }
}
