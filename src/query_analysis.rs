/// A single SQL statement together with what we could tell about it from its leading token.
#[derive(Debug, Clone)]
pub struct Statement {
    pub stmt: String,
    pub kind: StmtKind,
    pub is_insert: bool,
}

/// Classify statement in categories of interest.
///
/// Classification is a case-insensitive scan of the first significant token, not a SQL parse.
/// That is enough to decide which statements to intercept and which metadata to report, and
/// nothing here depends on more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtKind {
    /// The beginning of a transaction
    TxnBegin,
    /// The end of a transaction
    TxnEnd,
    Savepoint,
    Release,
    Read,
    Write,
}

impl StmtKind {
    pub fn classify(sql: &str) -> Self {
        match first_token(sql).to_ascii_uppercase().as_str() {
            "BEGIN" => Self::TxnBegin,
            "COMMIT" | "ROLLBACK" => Self::TxnEnd,
            "SAVEPOINT" => Self::Savepoint,
            "RELEASE" => Self::Release,
            "INSERT" | "UPDATE" | "DELETE" | "CREATE" | "DROP" | "ALTER" => Self::Write,
            _ => Self::Read,
        }
    }

    /// Transaction-control statements are answered by the server itself: the backend runs in
    /// implicit autocommit and would reject them.
    pub fn is_txn_control(self) -> bool {
        matches!(
            self,
            Self::TxnBegin | Self::TxnEnd | Self::Savepoint | Self::Release
        )
    }
}

impl Statement {
    pub fn from_sql(sql: impl Into<String>) -> Self {
        let stmt = sql.into();
        let kind = StmtKind::classify(&stmt);
        let is_insert = first_token(&stmt).eq_ignore_ascii_case("INSERT");
        Self {
            stmt,
            kind,
            is_insert,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.kind != StmtKind::Write
    }
}

pub fn is_explain(sql: &str) -> bool {
    first_token(sql).eq_ignore_ascii_case("EXPLAIN")
}

/// Returns the first significant token of `sql`, skipping whitespace, `-- line` comments and
/// `/* block */` comments. Returns an empty string if there is none.
fn first_token(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            break;
        }
    }
    let end = rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(rest.len());
    &rest[..end]
}
