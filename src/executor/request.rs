//! Query requests and idempotency inference.

use std::sync::LazyLock;

use regex::Regex;

use super::compile_regex_unsafe;
use crate::storage::SqlValue;

/// Leading keywords of statements that only read.
const READ_ONLY_KEYWORDS: &[&str] = &["SELECT", "WITH", "SHOW", "EXPLAIN", "VALUES", "TABLE"];

/// Words that make an otherwise read-only statement write something.
///
/// `INTO` catches `SELECT ... INTO new_table`; `NEXTVAL`/`SETVAL` advance sequences.
const WRITING_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "INTO", "TRUNCATE", "CREATE", "DROP", "ALTER",
    "NEXTVAL", "SETVAL", "COPY", "CALL",
];

/// Comments, string literals and quoted identifiers, none of which can hold a keyword.
const NON_CODE_PATTERN: &str = r#"(?s)--[^\n]*|/\*.*?\*/|[Ee]?'(?:[^']|'')*'|"(?:[^"]|"")*""#;
const WORD_PATTERN: &str = r"[A-Za-z_][A-Za-z0-9_]*";

static NON_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_regex_unsafe(NON_CODE_PATTERN, "NON_CODE_RE"));
static WORD_RE: LazyLock<Regex> = LazyLock::new(|| compile_regex_unsafe(WORD_PATTERN, "WORD_RE"));

/// One statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub sql: String,
    pub params: Vec<SqlValue>,
    idempotent: bool,
}

impl QueryRequest {
    /// Builds a request, inferring idempotency from the statement text.
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        let sql = sql.into();
        let idempotent = is_read_only(&sql);
        QueryRequest {
            sql,
            params,
            idempotent,
        }
    }

    /// Overrides the inferred idempotency.
    ///
    /// Mark a write as idempotent only when running it twice has the same
    /// effect as running it once (e.g. `INSERT ... ON CONFLICT DO NOTHING`).
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }
}

/// Returns `true` when `sql` starts with a read-only keyword and contains no
/// data-modifying keyword outside comments and literals.
pub fn is_read_only(sql: &str) -> bool {
    let code = NON_CODE_RE.replace_all(sql, " ");
    let mut words = WORD_RE
        .find_iter(&code)
        .map(|m| m.as_str().to_ascii_uppercase());

    let Some(first) = words.next() else {
        return false;
    };
    if !READ_ONLY_KEYWORDS.contains(&first.as_str()) {
        return false;
    }
    !words.any(|word| WRITING_KEYWORDS.contains(&word.as_str()))
}
