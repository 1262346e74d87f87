//! SQL text preparation for logs.
//!
//! Literal values embedded in statement text may be personal data (emails,
//! tokens). Before a statement is logged, string and numeric literals are
//! replaced with `?`; positional placeholders (`$1`) are kept. Dollar-quoted
//! bodies (`$$...$$`, `$tag$...$tag$`) are masked before the literal pass, since
//! matching a closing tag needs a backreference the regex engine lacks.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::compile_regex_unsafe;
use crate::config::SQL_LOG_PREVIEW_CHARS;

// `E'...'` strings honour backslash escapes; standard strings only double quotes.
const LITERAL_PATTERN: &str = r"(?P<placeholder>\$\d+)|(?P<string>[Ee]'(?:[^'\\]|\\(?s:.)|'')*'|'(?:[^']|'')*')|(?P<number>\b\d+(?:\.\d+)?\b)";
const DOLLAR_TAG_PATTERN: &str = r"\$(?:[A-Za-z_][A-Za-z0-9_]*)?\$";
const WHITESPACE_PATTERN: &str = r"\s+";

static LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_regex_unsafe(LITERAL_PATTERN, "LITERAL_RE"));
static DOLLAR_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_regex_unsafe(DOLLAR_TAG_PATTERN, "DOLLAR_TAG_RE"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_regex_unsafe(WHITESPACE_PATTERN, "WHITESPACE_RE"));

/// Replaces string and numeric literals with `?` and collapses whitespace.
pub fn redact_sql(sql: &str) -> String {
    let masked = mask_dollar_quoted(sql);
    let redacted = LITERAL_RE.replace_all(&masked, |caps: &Captures| {
        if let Some(placeholder) = caps.name("placeholder") {
            placeholder.as_str().to_string()
        } else if caps.name("string").is_some() {
            "'?'".to_string()
        } else {
            "?".to_string()
        }
    });
    WHITESPACE_RE.replace_all(redacted.trim(), " ").into_owned()
}

/// Replaces each dollar-quoted string with `'?'`. An unterminated one runs to
/// the end of the statement.
fn mask_dollar_quoted(sql: &str) -> Cow<'_, str> {
    let mut masked = String::new();
    let mut copied = 0;
    let mut search_from = 0;

    while let Some(open) = DOLLAR_TAG_RE.find_at(sql, search_from) {
        // `a$b$` is an identifier, not a quote
        let inside_identifier = sql[..open.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$');
        if inside_identifier {
            search_from = open.start() + 1;
            continue;
        }

        let delimiter = open.as_str();
        let close = sql[open.end()..]
            .find(delimiter)
            .map_or(sql.len(), |offset| open.end() + offset + delimiter.len());
        masked.push_str(&sql[copied..open.start()]);
        masked.push_str("'?'");
        copied = close;
        search_from = close;
    }

    if masked.is_empty() {
        return Cow::Borrowed(sql);
    }
    masked.push_str(&sql[copied..]);
    Cow::Owned(masked)
}

/// Redacted statement shortened to `SQL_LOG_PREVIEW_CHARS` characters.
pub fn sql_preview(sql: &str) -> String {
    let redacted = redact_sql(sql);
    if redacted.chars().count() <= SQL_LOG_PREVIEW_CHARS {
        return redacted;
    }
    let mut preview: String = redacted.chars().take(SQL_LOG_PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}
