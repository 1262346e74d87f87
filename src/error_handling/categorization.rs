//! Error categorization and retry strategy.
//!
//! Every raw driver error is classified here, once, immediately after the call
//! that produced it. Downstream code dispatches on [`ErrorKind`] only.

use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

use super::types::{DbError, ErrorKind};
use crate::config::{MAX_RETRIES, RETRY_BASE_DELAY_MS, RETRY_FACTOR};

/// Creates the exponential backoff schedule used between query attempts.
///
/// Yields `MAX_RETRIES` delays: 100ms, 200ms, 400ms. `tokio_retry` computes
/// `current * factor` and then multiplies `current` by the base, so the base
/// is the growth factor and `factor` scales it to the first delay.
pub fn get_retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(RETRY_FACTOR)
        .factor(RETRY_BASE_DELAY_MS / RETRY_FACTOR)
        .take(MAX_RETRIES)
}

/// Maps a PostgreSQL SQLSTATE code onto the error taxonomy.
pub fn classify_sqlstate(code: &str) -> ErrorKind {
    match code {
        // admin_shutdown, crash_shutdown, cannot_connect_now, too_many_connections
        "57P01" | "57P02" | "57P03" | "53300" => ErrorKind::Connectivity,
        // query_canceled (statement_timeout)
        "57014" => ErrorKind::Timeout,
        _ if code.starts_with("08") => ErrorKind::Connectivity,
        _ if code.starts_with("42") => ErrorKind::Schema,
        _ if code.starts_with("23") => ErrorKind::ConstraintViolation,
        _ => ErrorKind::Query,
    }
}

/// Classifies a `sqlx::Error` into a [`DbError`].
///
/// Server errors are mapped by SQLSTATE. Acquisition timeouts and a closed
/// pool are flagged as not dispatched: the statement never left the process.
pub fn classify_sqlx_error(error: sqlx::Error) -> DbError {
    let classified = match &error {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            let code = db_err.code().map(|c| c.into_owned());
            match code {
                Some(code) => DbError::new(classify_sqlstate(&code), message).with_code(code),
                None => DbError::new(ErrorKind::Query, message),
            }
        }
        sqlx::Error::PoolTimedOut => {
            DbError::timeout("timed out waiting for a free connection").not_dispatched()
        }
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            DbError::connectivity(error.to_string()).not_dispatched()
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => {
            DbError::connectivity(error.to_string())
        }
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_) => DbError::schema(error.to_string()),
        sqlx::Error::Configuration(_) => {
            DbError::configuration(error.to_string()).not_dispatched()
        }
        _ => DbError::new(ErrorKind::Query, error.to_string()),
    };
    classified.with_source(error)
}
