//! Error type definitions.
//!
//! This module defines the closed error taxonomy of the access layer and the
//! single error type every operation returns.

use std::fmt;

use chrono::{DateTime, Utc};
use log::SetLoggerError;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

/// Boxed error used as the underlying cause of a [`DbError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for initialization failures of the binary.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error binding or running the status server.
    #[error("Status server error: {0}")]
    StatusServerError(String),
}

/// Classification of every failure the access layer can report.
///
/// Raw driver errors are mapped onto this taxonomy exactly once, right after
/// the failing call (see [`crate::error_handling::classify_sqlx_error`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum ErrorKind {
    /// No usable endpoint configured, or the service is not (or no longer) usable.
    Configuration,
    /// Network reset, broken pipe, server shutting down, pool closed.
    Connectivity,
    /// Undefined table or column, or any other structural statement error.
    Schema,
    /// Unique, foreign-key, check or not-null violation.
    ConstraintViolation,
    /// Connection acquisition or statement timeout.
    Timeout,
    /// A pool reset attempt failed; the previous pool stays current.
    Reset,
    /// Any other server-reported failure. Not retried.
    Query,
}

impl ErrorKind {
    /// Whether a failure of this kind may succeed when attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Connectivity | ErrorKind::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "Configuration error",
            ErrorKind::Connectivity => "Connectivity error",
            ErrorKind::Schema => "Schema error",
            ErrorKind::ConstraintViolation => "Constraint violation",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Reset => "Pool reset error",
            ErrorKind::Query => "Query error",
        }
    }

    /// Short machine-friendly label, used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Schema => "schema",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Reset => "reset",
            ErrorKind::Query => "query",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every operation of the access layer.
///
/// Carries the classification, the SQLSTATE code when the server supplied one,
/// and the number of attempts that were made before the error surfaced, so
/// callers can tell "transient, already retried" from "structural, never retried".
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct DbError {
    kind: ErrorKind,
    message: String,
    code: Option<String>,
    attempts: u32,
    dispatched: bool,
    #[source]
    source: Option<BoxError>,
}

impl DbError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        DbError {
            kind,
            message: message.into(),
            code: None,
            attempts: 1,
            dispatched: true,
            source: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        DbError::new(ErrorKind::Configuration, message)
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        DbError::new(ErrorKind::Connectivity, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        DbError::new(ErrorKind::Timeout, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        DbError::new(ErrorKind::Schema, message)
    }

    pub fn constraint_violation(message: impl Into<String>) -> Self {
        DbError::new(ErrorKind::ConstraintViolation, message)
    }

    /// Wraps the failure that prevented a pool reset.
    pub fn reset(cause: DbError) -> Self {
        DbError {
            kind: ErrorKind::Reset,
            message: format!("pool reset failed: {}", cause),
            code: cause.code.clone(),
            attempts: 1,
            dispatched: false,
            source: Some(Box::new(cause)),
        }
    }

    /// Attaches the SQLSTATE code reported by the server.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Marks the failure as having happened before the statement left the
    /// process (e.g. while acquiring a connection).
    pub fn not_dispatched(mut self) -> Self {
        self.dispatched = false;
        self
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// SQLSTATE code, when the server reported one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Number of attempts made before this error was returned.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// `false` when the statement provably never reached the server.
    pub fn was_dispatched(&self) -> bool {
        self.dispatched
    }
}

/// One failed attempt. Ephemeral: used for logging and metrics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub attempt: u32,
}

impl FailureRecord {
    pub fn new(kind: ErrorKind, attempt: u32) -> Self {
        FailureRecord {
            timestamp: Utc::now(),
            kind,
            attempt,
        }
    }
}
