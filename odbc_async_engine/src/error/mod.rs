pub mod diagnostics;

pub use diagnostics::{DiagnosticRecord, SqlState};

use thiserror::Error;

/// Error category for decision-making (retry, abort, reconnect, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient error - retry may resolve
    Transient,
    /// Fatal error - should abort operation
    Fatal,
    /// Validation error - invalid caller input
    Validation,
    /// Connection lost - should reconnect
    ConnectionLost,
}

#[derive(Error, Debug, Clone)]
pub enum OdbcError {
    /// A driver call returned a non-success code. Every diagnostic record the
    /// driver stacked on the handle is kept, in driver order.
    #[error("{}", diagnostics::display_records(.records))]
    Diagnostics { records: Vec<DiagnosticRecord> },

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Connection string is empty")]
    EmptyConnectionString,

    #[error("Connection is not open")]
    NotConnected,

    #[error("Could not allocate enough memory")]
    OutOfMemory,

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),
}

impl OdbcError {
    pub fn records(&self) -> &[DiagnosticRecord] {
        match self {
            OdbcError::Diagnostics { records } => records,
            _ => &[],
        }
    }

    /// SQLSTATE of the first diagnostic record, `00000` for non-driver errors.
    pub fn sqlstate(&self) -> SqlState {
        self.records()
            .first()
            .map(|r| r.sqlstate)
            .unwrap_or_default()
    }

    pub fn native_code(&self) -> i32 {
        self.records().first().map(|r| r.native_code).unwrap_or(0)
    }

    pub fn message(&self) -> String {
        match self.records().first() {
            Some(record) => record.message.clone(),
            None => self.to_string(),
        }
    }

    /// Returns true if the error is transient and may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            OdbcError::Diagnostics { records } => records.iter().any(|r| {
                r.sqlstate.class() == "08" || r.sqlstate == "HYT00" || r.sqlstate == "HYT01"
            }),
            OdbcError::OutOfMemory => true,
            OdbcError::InternalError(msg) => msg.contains("timeout") || msg.contains("Timeout"),
            _ => false,
        }
    }

    /// Returns true if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        match self {
            OdbcError::EmptyConnectionString | OdbcError::NotConnected => true,
            OdbcError::Diagnostics { records } => {
                records.iter().any(|r| r.sqlstate.class() == "08")
            }
            _ => false,
        }
    }

    /// Returns the error category for decision-making
    pub fn error_category(&self) -> ErrorCategory {
        if matches!(self, OdbcError::ValidationError(_)) {
            return ErrorCategory::Validation;
        }
        if matches!(self, OdbcError::UnsupportedFeature(_)) {
            return ErrorCategory::Fatal;
        }
        if self.is_connection_error() {
            return ErrorCategory::ConnectionLost;
        }
        if self.is_retryable() {
            return ErrorCategory::Transient;
        }
        ErrorCategory::Fatal
    }
}

pub type Result<T> = std::result::Result<T, OdbcError>;
