use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes. Every `AppError` produced by this workspace uses one of these.
pub mod codes {
    pub const CONFIG_READ_FAILED: &str = "CONFIG_READ_FAILED";
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
    pub const UNKNOWN_SYSTEM: &str = "UNKNOWN_SYSTEM";

    pub const IO_LIST_FAILED: &str = "IO_LIST_FAILED";
    pub const IO_READ_FAILED: &str = "IO_READ_FAILED";
    pub const PARSE_MALFORMED: &str = "PARSE_MALFORMED";

    pub const TIMEOUT: &str = "TIMEOUT";
    pub const TASK_FAILED: &str = "TASK_FAILED";

    pub const SINK_TRANSIENT: &str = "SINK_TRANSIENT";
    pub const SINK_INIT_FAILED: &str = "SINK_INIT_FAILED";
    pub const MESSAGE_INVALID: &str = "MESSAGE_INVALID";

    pub const INSUFFICIENT_DATA: &str = "INSUFFICIENT_DATA";

    pub const DB_OPEN_FAILED: &str = "DB_OPEN_FAILED";
    pub const DB_MIGRATION_FAILED: &str = "DB_MIGRATION_FAILED";
    pub const DB_QUERY_FAILED: &str = "DB_QUERY_FAILED";
    pub const DB_TX_FAILED: &str = "DB_TX_FAILED";
    pub const AUDIT_WRITE_FAILED: &str = "AUDIT_WRITE_FAILED";
}

/// Coarse classification used by the engine to decide how to degrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Io,
    ParseMalformed,
    Timeout,
    SinkTransient,
    InsufficientData,
    Other,
}

/// Single structured error shape used across ingestion, analytics, delivery and audit layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code.as_str() {
            codes::CONFIG_READ_FAILED | codes::CONFIG_INVALID | codes::UNKNOWN_SYSTEM => {
                ErrorKind::Config
            }
            codes::IO_LIST_FAILED | codes::IO_READ_FAILED => ErrorKind::Io,
            codes::PARSE_MALFORMED => ErrorKind::ParseMalformed,
            codes::TIMEOUT => ErrorKind::Timeout,
            codes::SINK_TRANSIENT => ErrorKind::SinkTransient,
            codes::INSUFFICIENT_DATA => ErrorKind::InsufficientData,
            _ => ErrorKind::Other,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(codes::CONFIG_INVALID, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(codes::TIMEOUT, message).with_retryable(true)
    }

    pub fn sink_transient(message: impl Into<String>) -> Self {
        Self::new(codes::SINK_TRANSIENT, message).with_retryable(true)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(d) = &self.details {
            write!(f, " ({d})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_is_structured() {
        let err = AppError::new(codes::IO_READ_FAILED, "read failed").with_retryable(false);
        assert_eq!(err.code, "IO_READ_FAILED");
        assert_eq!(err.message, "read failed");
        assert!(!err.retryable);
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn display_includes_details_when_present() {
        let err = AppError::sink_transient("smtp down").with_details("421 try later");
        assert_eq!(err.to_string(), "[SINK_TRANSIENT] smtp down (421 try later)");
        assert!(err.retryable);
        assert_eq!(err.kind(), ErrorKind::SinkTransient);
    }

    #[test]
    fn unknown_codes_classify_as_other() {
        assert_eq!(AppError::new("DB_QUERY_FAILED", "x").kind(), ErrorKind::Other);
        assert_eq!(AppError::new(codes::UNKNOWN_SYSTEM, "x").kind(), ErrorKind::Config);
    }
}
