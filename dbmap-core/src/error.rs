//! Error types for the mapping layer.
//!
//! Every failure is a [`DbError`] tagged with one of five [`ErrorKind`]s:
//!
//! - `Configuration`: missing or invalid connection configuration
//! - `Connection`: pool open, dial or liveness failure
//! - `Prepare`: statement preparation failure, cached or not
//! - `Execution`: driver failure during exec, query or scan
//! - `Mapping`: a field that cannot be set, a failed type conversion, malformed JSON
//!
//! Constructors are `#[track_caller]`, so each error remembers where in the
//! crate it was raised.
//!
//! ```rust
//! use dbmap_core::{DbError, ErrorKind};
//!
//! let err = DbError::mapping("cannot convert text to i32").with_field("Age");
//! assert_eq!(err.kind, ErrorKind::Mapping);
//! assert!(err.to_string().contains("cannot convert"));
//! ```

use std::fmt;
use std::panic::Location;

use thiserror::Error;

/// Result type for mapping-layer operations.
pub type DbResult<T> = Result<T, DbError>;

/// Boxed error used as the original cause of a [`DbError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The category of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid connection configuration.
    Configuration,
    /// Pool open, dial or liveness failure.
    Connection,
    /// Statement preparation failure.
    Prepare,
    /// Driver-level failure during exec, query or scan.
    Execution,
    /// Unsettable field, type conversion failure or malformed JSON column.
    Mapping,
}

impl ErrorKind {
    /// Short name used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Connection => "connection",
            Self::Prepare => "prepare",
            Self::Execution => "execution",
            Self::Mapping => "mapping",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Additional diagnostic context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation that was being performed (`get`, `create`, ...).
    pub operation: Option<String>,
    /// The mapped table involved.
    pub model: Option<String>,
    /// The field involved.
    pub field: Option<String>,
    /// The SQL statement, if one was built.
    pub sql: Option<String>,
    /// The five-character SQLSTATE reported by the server.
    pub sqlstate: Option<String>,
}

/// An error raised by the mapping layer.
#[derive(Error, Debug)]
pub struct DbError {
    /// The error category.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The original cause.
    #[source]
    pub source: Option<BoxError>,
    /// Where the error was raised.
    pub location: &'static Location<'static>,
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)?;
        if let Some(ref field) = self.context.field {
            write!(f, " (field {})", field)?;
        }
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl DbError {
    /// Create an error of the given kind.
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
            location: Location::caller(),
        }
    }

    /// Create a configuration error.
    #[track_caller]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create a connection error.
    #[track_caller]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// Create a prepare error.
    #[track_caller]
    pub fn prepare(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Prepare, message)
    }

    /// Create an execution error.
    #[track_caller]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    /// Create a mapping error.
    #[track_caller]
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Mapping, message)
    }

    /// Attach the original cause.
    pub fn with_source<E: Into<BoxError>>(mut self, source: E) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the operation.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Set the mapped table.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.context.model = Some(model.into());
        self
    }

    /// Set the field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.context.field = Some(field.into());
        self
    }

    /// Set the SQL statement.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.context.sql = Some(sql.into());
        self
    }

    /// Set the server SQLSTATE.
    pub fn with_sqlstate(mut self, code: impl Into<String>) -> Self {
        self.context.sqlstate = Some(code.into());
        self
    }

    /// Check if this is a configuration error.
    pub fn is_configuration(&self) -> bool {
        self.kind == ErrorKind::Configuration
    }

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        self.kind == ErrorKind::Connection
    }

    /// Check if this is a prepare error.
    pub fn is_prepare(&self) -> bool {
        self.kind == ErrorKind::Prepare
    }

    /// Check if this is an execution error.
    pub fn is_execution(&self) -> bool {
        self.kind == ErrorKind::Execution
    }

    /// Check if this is a mapping error.
    pub fn is_mapping(&self) -> bool {
        self.kind == ErrorKind::Mapping
    }

    /// Unique violation (SQLSTATE 23505).
    pub fn is_unique_violation(&self) -> bool {
        self.context.sqlstate.as_deref() == Some("23505")
    }

    /// Foreign key violation (SQLSTATE 23503).
    pub fn is_foreign_key_violation(&self) -> bool {
        self.context.sqlstate.as_deref() == Some("23503")
    }

    /// Not null violation (SQLSTATE 23502).
    pub fn is_not_null_violation(&self) -> bool {
        self.context.sqlstate.as_deref() == Some("23502")
    }
}
