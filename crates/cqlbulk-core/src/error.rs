//! The error taxonomy of the engine.
//!
//! Per-record failures (connector, mapping, execution) are recoverable: they
//! travel as values inside records and results, get logged, and count toward
//! the error ceiling. Everything else terminates the workflow. The exit-code
//! mapping in the binary dispatches on [`BulkError`] kinds.

use std::sync::Arc;

use thiserror::Error;

use crate::record::Field;
use crate::value::{CqlType, ExternalType};

pub type Result<T, E = BulkError> = std::result::Result<T, E>;

/// Top-level error kinds.
#[derive(Debug, Error)]
pub enum BulkError {
    /// Invalid or missing configuration; always fatal and always surfaced
    /// before execution begins.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A read or write of an external resource failed for one record.
    #[error("connector error: {0}")]
    Connector(#[source] anyhow::Error),

    /// Codec conversion or mapping-rule violation for one record.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// The database rejected a statement.
    #[error(transparent)]
    Execution(#[from] BulkExecutionError),

    /// Cooperative cancellation; not a failure, distinct exit code.
    #[error("operation interrupted")]
    Interrupted,

    /// The error ceiling was exceeded; the workflow aborts.
    #[error("too many errors: {observed} recorded, ceiling is {ceiling}")]
    TooManyErrors { observed: u64, ceiling: String },

    /// Any other uncaught condition; surfaces the crashed status.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl BulkError {
    /// Recoverable errors are logged per record and never abort the
    /// pipeline by themselves.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BulkError::Connector(_) | BulkError::Mapping(_) | BulkError::Execution(_)
        )
    }
}

/// Conversion failures raised by codecs.
#[derive(Debug, Error, Clone)]
pub enum CodecError {
    #[error("no codec found to convert {external} to {cql}")]
    NoCodecFound { external: ExternalType, cql: CqlType },

    #[error("cannot parse '{input}' as {target}: {reason}")]
    Parse { input: String, target: CqlType, reason: String },

    #[error("value '{input}' does not fit in {target}")]
    Overflow { input: String, target: CqlType },

    #[error("cannot format {cql} value as {external}: {reason}")]
    Format { cql: CqlType, external: ExternalType, reason: String },
}

/// Mapping-rule violations raised when binding a record to a statement.
#[derive(Debug, Error, Clone)]
pub enum MappingError {
    #[error("extra field {field} in record and schema.allow-extra-fields is false")]
    ExtraField { field: Field },

    #[error("required field for variable '{variable}' missing and schema.allow-missing-fields is false")]
    MissingField { variable: String },

    #[error("could not convert field {field} for variable '{variable}': {source}")]
    Conversion {
        field: Field,
        variable: String,
        #[source]
        source: CodecError,
    },

    #[error("invalid mapping declaration: {0}")]
    InvalidMapping(String),
}

impl From<CodecError> for MappingError {
    fn from(e: CodecError) -> Self {
        MappingError::InvalidMapping(e.to_string())
    }
}

/// Errors surfaced by the database driver. The engine never retries these
/// itself; retry policy lives inside the driver.
#[derive(Debug, Error, Clone)]
pub enum DriverError {
    #[error("not enough replicas available")]
    Unavailable,
    #[error("write timed out")]
    WriteTimeout,
    #[error("read timed out")]
    ReadTimeout,
    #[error("write failed on replica")]
    WriteFailure,
    #[error("function execution failed")]
    FunctionFailure,
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("session is closed")]
    SessionClosed,
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Session-level faults are unrecoverable and terminate the workflow;
    /// everything else is a per-statement failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::SessionClosed)
    }
}

/// A driver error wrapped with the identity of the statement that failed.
#[derive(Debug, Error, Clone)]
#[error("statement '{query}' failed: {source}")]
pub struct BulkExecutionError {
    pub query: Arc<str>,
    #[source]
    pub source: DriverError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds() {
        assert!(BulkError::Mapping(MappingError::MissingField { variable: "v".into() })
            .is_recoverable());
        assert!(!BulkError::Interrupted.is_recoverable());
        assert!(!BulkError::Config("bad".into()).is_recoverable());
    }

    #[test]
    fn execution_error_names_the_query() {
        let e = BulkExecutionError {
            query: Arc::from("INSERT INTO t (a) VALUES (?)"),
            source: DriverError::WriteTimeout,
        };
        let msg = e.to_string();
        assert!(msg.contains("INSERT INTO t"));
        assert!(msg.contains("timed out"));
    }
}
