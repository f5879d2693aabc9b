//! Error types for the Ferry engine.

use thiserror::Error;

/// All possible errors from the Ferry engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("record is missing an id")]
    MissingId,

    #[error("unknown column '{column}' in modified_columns for table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    // Write-path errors
    #[error("record already exists: {0}")]
    RecordAlreadyExists(String),

    // Convergence errors
    #[error(
        "integrity fingerprint mismatch: local {local_fingerprint} ({local_count} rows) \
         vs remote {remote_fingerprint} ({remote_count} rows)"
    )]
    IntegrityMismatch {
        local_fingerprint: String,
        remote_fingerprint: String,
        local_count: usize,
        remote_count: usize,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::UnknownTable("notes".into());
        assert_eq!(err.to_string(), "unknown table: notes");

        let err = Error::UnknownColumn {
            table: "todos".into(),
            column: "priority".into(),
        };
        assert_eq!(
            err.to_string(),
            "unknown column 'priority' in modified_columns for table todos"
        );

        let err = Error::RecordAlreadyExists("t1".into());
        assert_eq!(err.to_string(), "record already exists: t1");
    }
}
