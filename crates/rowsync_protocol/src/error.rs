//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding or validating protocol types.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Schema validation error.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Codec error (CBOR encode/decode).
    #[error("codec error: {0}")]
    Codec(String),
}

/// Errors raised while validating a sync schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The foreign-key graph contains a cycle; no apply order exists.
    #[error("cyclic foreign keys involving tables: {0:?}")]
    CyclicForeignKeys(Vec<String>),

    /// A relation or setup entry references a table not present in the schema.
    #[error("unknown table {0}")]
    UnknownTable(String),

    /// A table has no primary key; change tracking requires one.
    #[error("table {0} has no primary key")]
    MissingPrimaryKey(String),

    /// A relation references a column not present in the child table.
    #[error("unknown column {column} in table {table}")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SchemaError::MissingPrimaryKey("customer".into());
        assert_eq!(err.to_string(), "table customer has no primary key");

        let err = ProtocolError::Codec("truncated input".into());
        assert!(err.to_string().contains("truncated"));
    }
}
