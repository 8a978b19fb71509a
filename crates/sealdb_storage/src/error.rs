//! Error types for storage operations.

use crate::traits::TransactionId;
use sealdb_codec::CodecError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A request was issued while its transaction was not active.
    #[error("transaction {id} is not active")]
    TransactionInactive {
        /// The inactive transaction.
        id: TransactionId,
    },

    /// A request was issued against a committed transaction.
    #[error("transaction {id} has already finished")]
    TransactionFinished {
        /// The finished transaction.
        id: TransactionId,
    },

    /// The transaction was aborted.
    #[error("transaction {id} was aborted")]
    TransactionAborted {
        /// The aborted transaction.
        id: TransactionId,
    },

    /// A write was issued in a read-only transaction.
    #[error("table '{table}' is read-only in this transaction")]
    ReadOnly {
        /// The table written to.
        table: String,
    },

    /// The table does not exist in the schema.
    #[error("table not found: {name}")]
    TableNotFound {
        /// Name of the table.
        name: String,
    },

    /// The index does not exist on the table.
    #[error("index '{index}' not found on table '{table}'")]
    IndexNotFound {
        /// Table searched.
        table: String,
        /// Missing index name.
        index: String,
    },

    /// The table is not part of the transaction's scope.
    #[error("table '{table}' is not in the transaction's scope")]
    NotInScope {
        /// Table outside the scope.
        table: String,
    },

    /// A uniqueness constraint was violated.
    #[error("constraint violation on table '{table}': {message}")]
    ConstraintViolation {
        /// Table the write targeted.
        table: String,
        /// Description of the violation.
        message: String,
    },

    /// A key value is not a valid key.
    #[error("invalid key for table '{table}': {source}")]
    InvalidKey {
        /// Table the request targeted.
        table: String,
        /// Why the key was rejected.
        #[source]
        source: CodecError,
    },

    /// A record has no usable primary key.
    #[error("record for table '{table}' has no primary key")]
    MissingKey {
        /// Table the write targeted.
        table: String,
    },

    /// The schema is malformed.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The event loop ran out of work before the awaited future completed.
    #[error("event loop stalled before the future completed")]
    Stalled,

    /// An interceptor stage failed.
    #[error("{stage} stage failed: {source}")]
    Interceptor {
        /// Name of the failing stage.
        stage: String,
        /// The stage's own error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Key or key-path error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl StorageError {
    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wraps an error raised by an interceptor stage.
    pub fn interceptor(
        stage: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Interceptor {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Returns true if this error reports an inactive or finished
    /// transaction.
    pub fn is_transaction_closed(&self) -> bool {
        matches!(
            self,
            Self::TransactionInactive { .. }
                | Self::TransactionFinished { .. }
                | Self::TransactionAborted { .. }
        )
    }
}
