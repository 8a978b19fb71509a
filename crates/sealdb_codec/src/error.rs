//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while addressing or validating values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A key path could not be parsed or applied.
    #[error("invalid key path '{path}': {message}")]
    InvalidKeyPath {
        /// The offending key path.
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// A value is not usable as a key.
    #[error("invalid key: {type_name} values cannot be used as keys")]
    InvalidKey {
        /// Type name of the rejected value.
        type_name: &'static str,
    },

    /// An operation expected a map value.
    #[error("expected a map, found {type_name}")]
    NotAMap {
        /// Type name of the value that was found.
        type_name: &'static str,
    },

    /// Unsupported value during deserialization.
    #[error("unsupported value: {message}")]
    Unsupported {
        /// Description of the unsupported construct.
        message: String,
    },
}

impl CodecError {
    /// Create an invalid key path error.
    pub fn invalid_key_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidKeyPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported value error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}
