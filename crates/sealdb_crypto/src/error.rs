//! Error types for the encryption layer.

use sealdb_storage::{StorageError, TransactionId};
use thiserror::Error;

/// Result type for encryption operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Stage name under which encryption errors travel through the storage
/// stack.
pub const STAGE: &str = "encryption";

/// Errors that can occur while encrypting or decrypting records.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The cipher rejected an encrypt or decrypt call.
    #[error("cipher failure: {message}")]
    Cipher {
        /// Description of the failure.
        message: String,
    },

    /// A record could not be serialized, or decrypted bytes could not be
    /// deserialized.
    #[error("serialization failure: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Actual size provided.
        actual: usize,
        /// Expected size.
        expected: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {message}")]
    KeyDerivation {
        /// Description of the failure.
        message: String,
    },

    /// The task driving a keepalive wait was dropped before it finished.
    #[error("keepalive for transaction {id} was canceled")]
    KeepAliveCanceled {
        /// Transaction the wait belonged to.
        id: TransactionId,
    },

    /// Error from the storage layer below.
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl CryptoError {
    /// Creates a cipher failure.
    pub fn cipher(message: impl Into<String>) -> Self {
        Self::Cipher {
            message: message.into(),
        }
    }

    /// Creates a serialization failure.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { actual, expected }
    }

    /// Creates a key derivation error.
    pub fn key_derivation(message: impl Into<String>) -> Self {
        Self::KeyDerivation {
            message: message.into(),
        }
    }

    /// Converts into a storage error for the layers above.
    ///
    /// Storage errors pass through unchanged; everything else is wrapped
    /// as [`StorageError::Interceptor`] under the [`STAGE`] name.
    pub fn into_storage(self) -> StorageError {
        match self {
            CryptoError::Storage(e) => e,
            other => StorageError::interceptor(STAGE, other),
        }
    }

    /// Recovers the encryption error carried by a storage error, if any.
    pub fn from_storage(error: &StorageError) -> Option<&CryptoError> {
        match error {
            StorageError::Interceptor { source, .. } => source.downcast_ref::<CryptoError>(),
            _ => None,
        }
    }

    /// Returns true for cipher failures.
    pub fn is_cipher(&self) -> bool {
        matches!(self, CryptoError::Cipher { .. })
    }

    /// Returns true for serialization failures.
    pub fn is_serialization(&self) -> bool {
        matches!(self, CryptoError::Serialization { .. })
    }
}

impl From<StorageError> for CryptoError {
    /// Unwraps encryption errors that crossed the storage stack; keeps
    /// anything else as [`CryptoError::Storage`].
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Interceptor { stage, source } => match source.downcast::<CryptoError>() {
                Ok(crypto) => *crypto,
                Err(source) => CryptoError::Storage(StorageError::Interceptor { stage, source }),
            },
            other => CryptoError::Storage(other),
        }
    }
}
