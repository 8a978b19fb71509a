//! Cipher contract and the AES-256-GCM implementation.

use crate::error::{CryptoError, CryptoResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use futures::future::{self, FutureExt, LocalBoxFuture};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypts and decrypts opaque byte strings.
///
/// Calls may overlap freely; no ordering between calls is assumed.
/// Every call is a suspension point for the caller.
pub trait Cipher {
    /// Encrypts `data`.
    fn encrypt(&self, data: Vec<u8>) -> LocalBoxFuture<'static, CryptoResult<Vec<u8>>>;

    /// Decrypts bytes produced by [`Cipher::encrypt`].
    fn decrypt(&self, data: Vec<u8>) -> LocalBoxFuture<'static, CryptoResult<Vec<u8>>>;
}

/// Encryption key for AES-256-GCM.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random encryption key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::invalid_key_size(bytes.len(), KEY_SIZE));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives a key from a password using HKDF-SHA256.
    ///
    /// HKDF is not a password hash. Use it only when `password` already
    /// has high entropy, such as a random passphrase.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] if HKDF expansion fails.
    pub fn derive_from_password(password: &[u8], salt: &[u8]) -> CryptoResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), password);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"sealdb-record-key-v1", &mut bytes)
            .map_err(|_| CryptoError::key_derivation("HKDF expand failed"))?;

        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// AES-256-GCM [`Cipher`].
///
/// Output format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`. A
/// fresh random nonce is drawn for every record, so encrypting the same
/// record twice yields different bytes.
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
    associated_data: Vec<u8>,
}

impl AesGcmCipher {
    /// Creates a cipher with the given key.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self {
            cipher,
            associated_data: Vec::new(),
        }
    }

    /// Binds every ciphertext to `aad`, which must match on decryption.
    ///
    /// Useful to tie records to one database so ciphertext copied from
    /// another database fails to decrypt.
    #[must_use]
    pub fn with_associated_data(mut self, aad: impl Into<Vec<u8>>) -> Self {
        self.associated_data = aad.into();
        self
    }

    /// Encrypts synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Cipher`] if encryption fails.
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let payload = Payload {
            msg: plaintext,
            aad: &self.associated_data,
        };
        let ciphertext = self
            .cipher
            .encrypt(nonce, payload)
            .map_err(|_| CryptoError::cipher("encryption error"))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);
        Ok(result)
    }

    /// Decrypts synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Cipher`] for short input, a wrong key,
    /// mismatched associated data or corrupted bytes.
    pub fn open(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::cipher("ciphertext too short"));
        }

        let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
        let payload = Payload {
            msg: &ciphertext[NONCE_SIZE..],
            aad: &self.associated_data,
        };
        self.cipher
            .decrypt(nonce, payload)
            .map_err(|_| CryptoError::cipher("decryption error"))
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, data: Vec<u8>) -> LocalBoxFuture<'static, CryptoResult<Vec<u8>>> {
        future::ready(self.seal(&data)).boxed_local()
    }

    fn decrypt(&self, data: Vec<u8>) -> LocalBoxFuture<'static, CryptoResult<Vec<u8>>> {
        future::ready(self.open(&data)).boxed_local()
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher")
            .field("cipher", &"Aes256Gcm")
            .field("associated_data", &self.associated_data.len())
            .finish()
    }
}
