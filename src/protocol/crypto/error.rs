use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key or nonce has the wrong size
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Ed25519 signature did not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// AEAD tag mismatch or malformed ciphertext
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// AEAD encryption failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// HKDF could not produce the requested output
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// SRP parameter or proof was rejected
    #[error("SRP error: {0}")]
    SrpError(String),

    /// Public key bytes do not decode to a usable key
    #[error("invalid public key")]
    InvalidPublicKey,
}
