use super::{CryptoError, lengths};
use chacha20poly1305::{
    ChaCha20Poly1305 as ChaChaImpl, Nonce as ChaChaNonce,
    aead::{Aead, KeyInit, Payload},
};

/// 12-byte nonce for ChaCha20-Poly1305
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; 12]);

impl Nonce {
    /// Create from u64 counter (little-endian, padded)
    pub fn from_counter(counter: u64) -> Self {
        let mut arr = [0u8; 12];
        arr[4..12].copy_from_slice(&counter.to_le_bytes());
        Self(arr)
    }

    /// Create from an 8-byte handshake label such as `PS-Msg05`
    ///
    /// The label takes the place of the counter: four zero bytes followed by
    /// the ASCII label.
    pub fn from_label(label: &[u8; 8]) -> Self {
        let mut arr = [0u8; 12];
        arr[4..12].copy_from_slice(label);
        Self(arr)
    }
}

impl std::fmt::Debug for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Nonce({:02x?})", self.0)
    }
}

/// ChaCha20-Poly1305 AEAD cipher
pub struct ChaCha20Poly1305Cipher {
    cipher: ChaChaImpl,
}

impl ChaCha20Poly1305Cipher {
    /// Create cipher with 32-byte key
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != lengths::CHACHA_KEY {
            return Err(CryptoError::InvalidKeyLength {
                expected: lengths::CHACHA_KEY,
                actual: key.len(),
            });
        }

        let cipher =
            ChaChaImpl::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
                expected: lengths::CHACHA_KEY,
                actual: key.len(),
            })?;

        Ok(Self { cipher })
    }

    /// Encrypt with authentication
    ///
    /// Returns ciphertext with appended 16-byte tag
    pub fn encrypt(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.encrypt_with_aad(nonce, &[], plaintext)
    }

    /// Encrypt with associated data
    pub fn encrypt_with_aad(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(
                &ChaChaNonce::from(nonce.0),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    /// Decrypt and verify authentication
    ///
    /// Input should be ciphertext with appended 16-byte tag
    pub fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.decrypt_with_aad(nonce, &[], ciphertext)
    }

    /// Decrypt with associated data
    pub fn decrypt_with_aad(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < lengths::CHACHA_TAG {
            return Err(CryptoError::DecryptionFailed(
                "ciphertext shorter than tag".to_string(),
            ));
        }

        self.cipher
            .decrypt(
                &ChaChaNonce::from(nonce.0),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}
