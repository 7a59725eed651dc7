//! Accessory long-term identity

use rand::Rng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::protocol::crypto::{CryptoError, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};

/// Accessory pairing id and its Ed25519 signing key
///
/// Created once per accessory and kept stable across restarts, so controllers
/// that paired earlier can still run Pair-Verify.
pub struct LongTermIdentity {
    pairing_id: String,
    keypair: Ed25519KeyPair,
}

impl LongTermIdentity {
    /// Generate a fresh identity with a random `XX:XX:XX:XX:XX:XX` pairing id
    #[must_use]
    pub fn generate() -> Self {
        Self::new(generate_pairing_id(), Ed25519KeyPair::generate())
    }

    /// Build from an existing pairing id and key pair
    #[must_use]
    pub fn new(pairing_id: impl Into<String>, keypair: Ed25519KeyPair) -> Self {
        Self {
            pairing_id: pairing_id.into(),
            keypair,
        }
    }

    /// Restore from its persisted form
    ///
    /// # Errors
    ///
    /// Returns error if the stored seed is not a valid Ed25519 secret key
    pub fn from_stored(stored: &StoredIdentity) -> Result<Self, CryptoError> {
        Ok(Self::new(
            stored.pairing_id.clone(),
            Ed25519KeyPair::from_bytes(&stored.secret_key)?,
        ))
    }

    /// Persisted form (pairing id and 32-byte secret seed)
    #[must_use]
    pub fn to_stored(&self) -> StoredIdentity {
        StoredIdentity {
            pairing_id: self.pairing_id.clone(),
            secret_key: self.keypair.secret_bytes(),
        }
    }

    /// Accessory pairing id
    #[must_use]
    pub fn pairing_id(&self) -> &str {
        &self.pairing_id
    }

    /// Long-term public key
    #[must_use]
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// Sign with the long-term key
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.keypair.sign(message)
    }
}

impl std::fmt::Debug for LongTermIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongTermIdentity")
            .field("pairing_id", &self.pairing_id)
            .field("public_key", &self.keypair.public_key())
            .finish_non_exhaustive()
    }
}

/// Serializable form of [`LongTermIdentity`]
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredIdentity {
    /// Accessory pairing id
    pub pairing_id: String,
    /// Ed25519 secret seed
    pub secret_key: [u8; 32],
}

impl std::fmt::Debug for StoredIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredIdentity")
            .field("pairing_id", &self.pairing_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Drop for StoredIdentity {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

/// Generate a random pairing id in MAC address format
#[must_use]
pub fn generate_pairing_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 6] = rng.r#gen();
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}
