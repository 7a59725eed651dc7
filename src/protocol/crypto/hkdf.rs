use super::CryptoError;
use hkdf::Hkdf;
use sha2::Sha512;
use zeroize::Zeroize;

/// HKDF-SHA512 for key derivation
pub struct HkdfSha512 {
    hkdf: Hkdf<Sha512>,
}

impl HkdfSha512 {
    /// Create HKDF instance from input key material
    ///
    /// # Arguments
    /// * `salt` - Optional salt (can be None or empty)
    /// * `ikm` - Input key material
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        let hkdf = Hkdf::<Sha512>::new(salt, ikm);
        Self { hkdf }
    }

    /// Expand to derive output key material
    ///
    /// # Arguments
    /// * `info` - Context/application-specific info
    /// * `length` - Desired output length
    ///
    /// # Errors
    /// Returns `KeyDerivationFailed` if `length` exceeds the HKDF-SHA512 limit.
    pub fn expand(&self, info: &[u8], length: usize) -> Result<Vec<u8>, CryptoError> {
        let mut okm = vec![0u8; length];
        self.hkdf
            .expand(info, &mut okm)
            .map_err(|_| CryptoError::KeyDerivationFailed("HKDF expand failed".into()))?;
        Ok(okm)
    }

    /// Expand into fixed-size array
    ///
    /// # Errors
    /// Returns `KeyDerivationFailed` if `N` exceeds the HKDF-SHA512 limit.
    pub fn expand_fixed<const N: usize>(&self, info: &[u8]) -> Result<[u8; N], CryptoError> {
        let mut okm = [0u8; N];
        self.hkdf
            .expand(info, &mut okm)
            .map_err(|_| CryptoError::KeyDerivationFailed("HKDF expand failed".into()))?;
        Ok(okm)
    }
}

/// Convenience function for one-shot key derivation
///
/// # Errors
/// Returns `KeyDerivationFailed` if `length` exceeds the HKDF-SHA512 limit.
pub fn derive_key(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    HkdfSha512::new(salt, ikm).expand(info, length)
}

/// Salt/info pairs used by HAP.
///
/// The strings are part of the wire contract and must match byte for byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfLabel {
    /// Key protecting Pair-Setup M5/M6
    PairSetupEncrypt,
    /// Controller signing material in Pair-Setup M5
    PairSetupControllerSign,
    /// Accessory signing material in Pair-Setup M6
    PairSetupAccessorySign,
    /// Key protecting Pair-Verify M2/M3
    PairVerifyEncrypt,
    /// Traffic written by the controller, read by the accessory
    ControlWrite,
    /// Traffic read by the controller, written by the accessory
    ControlRead,
}

impl KdfLabel {
    /// HKDF salt for this label
    #[must_use]
    pub fn salt(self) -> &'static [u8] {
        match self {
            Self::PairSetupEncrypt => b"Pair-Setup-Encrypt-Salt",
            Self::PairSetupControllerSign => b"Pair-Setup-Controller-Sign-Salt",
            Self::PairSetupAccessorySign => b"Pair-Setup-Accessory-Sign-Salt",
            Self::PairVerifyEncrypt => b"Pair-Verify-Encrypt-Salt",
            Self::ControlWrite | Self::ControlRead => b"Control-Salt",
        }
    }

    /// HKDF info for this label
    #[must_use]
    pub fn info(self) -> &'static [u8] {
        match self {
            Self::PairSetupEncrypt => b"Pair-Setup-Encrypt-Info",
            Self::PairSetupControllerSign => b"Pair-Setup-Controller-Sign-Info",
            Self::PairSetupAccessorySign => b"Pair-Setup-Accessory-Sign-Info",
            Self::PairVerifyEncrypt => b"Pair-Verify-Encrypt-Info",
            Self::ControlWrite => b"Control-Write-Encryption-Key",
            Self::ControlRead => b"Control-Read-Encryption-Key",
        }
    }

    /// Derive a 32-byte key for this label
    ///
    /// # Errors
    /// Never fails for 32-byte output in practice; the error is propagated from HKDF.
    pub fn derive(self, ikm: &[u8]) -> Result<[u8; 32], CryptoError> {
        HkdfSha512::new(Some(self.salt()), ikm).expand_fixed::<32>(self.info())
    }
}

/// Post-verify control channel keys
///
/// Both sides of a Pair-Verify derive the same pair. The accessory reads with
/// `control_write` and writes with `control_read`; the controller does the
/// opposite.
pub struct SessionKeys {
    /// Key for controller-to-accessory traffic
    pub control_write: [u8; 32],
    /// Key for accessory-to-controller traffic
    pub control_read: [u8; 32],
}

impl SessionKeys {
    /// Derive both control keys from a Pair-Verify shared secret
    ///
    /// # Errors
    /// Propagates HKDF failures.
    pub fn derive(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            control_write: KdfLabel::ControlWrite.derive(shared_secret)?,
            control_read: KdfLabel::ControlRead.derive(shared_secret)?,
        })
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("control_write", &"<redacted>")
            .field("control_read", &"<redacted>")
            .finish()
    }
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.control_write.zeroize();
        self.control_read.zeroize();
    }
}
