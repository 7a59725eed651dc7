//! `HomeKit` pairing protocol implementation
//!
//! Accessory side of Pair-Setup, Pair-Verify and pairing management. Each
//! handshake is a state machine owned by one connection; every failure is
//! turned into a well-formed TLV error response for the controller.

pub mod identity;
pub mod pairings;
pub mod setup;
pub mod storage;
pub mod tlv;
pub mod verify;

#[cfg(test)]
mod tests;

pub use identity::{LongTermIdentity, StoredIdentity};
pub use pairings::{PairingsReply, PairingsRequest};
pub use setup::{PairSetup, PairSetupRequest};
#[cfg(feature = "tokio-runtime")]
pub use storage::FilePairingStore;
pub use storage::{MemoryPairingStore, PairingRecord, PairingStore, Permissions, StorageError};
pub use tlv::{TlvDecoder, TlvEncoder, TlvError, TlvType};
pub use verify::{PairVerify, PairVerifyRequest, VerifyStep};

use crate::protocol::crypto::CryptoError;
use tlv::errors;

/// Broad class of a pairing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request body is not valid TLV or lacks a required tag
    Decode,
    /// Proof, AEAD tag or signature did not verify
    Crypto,
    /// Message arrived in the wrong stage or asked for something unsupported
    Protocol,
    /// Accessory policy refused the request
    Policy,
    /// Pairing store failed
    Storage,
}

/// Pairing errors
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    /// Request body could not be decoded
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    /// Decrypted sub-TLV is malformed
    #[error("invalid encrypted payload: {0}")]
    InvalidSubTlv(#[source] TlvError),

    /// Cryptographic primitive failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// `State` tag does not match the stage the handshake is in
    #[error("unexpected state: expected {expected}, got {actual}")]
    UnexpectedState {
        /// State the handshake is waiting for
        expected: u8,
        /// State the request carried
        actual: u8,
    },

    /// Pairing method not supported
    #[error("unsupported pairing method: {0}")]
    UnsupportedMethod(u8),

    /// SRP proof did not match the setup code
    #[error("setup code proof rejected")]
    AuthenticationFailed,

    /// Ed25519 signature did not verify
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    /// Controller has no pairing record
    #[error("unknown controller: {0}")]
    UnknownController(String),

    /// Accessory already has a pairing
    #[error("accessory is already paired")]
    AlreadyPaired,

    /// Another Pair-Setup holds the lease
    #[error("another pairing is in progress")]
    Busy,

    /// Failed attempt limit reached
    #[error("too many failed setup attempts")]
    MaxTries,

    /// No room for another pairing
    #[error("maximum number of pairings reached")]
    MaxPeers,

    /// Requester is not a verified admin controller
    #[error("admin permission required")]
    NotAdmin,

    /// Add-pairing for a known id with a different key
    #[error("pairing {0} exists with a different public key")]
    IdentifierConflict(String),

    /// Connection already has an encrypted session
    #[error("session already established")]
    SessionActive,

    /// Peer answered with an error code
    #[error("peer returned error: {code}")]
    PeerError {
        /// TLV error code
        code: u8,
    },

    /// Pairing store failed
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for PairingError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Full { .. } => Self::MaxPeers,
            StorageError::KeyMismatch { controller_id } => Self::IdentifierConflict(controller_id),
            other => Self::Storage(other),
        }
    }
}

impl PairingError {
    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Tlv(_) => ErrorKind::Decode,
            Self::InvalidSubTlv(_)
            | Self::Crypto(_)
            | Self::AuthenticationFailed
            | Self::SignatureVerificationFailed
            | Self::UnknownController(_) => ErrorKind::Crypto,
            Self::UnexpectedState { .. }
            | Self::UnsupportedMethod(_)
            | Self::SessionActive
            | Self::PeerError { .. } => ErrorKind::Protocol,
            Self::AlreadyPaired
            | Self::Busy
            | Self::MaxTries
            | Self::MaxPeers
            | Self::NotAdmin
            | Self::IdentifierConflict(_) => ErrorKind::Policy,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// TLV error code reported to the controller
    #[must_use]
    pub fn tlv_code(&self) -> u8 {
        match self {
            Self::AlreadyPaired => errors::UNAVAILABLE,
            Self::Busy => errors::BUSY,
            Self::MaxTries => errors::MAX_TRIES,
            Self::MaxPeers => errors::MAX_PEERS,
            Self::NotAdmin => errors::AUTHENTICATION,
            Self::PeerError { code } => *code,
            _ if self.kind() == ErrorKind::Crypto => errors::AUTHENTICATION,
            _ => errors::UNKNOWN,
        }
    }
}

/// Build an error response carrying `state` and `code`
#[must_use]
pub fn error_response(state: u8, code: u8) -> Vec<u8> {
    TlvEncoder::new().add_state(state).add_error(code).build()
}

/// Response state for a failed request body
///
/// The controller expects the state following the one it sent; when the body
/// does not carry a readable state, the first response state is used.
pub(crate) fn reply_state(body: &[u8]) -> u8 {
    TlvDecoder::decode(body)
        .ok()
        .and_then(|tlv| tlv.get_state().ok())
        .map_or(2, |state| state.saturating_add(1))
}

/// Check a peer response for an `Error` tag and the expected `State`
pub(crate) fn expect_state(tlv: &TlvDecoder, expected: u8) -> Result<(), PairingError> {
    if let Some(code) = tlv.get_error() {
        return Err(PairingError::PeerError { code });
    }
    let actual = tlv.get_state()?;
    if actual != expected {
        return Err(PairingError::UnexpectedState { expected, actual });
    }
    Ok(())
}

/// Read a UTF-8 pairing identifier
pub(crate) fn identifier(tlv: &TlvDecoder) -> Result<String, TlvError> {
    let raw = tlv.get_required(TlvType::Identifier)?;
    String::from_utf8(raw.to_vec()).map_err(|_| TlvError::InvalidValue(TlvType::Identifier))
}

/// Read a fixed-size value
pub(crate) fn fixed<const N: usize>(tlv: &TlvDecoder, tlv_type: TlvType) -> Result<[u8; N], TlvError> {
    tlv.get_required(tlv_type)?
        .try_into()
        .map_err(|_| TlvError::InvalidValue(tlv_type))
}
