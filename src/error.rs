use std::io;
use thiserror::Error;

use crate::config::ConfigError;
use crate::connection::ConnectionError;
use crate::net::SessionError;
use crate::protocol::crypto::CryptoError;
use crate::protocol::pairing::{PairingError, StorageError, TlvError};

/// Errors that can occur while serving HAP pairing
#[derive(Debug, Error)]
pub enum HapError {
    /// Handshake failed
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    /// Encrypted session failed
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Pairing store failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Request could not be routed
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Malformed TLV
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    /// Cryptographic primitive failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HapError {
    /// Check if the connection this error came from must be closed
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Session(_)
                | Self::Connection(ConnectionError::Closed(_) | ConnectionError::Session(_))
        )
    }
}

/// Result type alias for HAP pairing operations
pub type Result<T> = std::result::Result<T, HapError>;
