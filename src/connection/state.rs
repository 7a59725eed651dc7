//! Connection state management

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake traffic in clear
    Plain,
    /// Pair-Verify completed, all traffic framed and encrypted
    Encrypted,
    /// Must be closed; no further requests are accepted
    Closed(DisconnectReason),
}

impl ConnectionState {
    /// Check if the secure session is installed
    #[must_use]
    pub fn is_encrypted(self) -> bool {
        matches!(self, ConnectionState::Encrypted)
    }

    /// Check if the connection must be closed
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, ConnectionState::Closed(_))
    }
}

/// Reason for closing a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Inbound frame failed; the cipher stream can not be resynchronized
    SessionFailure,
    /// The verified controller's pairing was removed
    PairingRemoved,
    /// Closed by the owner
    Requested,
}
