//! Per-connection request routing

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::state::{ConnectionState, DisconnectReason};
use crate::accessory::Accessory;
use crate::net::{SecureSession, SessionError};
use crate::protocol::pairing::{
    PairSetup, PairVerify, PairingError, PairingRecord, VerifyStep, error_response, pairings,
    reply_state,
};

/// Pairing endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `/pair-setup`
    PairSetup,
    /// `/pair-verify`
    PairVerify,
    /// `/pairings`
    Pairings,
}

impl Endpoint {
    /// Parse a request path
    ///
    /// # Errors
    ///
    /// Returns `UnknownEndpoint` for any other path
    pub fn from_path(path: &str) -> Result<Self, ConnectionError> {
        match path {
            "/pair-setup" => Ok(Self::PairSetup),
            "/pair-verify" => Ok(Self::PairVerify),
            "/pairings" => Ok(Self::Pairings),
            other => Err(ConnectionError::UnknownEndpoint(other.to_string())),
        }
    }

    /// Request path
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::PairSetup => "/pair-setup",
            Self::PairVerify => "/pair-verify",
            Self::Pairings => "/pairings",
        }
    }
}

impl std::str::FromStr for Endpoint {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_path(s)
    }
}

/// Connection errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Path is not a pairing endpoint
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Connection has been closed
    #[error("connection closed: {0:?}")]
    Closed(DisconnectReason),

    /// No secure session installed yet
    #[error("connection is not encrypted")]
    NotEncrypted,

    /// Secure session failed
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Response to a routed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReply {
    /// TLV response body
    pub body: Vec<u8>,
    /// Send the body through [`HapConnection::encrypt`]
    pub encrypt: bool,
    /// Close the connection once the body has been sent
    pub close_after: bool,
}

/// One controller connection
///
/// Owns the handshake state machines and, after Pair-Verify, the secure
/// session. Methods take `&mut self`, so a connection is driven by one task.
pub struct HapConnection {
    accessory: Arc<Accessory>,
    setup: PairSetup,
    verify: PairVerify,
    session: Option<SecureSession>,
    controller: Option<PairingRecord>,
    state: ConnectionState,
}

impl HapConnection {
    /// Create a connection in the plain state
    #[must_use]
    pub fn new(accessory: Arc<Accessory>) -> Self {
        Self {
            accessory,
            setup: PairSetup::new(),
            verify: PairVerify::new(),
            session: None,
            controller: None,
            state: ConnectionState::Plain,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the secure session is installed
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the connection must be closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Controller verified on this connection
    #[must_use]
    pub fn controller(&self) -> Option<&PairingRecord> {
        self.controller.as_ref()
    }

    /// Route a decrypted request body
    ///
    /// Handshake failures are reported in the reply body, never as `Err`.
    ///
    /// # Errors
    ///
    /// Returns error if the connection is closed or the secure session can
    /// not be installed
    pub async fn handle(
        &mut self,
        endpoint: Endpoint,
        body: &[u8],
    ) -> Result<ConnectionReply, ConnectionError> {
        if let ConnectionState::Closed(reason) = self.state {
            return Err(ConnectionError::Closed(reason));
        }
        debug!(
            pairing_id = self.accessory.pairing_id(),
            path = endpoint.path(),
            len = body.len(),
            "Routing pairing request"
        );

        let encrypt = self.session.is_some();
        match endpoint {
            Endpoint::PairSetup => Ok(ConnectionReply {
                body: self.setup.handle(&self.accessory, body).await,
                encrypt,
                close_after: false,
            }),
            Endpoint::PairVerify => self.pair_verify(body).await,
            Endpoint::Pairings => {
                let requester = self.controller.as_ref().map(|c| c.controller_id.as_str());
                let reply = pairings::handle(&self.accessory, requester, body).await;

                let close_after = requester.is_some_and(|id| reply.removed.iter().any(|r| r == id));
                if close_after {
                    info!(
                        pairing_id = self.accessory.pairing_id(),
                        "Pairing of this connection removed, closing"
                    );
                    self.state = ConnectionState::Closed(DisconnectReason::PairingRemoved);
                }

                Ok(ConnectionReply {
                    body: reply.body,
                    encrypt,
                    close_after,
                })
            }
        }
    }

    async fn pair_verify(&mut self, body: &[u8]) -> Result<ConnectionReply, ConnectionError> {
        if self.session.is_some() {
            let e = PairingError::SessionActive;
            warn!(pairing_id = self.accessory.pairing_id(), error = %e, "Pair-Verify refused");
            return Ok(ConnectionReply {
                body: error_response(reply_state(body), e.tlv_code()),
                encrypt: true,
                close_after: false,
            });
        }

        match self.verify.handle(&self.accessory, body).await {
            VerifyStep::Respond(body) => Ok(ConnectionReply {
                body,
                encrypt: false,
                close_after: false,
            }),
            VerifyStep::Verified {
                response,
                controller,
                keys,
            } => {
                self.session = Some(SecureSession::accessory(&keys)?);
                self.controller = Some(controller);
                self.state = ConnectionState::Encrypted;
                Ok(ConnectionReply {
                    body: response,
                    encrypt: false,
                    close_after: false,
                })
            }
        }
    }

    /// Encrypt outbound bytes
    ///
    /// Still allowed after a pairing-removed close so the final reply can be
    /// sent.
    ///
    /// # Errors
    ///
    /// Returns error if no session is installed or the session is poisoned
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        let session = self.session.as_mut().ok_or(ConnectionError::NotEncrypted)?;
        Ok(session.encrypt(plaintext)?)
    }

    /// Decrypt inbound bytes, returning every complete frame's plaintext
    ///
    /// # Errors
    ///
    /// Returns error if the connection is closed, not encrypted, or a frame
    /// fails; a frame failure closes the connection
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        if let ConnectionState::Closed(reason) = self.state {
            return Err(ConnectionError::Closed(reason));
        }
        let session = self.session.as_mut().ok_or(ConnectionError::NotEncrypted)?;

        session.feed(data);
        session.decrypt_all().map_err(|e| {
            self.state = ConnectionState::Closed(DisconnectReason::SessionFailure);
            e.into()
        })
    }

    /// Close the connection and drop the session keys
    pub fn close(&mut self) {
        self.session = None;
        self.state = ConnectionState::Closed(DisconnectReason::Requested);
    }
}

impl std::fmt::Debug for HapConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HapConnection")
            .field("state", &self.state)
            .field("controller", &self.controller.as_ref().map(|c| &c.controller_id))
            .field("setup", &self.setup)
            .field("verify", &self.verify)
            .finish_non_exhaustive()
    }
}
