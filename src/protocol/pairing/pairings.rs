//! Pairing management (`/pairings`)
//!
//! Add, remove and list controllers. Only an admin controller on a verified
//! connection may use it.

use tracing::{info, warn};

use super::storage::{PairingRecord, Permissions};
use super::tlv::{TlvDecoder, TlvEncoder, TlvError, TlvType, methods};
use super::{PairingError, error_response, fixed, identifier};
use crate::accessory::Accessory;

/// A parsed `/pairings` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingsRequest {
    /// Add a controller, or update the permissions of a known one
    Add {
        /// Controller pairing id
        identifier: String,
        /// Controller long-term public key
        public_key: [u8; 32],
        /// Granted permissions
        permissions: Permissions,
    },
    /// Remove a controller
    Remove {
        /// Controller pairing id
        identifier: String,
    },
    /// List all controllers
    List,
}

impl PairingsRequest {
    /// Parse a request body by its `Method` tag
    ///
    /// # Errors
    ///
    /// Returns error if the body is not valid TLV, is not a state 1 request,
    /// or names an unsupported method
    pub fn parse(body: &[u8]) -> Result<Self, PairingError> {
        let tlv = TlvDecoder::decode(body)?;
        let state = tlv.get_state()?;
        if state != 1 {
            return Err(PairingError::UnexpectedState {
                expected: 1,
                actual: state,
            });
        }

        match tlv.get_required_u8(TlvType::Method)? {
            methods::ADD_PAIRING => {
                let raw = tlv.get_required_u8(TlvType::Permissions)?;
                Ok(Self::Add {
                    identifier: identifier(&tlv)?,
                    public_key: fixed(&tlv, TlvType::PublicKey)?,
                    permissions: Permissions::from_byte(raw)
                        .ok_or(TlvError::InvalidValue(TlvType::Permissions))?,
                })
            }
            methods::REMOVE_PAIRING => Ok(Self::Remove {
                identifier: identifier(&tlv)?,
            }),
            methods::LIST_PAIRINGS => Ok(Self::List),
            other => Err(PairingError::UnsupportedMethod(other)),
        }
    }
}

/// Outcome of a `/pairings` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingsReply {
    /// Response body
    pub body: Vec<u8>,
    /// Controller ids whose pairing was removed
    pub removed: Vec<String>,
}

impl PairingsReply {
    fn body(body: Vec<u8>) -> Self {
        Self {
            body,
            removed: Vec::new(),
        }
    }
}

/// Handle a raw `/pairings` body for the controller verified on this
/// connection (`None` if the connection is not verified)
///
/// Failures become TLV error responses with state 2.
pub async fn handle(
    accessory: &Accessory,
    requester: Option<&str>,
    body: &[u8],
) -> PairingsReply {
    let result = match PairingsRequest::parse(body) {
        Ok(request) => process(accessory, requester, request).await,
        Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
        warn!(
            pairing_id = accessory.pairing_id(),
            requester = requester.unwrap_or("-"),
            error = %e,
            "Pairings request failed"
        );
        PairingsReply::body(error_response(2, e.tlv_code()))
    })
}

/// Run a parsed `/pairings` request
///
/// The requester's permissions are read from the store, so a controller that
/// was demoted or removed since it verified is refused.
///
/// # Errors
///
/// Returns error if the requester is not an admin, the add conflicts with an
/// existing pairing, or the store fails
pub async fn process(
    accessory: &Accessory,
    requester: Option<&str>,
    request: PairingsRequest,
) -> Result<PairingsReply, PairingError> {
    let store = accessory.store();
    let is_admin = match requester {
        Some(id) => store
            .lookup(id)
            .await?
            .is_some_and(|record| record.permissions.is_admin()),
        None => false,
    };
    if !is_admin {
        return Err(PairingError::NotAdmin);
    }

    let ok = || TlvEncoder::new().add_state(2).build();

    match request {
        PairingsRequest::Add {
            identifier,
            public_key,
            permissions,
        } => {
            store
                .add_checked(PairingRecord {
                    accessory_id: accessory.pairing_id().to_string(),
                    controller_id: identifier.clone(),
                    public_key,
                    permissions,
                })
                .await?;
            info!(
                pairing_id = accessory.pairing_id(),
                controller_id = %identifier,
                ?permissions,
                "Pairing added"
            );
            Ok(PairingsReply::body(ok()))
        }
        PairingsRequest::Remove { identifier } => {
            let removed = store.remove_cascading(&identifier).await?;
            if removed.iter().any(|id| *id != identifier) {
                info!(
                    pairing_id = accessory.pairing_id(),
                    "Last admin removed, cleared all pairings"
                );
            }

            info!(
                pairing_id = accessory.pairing_id(),
                controller_id = %identifier,
                "Pairing removed"
            );
            Ok(PairingsReply {
                body: ok(),
                removed,
            })
        }
        PairingsRequest::List => {
            let records = store.list().await?;
            let mut encoder = TlvEncoder::new().add_state(2);
            for (i, record) in records.iter().enumerate() {
                if i > 0 {
                    encoder = encoder.add_separator();
                }
                encoder = encoder
                    .add(TlvType::Identifier, record.controller_id.as_bytes())
                    .add(TlvType::PublicKey, &record.public_key)
                    .add_byte(TlvType::Permissions, record.permissions.as_byte());
            }
            Ok(PairingsReply::body(encoder.build()))
        }
    }
}

/// Parse a list response into records
///
/// # Errors
///
/// Returns error if the body is malformed or reports an error
pub fn parse_list_response(
    accessory_id: &str,
    body: &[u8],
) -> Result<Vec<PairingRecord>, PairingError> {
    let tlv = TlvDecoder::decode(body)?;
    super::expect_state(&tlv, 2)?;

    let mut records = Vec::new();
    for record in tlv.split_records() {
        // An empty list is a lone State item.
        if record.get(TlvType::Identifier).is_none() {
            continue;
        }
        let raw = record.get_required_u8(TlvType::Permissions)?;
        records.push(PairingRecord {
            accessory_id: accessory_id.to_string(),
            controller_id: identifier(&record)?,
            public_key: fixed(&record, TlvType::PublicKey)?,
            permissions: Permissions::from_byte(raw)
                .ok_or(TlvError::InvalidValue(TlvType::Permissions))?,
        });
    }
    Ok(records)
}
