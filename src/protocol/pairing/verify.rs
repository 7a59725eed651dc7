//! Pair-Verify - Fast verification using stored keys
//!
//! A paired controller proves possession of its long-term key over a fresh
//! X25519 exchange. On success both sides derive the control channel keys.

use tracing::{debug, info, warn};
use zeroize::Zeroize;

use super::storage::PairingRecord;
use super::tlv::{TlvDecoder, TlvEncoder, TlvType};
use super::{PairingError, error_response, fixed, identifier, reply_state};
use crate::accessory::Accessory;
use crate::protocol::crypto::{
    ChaCha20Poly1305Cipher, CryptoError, Ed25519PublicKey, Ed25519Signature, KdfLabel, Nonce,
    SessionKeys, X25519KeyPair, X25519PublicKey, X25519SharedSecret,
};

/// Nonce label for the accessory's M2 payload
pub const M2_NONCE: &[u8; 8] = b"PV-Msg02";
/// Nonce label for the controller's M3 payload
pub const M3_NONCE: &[u8; 8] = b"PV-Msg03";

/// A parsed Pair-Verify request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairVerifyRequest {
    /// M1: controller ephemeral public key
    Start {
        /// Controller X25519 public key
        public_key: [u8; 32],
    },
    /// M3: encrypted controller proof
    Finish {
        /// Sealed sub-TLV
        encrypted_data: Vec<u8>,
    },
}

impl PairVerifyRequest {
    /// Parse a request body by its `State` tag
    ///
    /// # Errors
    ///
    /// Returns error if the body is not valid TLV, lacks a tag the stage
    /// needs, or carries a state that is not a request state
    pub fn parse(body: &[u8]) -> Result<Self, PairingError> {
        let tlv = TlvDecoder::decode(body)?;
        match tlv.get_state()? {
            1 => Ok(Self::Start {
                public_key: fixed(&tlv, TlvType::PublicKey)?,
            }),
            3 => Ok(Self::Finish {
                encrypted_data: tlv.get_required(TlvType::EncryptedData)?.to_vec(),
            }),
            actual => Err(PairingError::UnexpectedState {
                expected: 1,
                actual,
            }),
        }
    }

    /// `State` value of this request
    #[must_use]
    pub fn state(&self) -> u8 {
        match self {
            Self::Start { .. } => 1,
            Self::Finish { .. } => 3,
        }
    }
}

/// Outcome of one Pair-Verify request
#[derive(Debug)]
pub enum VerifyStep {
    /// Send `response` and wait for the next request
    Respond(Vec<u8>),
    /// Controller verified; send `response` in clear, then switch to the
    /// encrypted session built from `keys`
    Verified {
        /// M4 body
        response: Vec<u8>,
        /// Pairing record of the verified controller
        controller: PairingRecord,
        /// Control channel keys
        keys: SessionKeys,
    },
}

impl VerifyStep {
    /// Response body to send
    #[must_use]
    pub fn response(&self) -> &[u8] {
        match self {
            Self::Respond(response) | Self::Verified { response, .. } => response,
        }
    }
}

/// Key material held between M2 and M3
struct PendingVerify {
    accessory_public: X25519PublicKey,
    controller_public: X25519PublicKey,
    shared_secret: X25519SharedSecret,
    encrypt_key: [u8; 32],
}

impl Drop for PendingVerify {
    fn drop(&mut self) {
        self.encrypt_key.zeroize();
    }
}

enum Stage {
    AwaitingStart,
    AwaitingFinish(PendingVerify),
    Done,
}

/// Pair-Verify session for one connection
pub struct PairVerify {
    stage: Stage,
}

impl Default for PairVerify {
    fn default() -> Self {
        Self::new()
    }
}

impl PairVerify {
    /// Create a session waiting for M1
    #[must_use]
    pub fn new() -> Self {
        Self {
            stage: Stage::AwaitingStart,
        }
    }

    /// Whether M4 has been sent
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self.stage, Stage::Done)
    }

    /// Handle a raw request body
    ///
    /// Failures become TLV error responses and leave the connection
    /// unauthenticated.
    pub async fn handle(&mut self, accessory: &Accessory, body: &[u8]) -> VerifyStep {
        let result = match PairVerifyRequest::parse(body) {
            Ok(request) => self.process(accessory, request).await,
            Err(e) => {
                self.stage = Stage::AwaitingStart;
                Err(e)
            }
        };

        result.unwrap_or_else(|e| {
            let reply = reply_state(body);
            warn!(
                pairing_id = accessory.pairing_id(),
                state = reply.saturating_sub(1),
                kind = ?e.kind(),
                error = %e,
                "Pair-Verify failed"
            );
            VerifyStep::Respond(error_response(reply, e.tlv_code()))
        })
    }

    /// Run one stage
    ///
    /// # Errors
    ///
    /// Returns error if the request is out of order, the controller is
    /// unknown, or decryption or signature verification fails
    pub async fn process(
        &mut self,
        accessory: &Accessory,
        request: PairVerifyRequest,
    ) -> Result<VerifyStep, PairingError> {
        let stage = std::mem::replace(&mut self.stage, Stage::AwaitingStart);
        debug!(
            pairing_id = accessory.pairing_id(),
            state = request.state(),
            "Pair-Verify request"
        );

        match (stage, request) {
            (_, PairVerifyRequest::Start { public_key }) => self.start(accessory, &public_key),
            (Stage::AwaitingFinish(pending), PairVerifyRequest::Finish { encrypted_data }) => {
                self.finish(accessory, &pending, &encrypted_data).await
            }
            (_, request) => Err(PairingError::UnexpectedState {
                expected: 1,
                actual: request.state(),
            }),
        }
    }

    /// M1 -> M2
    fn start(
        &mut self,
        accessory: &Accessory,
        controller_public: &[u8; 32],
    ) -> Result<VerifyStep, PairingError> {
        let controller_public = X25519PublicKey::from_bytes(controller_public)?;
        let keypair = X25519KeyPair::generate();
        let accessory_public = keypair.public_key();
        let shared_secret = keypair.diffie_hellman(&controller_public);
        if shared_secret.is_degenerate() {
            return Err(CryptoError::InvalidPublicKey.into());
        }

        let encrypt_key = KdfLabel::PairVerifyEncrypt.derive(shared_secret.as_bytes())?;

        // AccessoryInfo = AccessoryCurvePK || AccessoryPairingID || ControllerCurvePK
        let identity = accessory.identity();
        let mut accessory_info = accessory_public.as_bytes().to_vec();
        accessory_info.extend_from_slice(identity.pairing_id().as_bytes());
        accessory_info.extend_from_slice(controller_public.as_bytes());
        let signature = identity.sign(&accessory_info);

        let sub_tlv = TlvEncoder::new()
            .add(TlvType::Identifier, identity.pairing_id().as_bytes())
            .add(TlvType::Signature, &signature.to_bytes())
            .build();
        let encrypted = ChaCha20Poly1305Cipher::new(&encrypt_key)?
            .encrypt(&Nonce::from_label(M2_NONCE), &sub_tlv)?;

        let response = TlvEncoder::new()
            .add_state(2)
            .add(TlvType::PublicKey, accessory_public.as_bytes())
            .add(TlvType::EncryptedData, &encrypted)
            .build();

        self.stage = Stage::AwaitingFinish(PendingVerify {
            accessory_public,
            controller_public,
            shared_secret,
            encrypt_key,
        });
        Ok(VerifyStep::Respond(response))
    }

    /// M3 -> M4
    async fn finish(
        &mut self,
        accessory: &Accessory,
        pending: &PendingVerify,
        encrypted_data: &[u8],
    ) -> Result<VerifyStep, PairingError> {
        let decrypted = ChaCha20Poly1305Cipher::new(&pending.encrypt_key)?
            .decrypt(&Nonce::from_label(M3_NONCE), encrypted_data)?;
        let sub_tlv = TlvDecoder::decode(&decrypted).map_err(PairingError::InvalidSubTlv)?;
        let controller_id = identifier(&sub_tlv).map_err(PairingError::InvalidSubTlv)?;
        let signature = sub_tlv
            .get_required(TlvType::Signature)
            .map_err(PairingError::InvalidSubTlv)?;

        let Some(controller) = accessory.store().lookup(&controller_id).await? else {
            return Err(PairingError::UnknownController(controller_id));
        };

        // ControllerInfo = ControllerCurvePK || ControllerPairingID || AccessoryCurvePK
        let mut controller_info = pending.controller_public.as_bytes().to_vec();
        controller_info.extend_from_slice(controller_id.as_bytes());
        controller_info.extend_from_slice(pending.accessory_public.as_bytes());

        let ltpk = Ed25519PublicKey::from_bytes(&controller.public_key)?;
        let signature = Ed25519Signature::from_bytes(signature)?;
        ltpk.verify(&controller_info, &signature)
            .map_err(|_| PairingError::SignatureVerificationFailed)?;

        let keys = SessionKeys::derive(pending.shared_secret.as_bytes())?;
        info!(
            pairing_id = accessory.pairing_id(),
            controller_id = %controller.controller_id,
            "Pair-Verify complete"
        );

        self.stage = Stage::Done;
        Ok(VerifyStep::Verified {
            response: TlvEncoder::new().add_state(4).build(),
            controller,
            keys,
        })
    }
}

impl std::fmt::Debug for PairVerify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self.stage {
            Stage::AwaitingStart => "AwaitingStart",
            Stage::AwaitingFinish(_) => "AwaitingFinish",
            Stage::Done => "Done",
        };
        f.debug_struct("PairVerify").field("stage", &stage).finish()
    }
}
