//! Pair-Setup - PIN-based pairing using SRP-6a
//!
//! Accessory side of the three request/response exchanges that turn a
//! setup code into a persisted admin pairing:
//!
//! - M1/M2: SRP salt and public key
//! - M3/M4: controller proof, accessory proof
//! - M5/M6: encrypted long-term key exchange

use rand::RngCore;
use tracing::{debug, info, warn};

use super::storage::{PairingRecord, Permissions};
use super::tlv::{TlvDecoder, TlvEncoder, TlvType, methods};
use super::{PairingError, error_response, fixed, identifier, reply_state};
use crate::accessory::{Accessory, SetupLease};
use crate::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519PublicKey, Ed25519Signature, KdfLabel, Nonce, SRP_USERNAME,
    SessionKey, SrpServer, lengths,
};

/// Nonce label for the controller's M5 payload
pub const M5_NONCE: &[u8; 8] = b"PS-Msg05";
/// Nonce label for the accessory's M6 payload
pub const M6_NONCE: &[u8; 8] = b"PS-Msg06";

/// A parsed Pair-Setup request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairSetupRequest {
    /// M1: start pairing
    Start {
        /// Requested pairing method
        method: u8,
    },
    /// M3: SRP public key and proof
    VerifyProof {
        /// Controller SRP public key `A`
        public_key: Vec<u8>,
        /// Controller proof `M1`
        proof: Vec<u8>,
    },
    /// M5: encrypted controller identity
    KeyExchange {
        /// Sealed sub-TLV
        encrypted_data: Vec<u8>,
    },
}

impl PairSetupRequest {
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
                method: tlv.get_u8(TlvType::Method).unwrap_or(methods::PAIR_SETUP),
            }),
            3 => Ok(Self::VerifyProof {
                public_key: tlv.get_required(TlvType::PublicKey)?.to_vec(),
                proof: tlv.get_required(TlvType::Proof)?.to_vec(),
            }),
            5 => Ok(Self::KeyExchange {
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
            Self::VerifyProof { .. } => 3,
            Self::KeyExchange { .. } => 5,
        }
    }
}

enum Stage {
    AwaitingStart,
    AwaitingProof {
        srp: SrpServer,
        salt: [u8; 16],
        _lease: SetupLease,
    },
    AwaitingKeyExchange {
        session_key: SessionKey,
        _lease: SetupLease,
    },
    Done,
}

impl Stage {
    fn expected_state(&self) -> u8 {
        match self {
            Self::AwaitingStart | Self::Done => 1,
            Self::AwaitingProof { .. } => 3,
            Self::AwaitingKeyExchange { .. } => 5,
        }
    }
}

/// Pair-Setup session for one connection
pub struct PairSetup {
    stage: Stage,
}

impl Default for PairSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl PairSetup {
    /// Create a session waiting for M1
    #[must_use]
    pub fn new() -> Self {
        Self {
            stage: Stage::AwaitingStart,
        }
    }

    /// Whether M6 has been sent
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self.stage, Stage::Done)
    }

    /// Handle a raw request body and produce the response body
    ///
    /// Failures become TLV error responses; the session is reset so the
    /// controller can start again from M1.
    pub async fn handle(&mut self, accessory: &Accessory, body: &[u8]) -> Vec<u8> {
        let result = match PairSetupRequest::parse(body) {
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
                "Pair-Setup failed"
            );
            error_response(reply, e.tlv_code())
        })
    }

    /// Run one stage
    ///
    /// On error the session is discarded; the caller reports
    /// [`PairingError::tlv_code`] to the controller.
    ///
    /// # Errors
    ///
    /// Returns error if the request is out of order, the proof or signature
    /// fails, or accessory policy refuses the pairing
    pub async fn process(
        &mut self,
        accessory: &Accessory,
        request: PairSetupRequest,
    ) -> Result<Vec<u8>, PairingError> {
        let stage = std::mem::replace(&mut self.stage, Stage::AwaitingStart);
        debug!(
            pairing_id = accessory.pairing_id(),
            state = request.state(),
            "Pair-Setup request"
        );

        // A new M1 always restarts; release any lease the old attempt held
        // before asking for a fresh one.
        if let PairSetupRequest::Start { method } = request {
            drop(stage);
            return self.start(accessory, method).await;
        }

        match (stage, request) {
            (
                Stage::AwaitingProof {
                    srp,
                    salt,
                    _lease: lease,
                },
                PairSetupRequest::VerifyProof { public_key, proof },
            ) => self.verify_proof(accessory, &srp, &salt, &public_key, &proof, lease),
            (
                Stage::AwaitingKeyExchange { session_key, .. },
                PairSetupRequest::KeyExchange { encrypted_data },
            ) => {
                self.key_exchange(accessory, &session_key, &encrypted_data)
                    .await
            }
            (stage, request) => Err(PairingError::UnexpectedState {
                expected: stage.expected_state(),
                actual: request.state(),
            }),
        }
    }

    /// M1 -> M2
    async fn start(&mut self, accessory: &Accessory, method: u8) -> Result<Vec<u8>, PairingError> {
        if method != methods::PAIR_SETUP {
            return Err(PairingError::UnsupportedMethod(method));
        }
        if accessory.is_paired().await? {
            return Err(PairingError::AlreadyPaired);
        }
        if accessory.setup_locked_out() {
            return Err(PairingError::MaxTries);
        }
        let lease = accessory.try_begin_setup().ok_or(PairingError::Busy)?;

        let mut salt = [0u8; lengths::SRP_SALT];
        rand::thread_rng().fill_bytes(&mut salt);

        let verifier = SrpServer::compute_verifier(
            SRP_USERNAME,
            accessory.config().setup_code.as_str().as_bytes(),
            &salt,
        )?;
        let srp = SrpServer::new(&verifier)?;

        let response = TlvEncoder::new()
            .add_state(2)
            .add(TlvType::Salt, &salt)
            .add(TlvType::PublicKey, srp.public_key())
            .build();

        self.stage = Stage::AwaitingProof {
            srp,
            salt,
            _lease: lease,
        };
        Ok(response)
    }

    /// M3 -> M4
    fn verify_proof(
        &mut self,
        accessory: &Accessory,
        srp: &SrpServer,
        salt: &[u8],
        client_public: &[u8],
        client_proof: &[u8],
        lease: SetupLease,
    ) -> Result<Vec<u8>, PairingError> {
        let Ok((session_key, server_proof)) =
            srp.verify_client(SRP_USERNAME, salt, client_public, client_proof)
        else {
            let attempts = accessory.record_failed_setup();
            warn!(
                pairing_id = accessory.pairing_id(),
                attempts, "Pair-Setup proof rejected"
            );
            return Err(PairingError::AuthenticationFailed);
        };

        let response = TlvEncoder::new()
            .add_state(4)
            .add(TlvType::Proof, &server_proof)
            .build();

        self.stage = Stage::AwaitingKeyExchange {
            session_key,
            _lease: lease,
        };
        Ok(response)
    }

    /// M5 -> M6
    async fn key_exchange(
        &mut self,
        accessory: &Accessory,
        session_key: &SessionKey,
        encrypted_data: &[u8],
    ) -> Result<Vec<u8>, PairingError> {
        let encrypt_key = KdfLabel::PairSetupEncrypt.derive(session_key.as_bytes())?;
        let cipher = ChaCha20Poly1305Cipher::new(&encrypt_key)?;

        let decrypted = cipher.decrypt(&Nonce::from_label(M5_NONCE), encrypted_data)?;
        let sub_tlv = TlvDecoder::decode(&decrypted).map_err(PairingError::InvalidSubTlv)?;
        let controller_id = identifier(&sub_tlv).map_err(PairingError::InvalidSubTlv)?;
        let controller_ltpk: [u8; 32] =
            fixed(&sub_tlv, TlvType::PublicKey).map_err(PairingError::InvalidSubTlv)?;
        let signature = sub_tlv
            .get_required(TlvType::Signature)
            .map_err(PairingError::InvalidSubTlv)?;

        // iOSDeviceInfo = iOSDeviceX || iOSDevicePairingID || iOSDeviceLTPK
        let mut device_info = KdfLabel::PairSetupControllerSign
            .derive(session_key.as_bytes())?
            .to_vec();
        device_info.extend_from_slice(controller_id.as_bytes());
        device_info.extend_from_slice(&controller_ltpk);

        let ltpk = Ed25519PublicKey::from_bytes(&controller_ltpk)?;
        let signature = Ed25519Signature::from_bytes(signature)?;
        ltpk.verify(&device_info, &signature)
            .map_err(|_| PairingError::SignatureVerificationFailed)?;

        accessory
            .store()
            .store(PairingRecord {
                accessory_id: accessory.pairing_id().to_string(),
                controller_id: controller_id.clone(),
                public_key: controller_ltpk,
                permissions: Permissions::Admin,
            })
            .await?;
        accessory.reset_failed_setups();

        // AccessoryInfo = AccessoryX || AccessoryPairingID || AccessoryLTPK
        let identity = accessory.identity();
        let accessory_ltpk = identity.public_key();
        let mut accessory_info = KdfLabel::PairSetupAccessorySign
            .derive(session_key.as_bytes())?
            .to_vec();
        accessory_info.extend_from_slice(identity.pairing_id().as_bytes());
        accessory_info.extend_from_slice(accessory_ltpk.as_bytes());
        let accessory_signature = identity.sign(&accessory_info);

        let sub_tlv = TlvEncoder::new()
            .add(TlvType::Identifier, identity.pairing_id().as_bytes())
            .add(TlvType::PublicKey, accessory_ltpk.as_bytes())
            .add(TlvType::Signature, &accessory_signature.to_bytes())
            .build();
        let encrypted = cipher.encrypt(&Nonce::from_label(M6_NONCE), &sub_tlv)?;

        info!(
            pairing_id = accessory.pairing_id(),
            controller_id = %controller_id,
            "Pair-Setup complete"
        );

        self.stage = Stage::Done;
        Ok(TlvEncoder::new()
            .add_state(6)
            .add(TlvType::EncryptedData, &encrypted)
            .build())
    }
}

impl std::fmt::Debug for PairSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self.stage {
            Stage::AwaitingStart => "AwaitingStart",
            Stage::AwaitingProof { .. } => "AwaitingProof",
            Stage::AwaitingKeyExchange { .. } => "AwaitingKeyExchange",
            Stage::Done => "Done",
        };
        f.debug_struct("PairSetup").field("stage", &stage).finish()
    }
}
