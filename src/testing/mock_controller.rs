//! Simulated HAP controller
//!
//! Drives the controller half of Pair-Setup, Pair-Verify and `/pairings`
//! against a [`HapConnection`] in memory, without any network.

use tracing::debug;

use crate::connection::{Endpoint, HapConnection};
use crate::error::Result;
use crate::net::SecureSession;
use crate::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519PublicKey, Ed25519Signature, KdfLabel, Nonce, SRP_USERNAME,
    SessionKey, SessionKeys, SrpClient, SrpVerifier, X25519KeyPair, X25519PublicKey,
};
use crate::protocol::pairing::setup::{M5_NONCE, M6_NONCE};
use crate::protocol::pairing::tlv::methods;
use crate::protocol::pairing::verify::{M2_NONCE, M3_NONCE};
use crate::protocol::pairing::{
    LongTermIdentity, PairingError, PairingRecord, Permissions, TlvDecoder, TlvEncoder, TlvType,
    expect_state, fixed, identifier, pairings,
};

enum SetupProgress {
    Idle,
    AwaitingSalt,
    AwaitingProof(SrpVerifier),
    AwaitingKeys(SessionKey),
}

enum VerifyProgress {
    Idle,
    AwaitingKey(X25519KeyPair),
    AwaitingConfirm(SessionKeys),
}

/// Controller with its own long-term identity
///
/// Remembers the accessory's id and long-term key once Pair-Setup completes,
/// the way a real controller keeps them in its keychain.
pub struct MockController {
    identity: LongTermIdentity,
    accessory_id: Option<String>,
    accessory_ltpk: Option<Ed25519PublicKey>,
    setup: SetupProgress,
    verify: VerifyProgress,
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

impl MockController {
    /// Controller with a fresh identity
    #[must_use]
    pub fn new() -> Self {
        Self::with_identity(LongTermIdentity::generate())
    }

    /// Controller with a given identity
    #[must_use]
    pub fn with_identity(identity: LongTermIdentity) -> Self {
        Self {
            identity,
            accessory_id: None,
            accessory_ltpk: None,
            setup: SetupProgress::Idle,
            verify: VerifyProgress::Idle,
        }
    }

    /// Controller pairing id
    #[must_use]
    pub fn pairing_id(&self) -> &str {
        self.identity.pairing_id()
    }

    /// Controller long-term public key
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        *self.identity.public_key().as_bytes()
    }

    /// Accessory pairing id learned in Pair-Setup M6
    #[must_use]
    pub fn accessory_id(&self) -> Option<&str> {
        self.accessory_id.as_deref()
    }

    /// Accessory long-term key learned in Pair-Setup M6
    #[must_use]
    pub fn accessory_public_key(&self) -> Option<&Ed25519PublicKey> {
        self.accessory_ltpk.as_ref()
    }

    /// Trust an accessory without running Pair-Setup
    pub fn trust_accessory(&mut self, accessory_id: impl Into<String>, ltpk: Ed25519PublicKey) {
        self.accessory_id = Some(accessory_id.into());
        self.accessory_ltpk = Some(ltpk);
    }

    /// Pair-Setup M1
    pub fn setup_m1(&mut self) -> Vec<u8> {
        self.setup = SetupProgress::AwaitingSalt;
        TlvEncoder::new()
            .add_state(1)
            .add_method(methods::PAIR_SETUP)
            .build()
    }

    /// Process M2 (salt + accessory public key) and generate M3
    ///
    /// # Errors
    ///
    /// Returns error if the accessory reported an error or the SRP challenge
    /// is invalid
    pub fn setup_process_m2(
        &mut self,
        body: &[u8],
        setup_code: &str,
    ) -> std::result::Result<Vec<u8>, PairingError> {
        let SetupProgress::AwaitingSalt = std::mem::replace(&mut self.setup, SetupProgress::Idle)
        else {
            return Err(PairingError::UnexpectedState {
                expected: 1,
                actual: 2,
            });
        };

        let tlv = TlvDecoder::decode(body)?;
        expect_state(&tlv, 2)?;
        let salt = tlv.get_required(TlvType::Salt)?;
        let server_public = tlv.get_required(TlvType::PublicKey)?;

        let client = SrpClient::new()?;
        let verifier =
            client.process_challenge(SRP_USERNAME, setup_code.as_bytes(), salt, server_public)?;

        let m3 = TlvEncoder::new()
            .add_state(3)
            .add(TlvType::PublicKey, client.public_key())
            .add(TlvType::Proof, verifier.client_proof())
            .build();

        self.setup = SetupProgress::AwaitingProof(verifier);
        Ok(m3)
    }

    /// Process M4 (accessory proof) and generate M5
    ///
    /// # Errors
    ///
    /// Returns error if the accessory rejected the proof or its own proof
    /// does not verify
    pub fn setup_process_m4(&mut self, body: &[u8]) -> std::result::Result<Vec<u8>, PairingError> {
        let SetupProgress::AwaitingProof(verifier) =
            std::mem::replace(&mut self.setup, SetupProgress::Idle)
        else {
            return Err(PairingError::UnexpectedState {
                expected: 3,
                actual: 4,
            });
        };

        let tlv = TlvDecoder::decode(body)?;
        expect_state(&tlv, 4)?;
        let session_key = verifier
            .verify_server(tlv.get_required(TlvType::Proof)?)
            .map_err(|_| PairingError::AuthenticationFailed)?;

        // iOSDeviceInfo = iOSDeviceX || iOSDevicePairingID || iOSDeviceLTPK
        let ltpk = self.public_key();
        let mut device_info = KdfLabel::PairSetupControllerSign
            .derive(session_key.as_bytes())?
            .to_vec();
        device_info.extend_from_slice(self.pairing_id().as_bytes());
        device_info.extend_from_slice(&ltpk);
        let signature = self.identity.sign(&device_info);

        let sub_tlv = TlvEncoder::new()
            .add(TlvType::Identifier, self.pairing_id().as_bytes())
            .add(TlvType::PublicKey, &ltpk)
            .add(TlvType::Signature, &signature.to_bytes())
            .build();
        let encrypt_key = KdfLabel::PairSetupEncrypt.derive(session_key.as_bytes())?;
        let encrypted = ChaCha20Poly1305Cipher::new(&encrypt_key)?
            .encrypt(&Nonce::from_label(M5_NONCE), &sub_tlv)?;

        self.setup = SetupProgress::AwaitingKeys(session_key);
        Ok(TlvEncoder::new()
            .add_state(5)
            .add(TlvType::EncryptedData, &encrypted)
            .build())
    }

    /// Process M6 and remember the accessory's identity
    ///
    /// # Errors
    ///
    /// Returns error if the accessory reported an error, the payload does not
    /// decrypt, or the accessory signature does not verify
    pub fn setup_process_m6(&mut self, body: &[u8]) -> std::result::Result<(), PairingError> {
        let SetupProgress::AwaitingKeys(session_key) =
            std::mem::replace(&mut self.setup, SetupProgress::Idle)
        else {
            return Err(PairingError::UnexpectedState {
                expected: 5,
                actual: 6,
            });
        };

        let tlv = TlvDecoder::decode(body)?;
        expect_state(&tlv, 6)?;

        let encrypt_key = KdfLabel::PairSetupEncrypt.derive(session_key.as_bytes())?;
        let decrypted = ChaCha20Poly1305Cipher::new(&encrypt_key)?.decrypt(
            &Nonce::from_label(M6_NONCE),
            tlv.get_required(TlvType::EncryptedData)?,
        )?;
        let sub_tlv = TlvDecoder::decode(&decrypted).map_err(PairingError::InvalidSubTlv)?;
        let accessory_id = identifier(&sub_tlv).map_err(PairingError::InvalidSubTlv)?;
        let accessory_ltpk: [u8; 32] =
            fixed(&sub_tlv, TlvType::PublicKey).map_err(PairingError::InvalidSubTlv)?;
        let signature = sub_tlv
            .get_required(TlvType::Signature)
            .map_err(PairingError::InvalidSubTlv)?;

        let mut accessory_info = KdfLabel::PairSetupAccessorySign
            .derive(session_key.as_bytes())?
            .to_vec();
        accessory_info.extend_from_slice(accessory_id.as_bytes());
        accessory_info.extend_from_slice(&accessory_ltpk);

        let ltpk = Ed25519PublicKey::from_bytes(&accessory_ltpk)?;
        ltpk.verify(&accessory_info, &Ed25519Signature::from_bytes(signature)?)
            .map_err(|_| PairingError::SignatureVerificationFailed)?;

        debug!(accessory_id = %accessory_id, "Mock controller paired");
        self.trust_accessory(accessory_id, ltpk);
        Ok(())
    }

    /// Pair-Verify M1
    pub fn verify_m1(&mut self) -> Vec<u8> {
        let keypair = X25519KeyPair::generate();
        let m1 = TlvEncoder::new()
            .add_state(1)
            .add(TlvType::PublicKey, keypair.public_key().as_bytes())
            .build();
        self.verify = VerifyProgress::AwaitingKey(keypair);
        m1
    }

    /// Process M2, check the accessory's signature, and generate M3
    ///
    /// # Errors
    ///
    /// Returns error if the accessory is unknown, the payload does not
    /// decrypt, or the signature does not verify
    pub fn verify_process_m2(&mut self, body: &[u8]) -> std::result::Result<Vec<u8>, PairingError> {
        let VerifyProgress::AwaitingKey(keypair) =
            std::mem::replace(&mut self.verify, VerifyProgress::Idle)
        else {
            return Err(PairingError::UnexpectedState {
                expected: 1,
                actual: 2,
            });
        };

        let tlv = TlvDecoder::decode(body)?;
        expect_state(&tlv, 2)?;
        let accessory_public = X25519PublicKey::from_bytes(tlv.get_required(TlvType::PublicKey)?)?;
        let controller_public = keypair.public_key();
        let shared = keypair.diffie_hellman(&accessory_public);

        let encrypt_key = KdfLabel::PairVerifyEncrypt.derive(shared.as_bytes())?;
        let cipher = ChaCha20Poly1305Cipher::new(&encrypt_key)?;
        let decrypted = cipher.decrypt(
            &Nonce::from_label(M2_NONCE),
            tlv.get_required(TlvType::EncryptedData)?,
        )?;
        let sub_tlv = TlvDecoder::decode(&decrypted).map_err(PairingError::InvalidSubTlv)?;
        let accessory_id = identifier(&sub_tlv).map_err(PairingError::InvalidSubTlv)?;
        let signature = sub_tlv
            .get_required(TlvType::Signature)
            .map_err(PairingError::InvalidSubTlv)?;

        let ltpk = match (&self.accessory_id, &self.accessory_ltpk) {
            (Some(known), Some(ltpk)) if *known == accessory_id => ltpk,
            _ => return Err(PairingError::UnknownController(accessory_id)),
        };

        let mut accessory_info = accessory_public.as_bytes().to_vec();
        accessory_info.extend_from_slice(accessory_id.as_bytes());
        accessory_info.extend_from_slice(controller_public.as_bytes());
        ltpk.verify(&accessory_info, &Ed25519Signature::from_bytes(signature)?)
            .map_err(|_| PairingError::SignatureVerificationFailed)?;

        let mut controller_info = controller_public.as_bytes().to_vec();
        controller_info.extend_from_slice(self.pairing_id().as_bytes());
        controller_info.extend_from_slice(accessory_public.as_bytes());
        let signature = self.identity.sign(&controller_info);

        let sub_tlv = TlvEncoder::new()
            .add(TlvType::Identifier, self.pairing_id().as_bytes())
            .add(TlvType::Signature, &signature.to_bytes())
            .build();
        let encrypted = cipher.encrypt(&Nonce::from_label(M3_NONCE), &sub_tlv)?;

        self.verify = VerifyProgress::AwaitingConfirm(SessionKeys::derive(shared.as_bytes())?);
        Ok(TlvEncoder::new()
            .add_state(3)
            .add(TlvType::EncryptedData, &encrypted)
            .build())
    }

    /// Process M4 and open the controller end of the secure session
    ///
    /// # Errors
    ///
    /// Returns error if the accessory reported an error or the session can
    /// not be opened
    pub fn verify_process_m4(&mut self, body: &[u8]) -> Result<SecureSession> {
        let VerifyProgress::AwaitingConfirm(keys) =
            std::mem::replace(&mut self.verify, VerifyProgress::Idle)
        else {
            return Err(PairingError::UnexpectedState {
                expected: 3,
                actual: 4,
            }
            .into());
        };

        let tlv = TlvDecoder::decode(body)?;
        expect_state(&tlv, 4)?;
        Ok(SecureSession::controller(&keys)?)
    }

    /// Run all of Pair-Setup against a connection
    ///
    /// # Errors
    ///
    /// Returns error if any step fails; accessory error codes surface as
    /// [`PairingError::PeerError`]
    pub async fn pair(&mut self, connection: &mut HapConnection, setup_code: &str) -> Result<()> {
        let m1 = self.setup_m1();
        let m2 = connection.handle(Endpoint::PairSetup, &m1).await?.body;
        let m3 = self.setup_process_m2(&m2, setup_code)?;
        let m4 = connection.handle(Endpoint::PairSetup, &m3).await?.body;
        let m5 = self.setup_process_m4(&m4)?;
        let m6 = connection.handle(Endpoint::PairSetup, &m5).await?.body;
        self.setup_process_m6(&m6)?;
        Ok(())
    }

    /// Run Pair-Verify against a connection and return the controller end
    /// of the session
    ///
    /// # Errors
    ///
    /// Returns error if any step fails
    pub async fn verify(&mut self, connection: &mut HapConnection) -> Result<SecureSession> {
        let m1 = self.verify_m1();
        let m2 = connection.handle(Endpoint::PairVerify, &m1).await?.body;
        let m3 = self.verify_process_m2(&m2)?;
        let m4 = connection.handle(Endpoint::PairVerify, &m3).await?.body;
        self.verify_process_m4(&m4)
    }

    /// Send a request over the secure session and return the decrypted reply
    ///
    /// # Errors
    ///
    /// Returns error if either end of the session fails
    pub async fn request(
        session: &mut SecureSession,
        connection: &mut HapConnection,
        endpoint: Endpoint,
        body: &[u8],
    ) -> Result<Vec<u8>> {
        let wire = session.encrypt(body)?;
        let request = connection.decrypt(&wire)?;

        let reply = connection.handle(endpoint, &request).await?;
        let wire = if reply.encrypt {
            connection.encrypt(&reply.body)?
        } else {
            reply.body
        };

        session.feed(&wire);
        Ok(session.decrypt_all()?)
    }

    /// Build an add-pairing request
    #[must_use]
    pub fn add_pairing_request(
        controller_id: &str,
        public_key: &[u8; 32],
        permissions: Permissions,
    ) -> Vec<u8> {
        TlvEncoder::new()
            .add_state(1)
            .add_method(methods::ADD_PAIRING)
            .add(TlvType::Identifier, controller_id.as_bytes())
            .add(TlvType::PublicKey, public_key)
            .add_byte(TlvType::Permissions, permissions.as_byte())
            .build()
    }

    /// Build a remove-pairing request
    #[must_use]
    pub fn remove_pairing_request(controller_id: &str) -> Vec<u8> {
        TlvEncoder::new()
            .add_state(1)
            .add_method(methods::REMOVE_PAIRING)
            .add(TlvType::Identifier, controller_id.as_bytes())
            .build()
    }

    /// Build a list-pairings request
    #[must_use]
    pub fn list_pairings_request() -> Vec<u8> {
        TlvEncoder::new()
            .add_state(1)
            .add_method(methods::LIST_PAIRINGS)
            .build()
    }

    /// Parse a list-pairings reply
    ///
    /// # Errors
    ///
    /// Returns error if the reply is malformed or carries an error code
    pub fn parse_list_response(
        &self,
        body: &[u8],
    ) -> std::result::Result<Vec<PairingRecord>, PairingError> {
        pairings::parse_list_response(self.accessory_id().unwrap_or_default(), body)
    }
}

impl std::fmt::Debug for MockController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockController")
            .field("pairing_id", &self.pairing_id())
            .field("accessory_id", &self.accessory_id)
            .finish_non_exhaustive()
    }
}
