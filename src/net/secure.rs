//! HAP (`HomeKit` Accessory Protocol) secure session implementation
//!
//! After Pair-Verify every byte on the connection is framed as
//! `u16 LE length || ciphertext || 16-byte tag`, with the length bytes
//! authenticated as associated data. Each direction has its own key and
//! frame counter, and the counter is the nonce.

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BytesMut};
use thiserror::Error;
use tracing::warn;

use crate::protocol::crypto::{ChaCha20Poly1305Cipher, CryptoError, Nonce, SessionKeys, lengths};

/// Largest plaintext carried by one frame
pub const MAX_FRAME_PAYLOAD: usize = 1024;

/// Length prefix size
const LENGTH_SIZE: usize = 2;

/// Session transport errors
///
/// Every inbound error is fatal: the session is poisoned and the connection
/// must be closed.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Frame declares more than [`MAX_FRAME_PAYLOAD`] bytes
    #[error("frame length {length} exceeds {MAX_FRAME_PAYLOAD}")]
    FrameTooLarge {
        /// Declared length
        length: usize,
    },

    /// Frame failed authentication
    #[error("frame {counter} failed authentication")]
    DecryptionFailed {
        /// Inbound counter of the frame
        counter: u64,
    },

    /// Outbound encryption failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(#[source] CryptoError),

    /// Key could not be installed
    #[error("invalid session key: {0}")]
    InvalidKey(#[source] CryptoError),

    /// Frame counter would wrap
    #[error("frame counter exhausted")]
    CounterExhausted,

    /// An earlier inbound failure closed the session
    #[error("session poisoned by an earlier failure")]
    Poisoned,
}

/// Connection crypto state
///
/// Owns both ciphers, both counters and the partial-frame buffer. Counters
/// start at zero, advance once per frame and are never reset.
pub struct SecureSession {
    read_cipher: ChaCha20Poly1305Cipher,
    write_cipher: ChaCha20Poly1305Cipher,
    inbound_counter: u64,
    outbound_counter: u64,
    input_buffer: BytesMut,
    poisoned: bool,
}

impl SecureSession {
    /// Accessory end: read with the Control-Write key, write with Control-Read
    ///
    /// # Errors
    ///
    /// Returns error if a key can not be installed
    pub fn accessory(keys: &SessionKeys) -> Result<Self, SessionError> {
        Self::new(&keys.control_write, &keys.control_read)
    }

    /// Controller end: read with the Control-Read key, write with Control-Write
    ///
    /// # Errors
    ///
    /// Returns error if a key can not be installed
    pub fn controller(keys: &SessionKeys) -> Result<Self, SessionError> {
        Self::new(&keys.control_read, &keys.control_write)
    }

    fn new(read_key: &[u8; 32], write_key: &[u8; 32]) -> Result<Self, SessionError> {
        Ok(Self {
            read_cipher: ChaCha20Poly1305Cipher::new(read_key).map_err(SessionError::InvalidKey)?,
            write_cipher: ChaCha20Poly1305Cipher::new(write_key)
                .map_err(SessionError::InvalidKey)?,
            inbound_counter: 0,
            outbound_counter: 0,
            input_buffer: BytesMut::with_capacity(4096),
            poisoned: false,
        })
    }

    /// Encrypt data into frames of at most 1024 plaintext bytes
    ///
    /// # Errors
    ///
    /// Returns error if the session is poisoned or encryption fails
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        if self.poisoned {
            return Err(SessionError::Poisoned);
        }

        let frames = plaintext.len().div_ceil(MAX_FRAME_PAYLOAD);
        let mut output =
            Vec::with_capacity(plaintext.len() + frames * (LENGTH_SIZE + lengths::CHACHA_TAG));

        for chunk in plaintext.chunks(MAX_FRAME_PAYLOAD) {
            let mut len_bytes = [0u8; LENGTH_SIZE];
            // Chunks are at most 1024 bytes.
            #[allow(clippy::cast_possible_truncation)]
            LittleEndian::write_u16(&mut len_bytes, chunk.len() as u16);

            let counter = self.outbound_counter;
            self.outbound_counter = counter
                .checked_add(1)
                .ok_or(SessionError::CounterExhausted)?;

            let sealed = self
                .write_cipher
                .encrypt_with_aad(&Nonce::from_counter(counter), &len_bytes, chunk)
                .map_err(SessionError::EncryptionFailed)?;

            output.extend_from_slice(&len_bytes);
            output.extend_from_slice(&sealed);
        }

        Ok(output)
    }

    /// Append received bytes to the frame buffer
    pub fn feed(&mut self, data: &[u8]) {
        self.input_buffer.extend_from_slice(data);
    }

    /// Decrypt one complete frame from the buffer
    ///
    /// Returns `Ok(None)` when the buffer holds only part of a frame.
    ///
    /// # Errors
    ///
    /// Returns error if the frame is oversized or fails authentication; the
    /// session is poisoned afterwards
    pub fn decrypt(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        if self.poisoned {
            return Err(SessionError::Poisoned);
        }

        let result = self.decrypt_frame();
        if let Err(e) = &result {
            warn!(counter = self.inbound_counter, error = %e, "Secure session poisoned");
            self.poisoned = true;
            self.input_buffer.clear();
        }
        result
    }

    /// Decrypt every complete frame in the buffer and concatenate them
    ///
    /// # Errors
    ///
    /// Returns error on the first failing frame; the session is poisoned
    pub fn decrypt_all(&mut self) -> Result<Vec<u8>, SessionError> {
        let mut output = Vec::new();
        while let Some(plaintext) = self.decrypt()? {
            output.extend_from_slice(&plaintext);
        }
        Ok(output)
    }

    fn decrypt_frame(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        if self.input_buffer.len() < LENGTH_SIZE {
            return Ok(None);
        }

        let length = LittleEndian::read_u16(&self.input_buffer[..LENGTH_SIZE]) as usize;
        if length > MAX_FRAME_PAYLOAD {
            return Err(SessionError::FrameTooLarge { length });
        }

        let frame_len = LENGTH_SIZE + length + lengths::CHACHA_TAG;
        if self.input_buffer.len() < frame_len {
            return Ok(None);
        }

        let counter = self.inbound_counter;
        let next = counter
            .checked_add(1)
            .ok_or(SessionError::CounterExhausted)?;

        let plaintext = self
            .read_cipher
            .decrypt_with_aad(
                &Nonce::from_counter(counter),
                &self.input_buffer[..LENGTH_SIZE],
                &self.input_buffer[LENGTH_SIZE..frame_len],
            )
            .map_err(|_| SessionError::DecryptionFailed { counter })?;

        self.inbound_counter = next;
        self.input_buffer.advance(frame_len);
        Ok(Some(plaintext))
    }

    /// Frames received so far
    #[must_use]
    pub fn inbound_counter(&self) -> u64 {
        self.inbound_counter
    }

    /// Frames sent so far
    #[must_use]
    pub fn outbound_counter(&self) -> u64 {
        self.outbound_counter
    }

    /// Bytes buffered toward an incomplete frame
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.input_buffer.len()
    }

    /// Whether an inbound failure has closed the session
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("inbound_counter", &self.inbound_counter)
            .field("outbound_counter", &self.outbound_counter)
            .field("buffered", &self.input_buffer.len())
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}
