//! TLV8 encoding for `HomeKit` pairing protocol
//!
//! Every item is a one-byte tag, a one-byte length and up to 255 value bytes.
//! Longer values are split over consecutive items with the same tag, and a
//! value whose length is an exact multiple of 255 is followed by an empty
//! item of the same tag so the run has an unambiguous end.

use thiserror::Error;

/// Largest value carried by a single TLV8 item
pub const MAX_CHUNK: usize = 255;

/// TLV type codes used in `HomeKit` pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    /// Method to use (pairing method)
    Method = 0x00,
    /// Pairing identifier
    Identifier = 0x01,
    /// Salt for SRP
    Salt = 0x02,
    /// Public key
    PublicKey = 0x03,
    /// Proof (M1/M2 in SRP)
    Proof = 0x04,
    /// Encrypted data
    EncryptedData = 0x05,
    /// Pairing state/sequence number
    State = 0x06,
    /// Error code
    Error = 0x07,
    /// Retry delay
    RetryDelay = 0x08,
    /// Certificate
    Certificate = 0x09,
    /// Signature
    Signature = 0x0A,
    /// Permissions
    Permissions = 0x0B,
    /// Fragment data
    FragmentData = 0x0C,
    /// Fragment last
    FragmentLast = 0x0D,
    /// Flags
    Flags = 0x13,
    /// Separator (empty value, used to separate items)
    Separator = 0xFF,
}

impl TlvType {
    /// Create from byte value
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0x13 => Some(Self::Flags),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }
}

/// TLV decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TlvError {
    /// Declared length runs past the end of the buffer
    #[error("truncated TLV: item at offset {offset} needs {needed} bytes, {available} left")]
    Truncated {
        /// Offset of the item header
        offset: usize,
        /// Bytes the item declares (header included)
        needed: usize,
        /// Bytes remaining from the header onward
        available: usize,
    },

    /// A tag the caller requires is absent
    #[error("missing required tag: {0:?}")]
    MissingTag(TlvType),

    /// A tag is present but its value is malformed
    #[error("invalid value for {0:?}")]
    InvalidValue(TlvType),
}

/// TLV encoder
#[derive(Debug, Default)]
pub struct TlvEncoder {
    buffer: Vec<u8>,
}

impl TlvEncoder {
    /// Create a new encoder
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Add a TLV item, fragmenting values longer than 255 bytes
    #[must_use]
    pub fn add(mut self, tlv_type: TlvType, value: &[u8]) -> Self {
        self.push_raw(tlv_type as u8, value);
        self
    }

    /// Add a single byte value
    #[must_use]
    pub fn add_byte(self, tlv_type: TlvType, value: u8) -> Self {
        self.add(tlv_type, &[value])
    }

    /// Add state value
    #[must_use]
    pub fn add_state(self, state: u8) -> Self {
        self.add_byte(TlvType::State, state)
    }

    /// Add method value
    #[must_use]
    pub fn add_method(self, method: u8) -> Self {
        self.add_byte(TlvType::Method, method)
    }

    /// Add error value
    #[must_use]
    pub fn add_error(self, code: u8) -> Self {
        self.add_byte(TlvType::Error, code)
    }

    /// Add an empty separator item between list records
    #[must_use]
    pub fn add_separator(self) -> Self {
        self.add(TlvType::Separator, &[])
    }

    /// Build the encoded TLV data
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }

    fn push_raw(&mut self, tag: u8, value: &[u8]) {
        for chunk in value.chunks(MAX_CHUNK) {
            self.buffer.push(tag);
            #[allow(clippy::cast_possible_truncation)]
            self.buffer.push(chunk.len() as u8);
            self.buffer.extend_from_slice(chunk);
        }

        // Empty values, and values that fill their last chunk exactly, end
        // with a zero-length item.
        if value.len() % MAX_CHUNK == 0 {
            self.buffer.push(tag);
            self.buffer.push(0);
        }
    }
}

/// One logical item after fragment reassembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvItem {
    /// Raw tag byte (may be a tag this crate does not know)
    pub tag: u8,
    /// Concatenated value
    pub value: Vec<u8>,
}

impl TlvItem {
    /// Tag as a known type, if it is one
    #[must_use]
    pub fn tlv_type(&self) -> Option<TlvType> {
        TlvType::from_byte(self.tag)
    }
}

/// TLV decoder
#[derive(Debug, Clone, Default)]
pub struct TlvDecoder {
    items: Vec<TlvItem>,
}

impl TlvDecoder {
    /// Decode TLV data
    ///
    /// Consecutive items with the same tag are concatenated in order. Items
    /// with the same tag that are split by another tag stay separate.
    ///
    /// # Errors
    ///
    /// Returns `TlvError::Truncated` if a header or value runs past the end
    /// of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, TlvError> {
        let mut items: Vec<TlvItem> = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            let available = data.len() - pos;
            if available < 2 {
                return Err(TlvError::Truncated {
                    offset: pos,
                    needed: 2,
                    available,
                });
            }

            let tag = data[pos];
            let length = data[pos + 1] as usize;
            if available < 2 + length {
                return Err(TlvError::Truncated {
                    offset: pos,
                    needed: 2 + length,
                    available,
                });
            }

            let value = &data[pos + 2..pos + 2 + length];
            pos += 2 + length;

            match items.last_mut() {
                Some(last) if last.tag == tag => {
                    last.value.extend_from_slice(value);
                }
                _ => items.push(TlvItem {
                    tag,
                    value: value.to_vec(),
                }),
            }
        }

        Ok(Self { items })
    }

    /// All items in wire order
    #[must_use]
    pub fn items(&self) -> &[TlvItem] {
        &self.items
    }

    /// Split a list response into records at each separator
    #[must_use]
    pub fn split_records(&self) -> Vec<Self> {
        self.items
            .split(|item| item.tag == TlvType::Separator as u8)
            .filter(|record| !record.is_empty())
            .map(|record| Self {
                items: record.to_vec(),
            })
            .collect()
    }

    /// Get the first value with the given type
    #[must_use]
    pub fn get(&self, tlv_type: TlvType) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|item| item.tag == tlv_type as u8)
            .map(|item| item.value.as_slice())
    }

    /// Get a single byte value
    #[must_use]
    pub fn get_u8(&self, tlv_type: TlvType) -> Option<u8> {
        self.get(tlv_type).and_then(|v| v.first().copied())
    }

    /// Get a required value
    ///
    /// # Errors
    ///
    /// Returns `TlvError::MissingTag` if the tag is absent
    pub fn get_required(&self, tlv_type: TlvType) -> Result<&[u8], TlvError> {
        self.get(tlv_type).ok_or(TlvError::MissingTag(tlv_type))
    }

    /// Get a required single-byte value
    ///
    /// # Errors
    ///
    /// Returns an error if the tag is absent or its value is not one byte
    pub fn get_required_u8(&self, tlv_type: TlvType) -> Result<u8, TlvError> {
        match self.get_required(tlv_type)? {
            [value] => Ok(*value),
            _ => Err(TlvError::InvalidValue(tlv_type)),
        }
    }

    /// Get state value
    ///
    /// # Errors
    ///
    /// Returns error if state field is missing or invalid length
    pub fn get_state(&self) -> Result<u8, TlvError> {
        self.get_required_u8(TlvType::State)
    }

    /// Get error value (if present)
    #[must_use]
    pub fn get_error(&self) -> Option<u8> {
        self.get_u8(TlvType::Error)
    }
}

/// Pairing method constants
pub mod methods {
    /// Pair-Setup
    pub const PAIR_SETUP: u8 = 0;
    /// Pair-Setup with auth (`MFi`)
    pub const PAIR_SETUP_AUTH: u8 = 1;
    /// Pair-Verify
    pub const PAIR_VERIFY: u8 = 2;
    /// Add pairing
    pub const ADD_PAIRING: u8 = 3;
    /// Remove pairing
    pub const REMOVE_PAIRING: u8 = 4;
    /// List pairings
    pub const LIST_PAIRINGS: u8 = 5;
}

/// Error codes sent to the controller
pub mod errors {
    /// Generic error
    pub const UNKNOWN: u8 = 0x01;
    /// Setup code or signature verification failed
    pub const AUTHENTICATION: u8 = 0x02;
    /// Client must wait `RetryDelay` seconds
    pub const BACKOFF: u8 = 0x03;
    /// No room for another pairing
    pub const MAX_PEERS: u8 = 0x04;
    /// Too many failed authentication attempts
    pub const MAX_TRIES: u8 = 0x05;
    /// Accessory is already paired
    pub const UNAVAILABLE: u8 = 0x06;
    /// Another pairing is in progress
    pub const BUSY: u8 = 0x07;
}
