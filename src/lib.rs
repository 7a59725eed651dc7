//! # hap-pairing
//!
//! Accessory side of `HomeKit` Accessory Protocol pairing.
//!
//! ## Features
//!
//! - TLV8 codec for pairing messages
//! - Pair-Setup with the setup code (SRP-6a, 3072-bit group)
//! - Pair-Verify with stored long-term keys (X25519 + Ed25519)
//! - Pairing management (`/pairings` add, remove, list)
//! - Encrypted session transport (ChaCha20-Poly1305 frames)
//! - In-memory and JSON file pairing stores
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hap_pairing::{Accessory, AccessoryConfig, Endpoint, HapConnection, SetupCode};
//!
//! # async fn example(request: &[u8]) -> Result<(), hap_pairing::HapError> {
//! let config = AccessoryConfig::new("Lamp").with_setup_code(SetupCode::parse("031-45-154")?);
//! let accessory = Arc::new(Accessory::in_memory(config)?);
//!
//! // One per accepted TCP connection
//! let mut connection = HapConnection::new(accessory);
//! let reply = connection.handle(Endpoint::from_path("/pair-setup")?, request).await?;
//!
//! let wire = if reply.encrypt {
//!     connection.encrypt(&reply.body)?
//! } else {
//!     reply.body
//! };
//! # let _ = wire;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! - **Connection**: `HapConnection` - routes one controller's requests
//! - **Accessory**: `Accessory` - identity, pairing store and setup policy
//!   shared by all connections
//! - **Low-level**: Protocol modules - handshakes, TLV8 and crypto

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Accessory-wide pairing context
pub mod accessory;
/// Accessory configuration
pub mod config;
/// Error types
pub mod error;

/// Testing utilities
pub mod testing;

pub mod connection;
pub mod net;
pub mod protocol;

// Re-exports
pub use accessory::{Accessory, SetupLease};
pub use config::{AccessoryConfig, ConfigError, SetupCode};
pub use connection::{ConnectionError, ConnectionReply, ConnectionState, Endpoint, HapConnection};
pub use error::{HapError, Result};
pub use net::{SecureSession, SessionError};
#[cfg(feature = "tokio-runtime")]
pub use protocol::pairing::FilePairingStore;
pub use protocol::pairing::{
    LongTermIdentity, MemoryPairingStore, PairingError, PairingRecord, PairingStore, Permissions,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
///
/// Convenient re-exports
pub mod prelude {
    pub use crate::{
        Accessory, AccessoryConfig, Endpoint, HapConnection, HapError, PairingStore, SetupCode,
    };
}
