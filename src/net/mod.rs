//! Network layer
//!
//! Encrypted framing used on a connection once Pair-Verify has completed.

pub mod secure;


pub use secure::{MAX_FRAME_PAYLOAD, SecureSession, SessionError};
