//! Connection management
//!
//! Routes pairing requests for one controller connection and switches it to
//! the encrypted session once Pair-Verify succeeds.

mod router;
mod state;

pub use router::{ConnectionError, ConnectionReply, Endpoint, HapConnection};
pub use state::{ConnectionState, DisconnectReason};

#[cfg(test)]
mod tests;
