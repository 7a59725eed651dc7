//! Protocol module

pub mod crypto;
pub mod pairing;
