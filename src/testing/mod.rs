//! Testing utilities
//!
//! An in-memory accessory and a simulated controller, so the pairing
//! handshakes can be exercised end to end without a network.

pub mod mock_controller;

use std::sync::Arc;

pub use mock_controller::MockController;

use crate::accessory::Accessory;
use crate::config::{AccessoryConfig, SetupCode};
use crate::error::Result;

/// Setup code used by [`test_accessory`]
pub const TEST_SETUP_CODE: &str = "031-45-154";

/// Accessory with a fresh identity, an in-memory store and
/// [`TEST_SETUP_CODE`]
///
/// # Errors
///
/// Returns error if the configuration is rejected
pub fn test_accessory() -> Result<Arc<Accessory>> {
    test_accessory_with(AccessoryConfig::new("Test Accessory"))
}

/// Like [`test_accessory`] but starting from `config`; the setup code is
/// always replaced with [`TEST_SETUP_CODE`]
///
/// # Errors
///
/// Returns error if the configuration is rejected
pub fn test_accessory_with(config: AccessoryConfig) -> Result<Arc<Accessory>> {
    let config = config.with_setup_code(SetupCode::parse(TEST_SETUP_CODE)?);
    Ok(Arc::new(Accessory::in_memory(config)?))
}
