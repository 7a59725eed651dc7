//! Configuration for a HAP accessory

use rand::Rng;
use thiserror::Error;

use crate::protocol::pairing::storage::DEFAULT_MAX_PAIRINGS;

/// Default limit on failed Pair-Setup attempts
pub const DEFAULT_MAX_SETUP_ATTEMPTS: u32 = 100;

/// Codes HAP forbids because they are trivially guessable
const TRIVIAL_CODES: [&str; 12] = [
    "000-00-000",
    "111-11-111",
    "222-22-222",
    "333-33-333",
    "444-44-444",
    "555-55-555",
    "666-66-666",
    "777-77-777",
    "888-88-888",
    "999-99-999",
    "123-45-678",
    "876-54-321",
];

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Setup code is not of the form `XXX-XX-XXX`
    #[error("setup code must be formatted XXX-XX-XXX")]
    MalformedSetupCode,

    /// Setup code is on the forbidden list
    #[error("setup code is too easy to guess")]
    TrivialSetupCode,

    /// A numeric or string field is out of range
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Eight-digit setup code shared out of band with the controller
///
/// The formatted string, dashes included, is the SRP password.
#[derive(Clone, PartialEq, Eq)]
pub struct SetupCode(String);

impl SetupCode {
    /// Parse and validate a code of the form `XXX-XX-XXX`
    ///
    /// # Errors
    ///
    /// Returns error if the format is wrong or the code is trivial
    pub fn parse(code: &str) -> Result<Self, ConfigError> {
        let bytes = code.as_bytes();
        let well_formed = bytes.len() == 10
            && bytes.iter().enumerate().all(|(i, b)| match i {
                3 | 6 => *b == b'-',
                _ => b.is_ascii_digit(),
            });
        if !well_formed {
            return Err(ConfigError::MalformedSetupCode);
        }
        if TRIVIAL_CODES.contains(&code) {
            return Err(ConfigError::TrivialSetupCode);
        }
        Ok(Self(code.to_string()))
    }

    /// Generate a random non-trivial code
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let n: u32 = rng.gen_range(0..100_000_000);
            let digits = format!("{n:08}");
            let code = format!("{}-{}-{}", &digits[..3], &digits[3..5], &digits[5..]);
            if !TRIVIAL_CODES.contains(&code.as_str()) {
                return Self(code);
            }
        }
    }

    /// Code as `XXX-XX-XXX`
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SetupCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SetupCode(<redacted>)")
    }
}

impl std::str::FromStr for SetupCode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Configuration for a HAP accessory
#[derive(Debug, Clone)]
pub struct AccessoryConfig {
    /// Accessory name (for logging)
    pub name: String,

    /// Setup code controllers must prove during Pair-Setup
    pub setup_code: SetupCode,

    /// Failed Pair-Setup attempts before the accessory answers `MaxTries`
    pub max_setup_attempts: u32,

    /// Maximum number of paired controllers
    pub max_pairings: usize,
}

impl Default for AccessoryConfig {
    fn default() -> Self {
        Self {
            name: "HAP Accessory".to_string(),
            setup_code: SetupCode::generate(),
            max_setup_attempts: DEFAULT_MAX_SETUP_ATTEMPTS,
            max_pairings: DEFAULT_MAX_PAIRINGS,
        }
    }
}

impl AccessoryConfig {
    /// Create a new configuration with the given accessory name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the setup code
    #[must_use]
    pub fn with_setup_code(mut self, setup_code: SetupCode) -> Self {
        self.setup_code = setup_code;
        self
    }

    /// Set the failed attempt limit
    #[must_use]
    pub fn with_max_setup_attempts(mut self, attempts: u32) -> Self {
        self.max_setup_attempts = attempts;
        self
    }

    /// Set the pairing limit
    #[must_use]
    pub fn with_max_pairings(mut self, max: usize) -> Self {
        self.max_pairings = max;
        self
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if any field is out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "name",
                reason: "must not be empty".to_string(),
            });
        }

        if self.max_setup_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_setup_attempts",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.max_pairings == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_pairings",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}
