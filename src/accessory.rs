//! Accessory-wide pairing context shared by every connection

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::{AccessoryConfig, ConfigError};
use crate::protocol::pairing::{
    LongTermIdentity, MemoryPairingStore, PairingStore, StorageError,
};

/// Shared state of one accessory
///
/// Connections hold it through an `Arc`. The pairing store is the only shared
/// mutable resource; the Pair-Setup lease and failed attempt counter are
/// atomics.
pub struct Accessory {
    config: AccessoryConfig,
    identity: LongTermIdentity,
    store: Arc<dyn PairingStore>,
    failed_setup_attempts: AtomicU32,
    setup_in_progress: Arc<AtomicBool>,
}

impl Accessory {
    /// Create an accessory from its parts
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(
        config: AccessoryConfig,
        identity: LongTermIdentity,
        store: Arc<dyn PairingStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::info!(
            name = %config.name,
            pairing_id = identity.pairing_id(),
            "Accessory created"
        );

        Ok(Self {
            config,
            identity,
            store,
            failed_setup_attempts: AtomicU32::new(0),
            setup_in_progress: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Create an accessory with a fresh identity and an in-memory store
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn in_memory(config: AccessoryConfig) -> Result<Self, ConfigError> {
        let store = Arc::new(MemoryPairingStore::with_capacity(config.max_pairings));
        Self::new(config, LongTermIdentity::generate(), store)
    }

    /// Open (or create) a JSON file store and load the identity kept in it
    ///
    /// # Errors
    ///
    /// Returns error if the store can not be opened or the configuration is
    /// invalid
    #[cfg(feature = "tokio-runtime")]
    pub async fn with_file_store(
        config: AccessoryConfig,
        path: impl AsRef<std::path::Path>,
    ) -> crate::error::Result<Self> {
        use crate::protocol::pairing::FilePairingStore;

        let store = FilePairingStore::open(path, config.max_pairings).await?;
        let identity = store.load_or_create_identity().await?;
        Ok(Self::new(config, identity, Arc::new(store))?)
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &AccessoryConfig {
        &self.config
    }

    /// Long-term identity
    #[must_use]
    pub fn identity(&self) -> &LongTermIdentity {
        &self.identity
    }

    /// Accessory pairing id
    #[must_use]
    pub fn pairing_id(&self) -> &str {
        self.identity.pairing_id()
    }

    /// Pairing store
    #[must_use]
    pub fn store(&self) -> &dyn PairingStore {
        self.store.as_ref()
    }

    /// Whether any controller is paired
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable
    pub async fn is_paired(&self) -> Result<bool, StorageError> {
        self.store.is_paired().await
    }

    /// Failed Pair-Setup attempts since the last success
    #[must_use]
    pub fn failed_setup_attempts(&self) -> u32 {
        self.failed_setup_attempts.load(Ordering::SeqCst)
    }

    /// Whether the failed attempt limit has been reached
    #[must_use]
    pub fn setup_locked_out(&self) -> bool {
        self.failed_setup_attempts() >= self.config.max_setup_attempts
    }

    pub(crate) fn record_failed_setup(&self) -> u32 {
        self.failed_setup_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset_failed_setups(&self) {
        self.failed_setup_attempts.store(0, Ordering::SeqCst);
    }

    /// Claim the single Pair-Setup slot
    ///
    /// Returns `None` if another connection holds it.
    #[must_use]
    pub fn try_begin_setup(&self) -> Option<SetupLease> {
        self.setup_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SetupLease {
                flag: Arc::clone(&self.setup_in_progress),
            })
    }

    /// Whether a Pair-Setup currently holds the lease
    #[must_use]
    pub fn setup_in_progress(&self) -> bool {
        self.setup_in_progress.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Accessory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessory")
            .field("config", &self.config)
            .field("identity", &self.identity)
            .field("failed_setup_attempts", &self.failed_setup_attempts())
            .field("setup_in_progress", &self.setup_in_progress())
            .finish_non_exhaustive()
    }
}

/// Exclusive right to run Pair-Setup, released on drop
#[derive(Debug)]
pub struct SetupLease {
    flag: Arc<AtomicBool>,
}

impl Drop for SetupLease {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
