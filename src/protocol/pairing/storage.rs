//! Storage for pairing records

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tokio-runtime")]
use super::identity::{LongTermIdentity, StoredIdentity};
use crate::protocol::crypto::CryptoError;

/// Default number of controllers an accessory accepts
pub const DEFAULT_MAX_PAIRINGS: usize = 16;

/// Controller permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permissions {
    /// Regular controller
    User,
    /// May add, remove and list pairings
    Admin,
}

impl Permissions {
    /// Parse the `Permissions` TLV byte
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::User),
            1 => Some(Self::Admin),
            _ => None,
        }
    }

    /// Wire value
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::User => 0,
            Self::Admin => 1,
        }
    }

    /// Whether this is an admin pairing
    #[must_use]
    pub fn is_admin(self) -> bool {
        self == Self::Admin
    }
}

/// A paired controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRecord {
    /// Pairing id of the accessory that owns the record
    pub accessory_id: String,
    /// Controller pairing id
    pub controller_id: String,
    /// Controller Ed25519 long-term public key
    pub public_key: [u8; 32],
    /// Controller permissions
    pub permissions: Permissions,
}

/// Abstract storage interface for pairing records
///
/// Lookups may run concurrently. Every mutating method runs under a single
/// exclusive lock, so `add_checked` and `remove_cascading` are atomic with
/// respect to each other. A mutation that fails to persist leaves the store
/// unchanged.
#[async_trait]
pub trait PairingStore: Send + Sync {
    /// Find the record for a controller
    ///
    /// # Errors
    ///
    /// Returns error if storage is unavailable
    async fn lookup(&self, controller_id: &str) -> Result<Option<PairingRecord>, StorageError>;

    /// Insert a record, replacing any record with the same controller id
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Full` if the record is new and the store is at
    /// capacity, or another error if persisting fails
    async fn store(&self, record: PairingRecord) -> Result<(), StorageError>;

    /// Remove a record, returning it if it existed
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails
    async fn remove(&self, controller_id: &str) -> Result<Option<PairingRecord>, StorageError>;

    /// All records, ordered by controller id
    ///
    /// # Errors
    ///
    /// Returns error if storage is unavailable
    async fn list(&self) -> Result<Vec<PairingRecord>, StorageError>;

    /// Remove every record
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails
    async fn clear(&self) -> Result<(), StorageError>;

    /// Insert a record unless its id is already paired with a different key
    ///
    /// A known id with the same key has its permissions updated.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::KeyMismatch` for a known id with another key,
    /// `StorageError::Full` at capacity, or another error if persisting fails
    async fn add_checked(&self, record: PairingRecord) -> Result<(), StorageError>;

    /// Remove a record, then every record if no admin is left
    ///
    /// Returns the removed controller ids: `controller_id` first if it was
    /// present, then the swept records in id order.
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails
    async fn remove_cascading(&self, controller_id: &str) -> Result<Vec<String>, StorageError>;

    /// Whether any controller is paired
    ///
    /// # Errors
    ///
    /// Returns error if storage is unavailable
    async fn is_paired(&self) -> Result<bool, StorageError> {
        Ok(!self.list().await?.is_empty())
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Underlying file operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No room for another pairing
    #[error("pairing store full ({capacity} records)")]
    Full {
        /// Maximum number of records
        capacity: usize,
    },

    /// A writer panicked while holding the lock
    #[error("pairing store lock poisoned")]
    Poisoned,

    /// Controller id is already paired with a different public key
    #[error("pairing {controller_id} exists with a different public key")]
    KeyMismatch {
        /// Conflicting controller id
        controller_id: String,
    },

    /// Stored identity is not usable
    #[error("invalid stored identity: {0}")]
    InvalidIdentity(#[from] CryptoError),
}

fn insert_bounded(
    records: &mut BTreeMap<String, PairingRecord>,
    record: PairingRecord,
    capacity: usize,
) -> Result<(), StorageError> {
    if !records.contains_key(&record.controller_id) && records.len() >= capacity {
        return Err(StorageError::Full { capacity });
    }
    records.insert(record.controller_id.clone(), record);
    Ok(())
}

fn insert_checked(
    records: &mut BTreeMap<String, PairingRecord>,
    record: PairingRecord,
    capacity: usize,
) -> Result<(), StorageError> {
    if let Some(existing) = records.get(&record.controller_id) {
        if existing.public_key != record.public_key {
            return Err(StorageError::KeyMismatch {
                controller_id: record.controller_id,
            });
        }
    }
    insert_bounded(records, record, capacity)
}

fn remove_cascading_from(
    records: &mut BTreeMap<String, PairingRecord>,
    controller_id: &str,
) -> Vec<String> {
    let mut removed: Vec<String> = records
        .remove(controller_id)
        .map(|r| r.controller_id)
        .into_iter()
        .collect();

    if !records.values().any(|r| r.permissions.is_admin()) {
        removed.extend(std::mem::take(records).into_keys());
    }
    removed
}

/// In-memory pairing store (non-persistent)
#[derive(Debug)]
pub struct MemoryPairingStore {
    records: RwLock<BTreeMap<String, PairingRecord>>,
    capacity: usize,
}

impl Default for MemoryPairingStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_PAIRINGS)
    }
}

impl MemoryPairingStore {
    /// Create an empty store with the default capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store holding at most `capacity` records
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            capacity,
        }
    }
}

#[async_trait]
impl PairingStore for MemoryPairingStore {
    async fn lookup(&self, controller_id: &str) -> Result<Option<PairingRecord>, StorageError> {
        let records = self.records.read().map_err(|_| StorageError::Poisoned)?;
        Ok(records.get(controller_id).cloned())
    }

    async fn store(&self, record: PairingRecord) -> Result<(), StorageError> {
        let mut records = self.records.write().map_err(|_| StorageError::Poisoned)?;
        insert_bounded(&mut records, record, self.capacity)
    }

    async fn remove(&self, controller_id: &str) -> Result<Option<PairingRecord>, StorageError> {
        let mut records = self.records.write().map_err(|_| StorageError::Poisoned)?;
        Ok(records.remove(controller_id))
    }

    async fn list(&self) -> Result<Vec<PairingRecord>, StorageError> {
        let records = self.records.read().map_err(|_| StorageError::Poisoned)?;
        Ok(records.values().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.records
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .clear();
        Ok(())
    }

    async fn add_checked(&self, record: PairingRecord) -> Result<(), StorageError> {
        let mut records = self.records.write().map_err(|_| StorageError::Poisoned)?;
        insert_checked(&mut records, record, self.capacity)
    }

    async fn remove_cascading(&self, controller_id: &str) -> Result<Vec<String>, StorageError> {
        let mut records = self.records.write().map_err(|_| StorageError::Poisoned)?;
        Ok(remove_cascading_from(&mut records, controller_id))
    }
}

/// On-disk layout of [`FilePairingStore`]
#[cfg(feature = "tokio-runtime")]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    identity: Option<StoredIdentity>,
    pairings: BTreeMap<String, PairingRecord>,
}

/// File-based pairing store
///
/// Keeps the accessory identity and all pairing records in one JSON file.
/// Every mutation writes a sibling temporary file and renames it over the
/// store, and only then updates the in-memory copy.
#[cfg(feature = "tokio-runtime")]
pub struct FilePairingStore {
    path: std::path::PathBuf,
    capacity: usize,
    cache: tokio::sync::RwLock<StoreFile>,
}

#[cfg(feature = "tokio-runtime")]
impl FilePairingStore {
    /// Open the store at `path`, creating parent directories as needed
    ///
    /// # Errors
    ///
    /// Returns error if directory cannot be created or file loaded
    pub async fn open(
        path: impl AsRef<std::path::Path>,
        capacity: usize,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let cache = Self::load_all(&path).await?;
        tracing::debug!(
            path = %path.display(),
            pairings = cache.pairings.len(),
            "Opened pairing store"
        );

        Ok(Self {
            path,
            capacity,
            cache: tokio::sync::RwLock::new(cache),
        })
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Load the stored identity, generating and persisting one if absent
    ///
    /// # Errors
    ///
    /// Returns error if the stored identity is invalid or cannot be saved
    pub async fn load_or_create_identity(&self) -> Result<LongTermIdentity, StorageError> {
        let mut cache = self.cache.write().await;
        if let Some(stored) = &cache.identity {
            return Ok(LongTermIdentity::from_stored(stored)?);
        }

        let identity = LongTermIdentity::generate();
        let mut next = cache.clone();
        next.identity = Some(identity.to_stored());
        self.save_all(&next).await?;
        *cache = next;
        tracing::info!(pairing_id = identity.pairing_id(), "Generated accessory identity");
        Ok(identity)
    }

    /// Apply `change` to a copy of the contents, persist it, then publish it
    async fn update<T>(
        &self,
        change: impl FnOnce(&mut StoreFile) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut cache = self.cache.write().await;
        let mut next = cache.clone();
        let out = change(&mut next)?;
        self.save_all(&next).await?;
        *cache = next;
        Ok(out)
    }

    fn temp_path(&self) -> std::path::PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn load_all(path: &std::path::Path) -> Result<StoreFile, StorageError> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(StoreFile::default());
        }

        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Ok(StoreFile::default());
        }

        let cache = tokio::task::spawn_blocking(move || serde_json::from_slice(&bytes))
            .await
            .map_err(|e| StorageError::Serialization(format!("Deserialization task failed: {e}")))?
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        Ok(cache)
    }

    async fn save_all(&self, cache: &StoreFile) -> Result<(), StorageError> {
        let cache = cache.clone();

        let bytes = tokio::task::spawn_blocking(move || serde_json::to_vec_pretty(&cache))
            .await
            .map_err(|e| StorageError::Serialization(format!("Serialization task failed: {e}")))?
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        // The live file is never truncated; a crash leaves either the old or
        // the new contents.
        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::File::open(&temp).await?.sync_all().await?;

        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(feature = "tokio-runtime")]
#[async_trait]
impl PairingStore for FilePairingStore {
    async fn lookup(&self, controller_id: &str) -> Result<Option<PairingRecord>, StorageError> {
        Ok(self.cache.read().await.pairings.get(controller_id).cloned())
    }

    async fn store(&self, record: PairingRecord) -> Result<(), StorageError> {
        self.update(|file| insert_bounded(&mut file.pairings, record, self.capacity))
            .await
    }

    async fn remove(&self, controller_id: &str) -> Result<Option<PairingRecord>, StorageError> {
        if self.cache.read().await.pairings.get(controller_id).is_none() {
            return Ok(None);
        }
        self.update(|file| Ok(file.pairings.remove(controller_id)))
            .await
    }

    async fn list(&self) -> Result<Vec<PairingRecord>, StorageError> {
        Ok(self.cache.read().await.pairings.values().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.update(|file| {
            file.pairings.clear();
            Ok(())
        })
        .await
    }

    async fn add_checked(&self, record: PairingRecord) -> Result<(), StorageError> {
        self.update(|file| insert_checked(&mut file.pairings, record, self.capacity))
            .await
    }

    async fn remove_cascading(&self, controller_id: &str) -> Result<Vec<String>, StorageError> {
        self.update(|file| Ok(remove_cascading_from(&mut file.pairings, controller_id)))
            .await
    }
}
