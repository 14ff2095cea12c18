//! Session parameter storage
//!
//! All authentication state is kept in a key/value [`Storage`] backend chosen
//! by the [`StorageKind`] discriminator of the client configuration:
//!
//! | Kind | Backend | Survives restart | Can navigate |
//! |------|---------|------------------|--------------|
//! | `SessionStorage` | [`MemoryStorage`] held by the client | No | Yes |
//! | `LocalStorage` | [`FileStorage`] (JSON file, atomic rewrite) | Yes | Yes |
//! | `WebWorker` | private [`MemoryStorage`] | No | No |
//!
//! Components never talk to a backend directly; they go through
//! [`SessionStore`], which namespaces every key by tenant and client ID and
//! (de)serializes whole records so a reader never observes a half-written one.

mod file;
mod memory;
mod scoped;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use scoped::{SessionStore, StoredRequestParams, keys};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Storage backend errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed
    #[error("Storage I/O failed for {path}: {source}")]
    Io {
        /// File the backend operates on
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A stored value could not be (de)serialized
    #[error("Storage serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key/value persistence used for all session parameters.
///
/// Implementations must confine side effects to the named key: no key may
/// alias another.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Read the value stored under `key`
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete `key`; deleting an absent key is not an error
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Storage backend selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKind {
    /// In-process storage that lives as long as the client
    #[default]
    SessionStorage,
    /// Durable file-backed storage
    LocalStorage,
    /// Isolated in-memory storage for contexts that cannot navigate
    WebWorker,
}

impl StorageKind {
    /// Whether a client using this backend performs navigations itself.
    ///
    /// The isolated backend hands redirect URLs back to the caller instead.
    pub fn can_navigate(self) -> bool {
        !matches!(self, Self::WebWorker)
    }

    /// Open the default backend for this kind
    ///
    /// `path` is required for [`StorageKind::LocalStorage`] and ignored otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the durable file exists but cannot be read.
    pub fn open(self, path: Option<&std::path::Path>) -> Result<Arc<dyn Storage>, StorageError> {
        match (self, path) {
            (Self::LocalStorage, Some(path)) => Ok(Arc::new(FileStorage::open(path)?)),
            (Self::LocalStorage, None) => Err(StorageError::Io {
                path: PathBuf::new(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "LocalStorage requires a storage path",
                ),
            }),
            (Self::SessionStorage | Self::WebWorker, _) => Ok(Arc::new(MemoryStorage::new())),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionStorage => write!(f, "SessionStorage"),
            Self::LocalStorage => write!(f, "LocalStorage"),
            Self::WebWorker => write!(f, "WebWorker"),
        }
    }
}
