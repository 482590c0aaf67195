//! Durable string-keyed store of JSON blobs.
//!
//! Components never talk to a [`KvStore`] directly; they go through [`Cache`],
//! which owns the JSON encoding, the "corrupt means absent" rule and the
//! mutation signal that replaces implicit observers.

pub mod file;
pub mod memory;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Synchronous key-value backend. Values are opaque strings.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Emitted after every completed write or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Written(String),
    Removed(String),
}

const EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KvStore>,
    events: broadcast::Sender<CacheEvent>,
}

impl Cache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { store, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Read and decode `key`. Unreadable or unparseable records are deleted
    /// and reported as absent.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read cache key '{}': {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding corrupt cache record '{}': {}", key, e);
                self.remove(key);
                None
            }
        }
    }

    /// Encode and write `value` under `key`. A failed write is logged; the
    /// in-memory state stays authoritative until the next write.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(CacheError::from)
            .and_then(|json| self.store.set(key, &json));

        match result {
            Ok(()) => {
                debug!("Cache write: {}", key);
                let _ = self.events.send(CacheEvent::Written(key.to_string()));
            }
            Err(e) => warn!("Failed to write cache key '{}': {}", key, e),
        }
    }

    pub fn remove(&self, key: &str) {
        match self.store.remove(key) {
            Ok(()) => {
                debug!("Cache delete: {}", key);
                let _ = self.events.send(CacheEvent::Removed(key.to_string()));
            }
            Err(e) => warn!("Failed to delete cache key '{}': {}", key, e),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        matches!(self.store.get(key), Ok(Some(_)))
    }

    #[cfg(test)]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.store.get(key).ok().flatten()
    }

    #[cfg(test)]
    pub fn put_raw(&self, key: &str, value: &str) {
        self.store.set(key, value).unwrap();
    }
}
