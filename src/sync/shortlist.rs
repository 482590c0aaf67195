use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::Cache;
use crate::clock::Clock;
use crate::config::shortlist_key;
use crate::model::ShortlistItem;
use crate::sync::errors::SyncError;

#[derive(Debug, Serialize, Deserialize)]
struct ShortlistRecord {
    items: Vec<ShortlistItem>,
    timestamp: DateTime<Utc>,
}

/// Places bookmarked in one session, keyed by name, in insertion order.
pub struct ShortlistStore {
    cache: Cache,
    clock: Arc<dyn Clock>,
    session_id: Option<String>,
    items: IndexMap<String, ShortlistItem>,
}

impl ShortlistStore {
    pub fn new(cache: Cache, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            clock,
            session_id: None,
            items: IndexMap::new(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Attach to `session_id` and hydrate from its cache key, creating an
    /// empty persisted record when none exists.
    pub fn initialize(&mut self, session_id: &str) {
        self.session_id = Some(session_id.to_string());
        self.items.clear();

        match self.cache.load::<ShortlistRecord>(&shortlist_key(session_id)) {
            Some(record) => {
                self.items = record
                    .items
                    .into_iter()
                    .map(|item| (item.name.clone(), item))
                    .collect();
                debug!("Hydrated {} shortlist items for {}", self.items.len(), session_id);
            }
            None => self.save(),
        }
    }

    /// Insert or replace by name; a replaced entry keeps its position.
    /// Returns the owning session id.
    pub fn add(&mut self, item: ShortlistItem) -> Result<String, SyncError> {
        let id = self.session_id.clone().ok_or(SyncError::NoActiveSession)?;
        self.items.insert(item.name.clone(), item);
        self.save();
        Ok(id)
    }

    pub fn remove(&mut self, name: &str) -> Result<String, SyncError> {
        let id = self.session_id.clone().ok_or(SyncError::NoActiveSession)?;
        self.items.shift_remove(name);
        self.save();
        Ok(id)
    }

    /// Union `items` into the local set. Local entries win on name clashes.
    pub fn merge(&mut self, items: &[ShortlistItem]) {
        for item in items {
            if !self.items.contains_key(&item.name) {
                self.items.insert(item.name.clone(), item.clone());
            }
        }
        self.save();
    }

    /// Fill in details fetched after the place was added. Ignored if the
    /// shortlist has since moved to another session or dropped the place.
    pub fn apply_enrichment(&mut self, session_id: &str, enriched: ShortlistItem) -> bool {
        if self.session_id.as_deref() != Some(session_id) {
            return false;
        }
        let Some(item) = self.items.get_mut(&enriched.name) else {
            return false;
        };

        if enriched.info.is_some() {
            item.info = enriched.info;
        }
        if item.photos.is_empty() {
            item.photos = enriched.photos;
        }
        if item.geometry.is_none() {
            item.geometry = enriched.geometry;
        }
        if item.place_id.is_none() {
            item.place_id = enriched.place_id;
        }
        self.save();
        true
    }

    pub fn get(&self, name: &str) -> Option<&ShortlistItem> {
        self.items.get(name)
    }

    pub fn item_list(&self) -> Vec<ShortlistItem> {
        self.items.values().cloned().collect()
    }

    /// Detach from the session. The cache entry stays.
    pub fn clear_shortlist(&mut self) {
        self.items.clear();
        self.session_id = None;
    }

    pub fn clear_local_storage(&self, session_id: &str) {
        self.cache.remove(&shortlist_key(session_id));
    }

    fn save(&self) {
        let Some(id) = &self.session_id else {
            return;
        };
        let record = ShortlistRecord {
            items: self.items.values().cloned().collect(),
            timestamp: self.clock.now(),
        };
        self.cache.save(&shortlist_key(id), &record);
    }
}
