//! Ephemeral per-room settings.
//!
//! A flat key/value store kept in a [`LayeredCache`] without any node tree.
//! Local proposals show up immediately and are confirmed or discarded as a
//! whole once the server answers.

use canopy_common::Restartable;
use canopy_storage::LayeredCache;
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct RoomSettings {
    cache: LayeredCache<String, Value>,
}

impl RoomSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings already confirmed by the server
    pub fn from_confirmed(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            cache: LayeredCache::from_base(entries),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.cache.get(key)
    }

    pub fn confirmed(&self, key: &str) -> Option<&Value> {
        self.cache.get_base(key)
    }

    /// Set a value locally, pending confirmation
    pub fn propose(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        debug!(key = %key, "Proposed setting");
        self.cache.set(key, value.into());
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.cache.delete(key.to_string())
    }

    pub fn has_unconfirmed(&self) -> bool {
        self.cache.has_pending_writes()
    }

    /// The server accepted every proposal
    pub fn confirm(&mut self) {
        self.cache.commit_layer();
    }

    /// The server refused; fall back to the confirmed values
    pub fn discard(&mut self) {
        self.cache.rollback_layer();
    }

    /// The server sent a fresh copy of all settings
    pub fn replace_confirmed(&mut self, entries: impl IntoIterator<Item = (String, Value)>) {
        self.cache.replace_base(entries);
    }

    pub fn keys(&self) -> Vec<&str> {
        self.cache.keys().restart().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .cache
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }
}
