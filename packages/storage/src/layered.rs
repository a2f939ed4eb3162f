//! # Layered Cache
//!
//! A key/value view split into two tiers:
//!
//! ```text
//!   reads ──► overlay (optimistic writes + tombstones)
//!                │ miss
//!                ▼
//!             base (last state confirmed by the server)
//! ```
//!
//! Writes only ever touch the overlay. The overlay is cleared in exactly two
//! ways: [`commit_layer`](LayeredCache::commit_layer) folds it into the base,
//! [`rollback_layer`](LayeredCache::rollback_layer) throws it away. There is no
//! partial commit; callers that need one rebuild the overlay by replay.

use canopy_common::{chain, source, Restartable};
use indexmap::IndexMap;
use std::borrow::Borrow;
use std::hash::Hash;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
enum Slot<V> {
    Value(V),
    Tombstone,
}

/// Base layer plus optimistic overlay
#[derive(Debug, Clone)]
pub struct LayeredCache<K, V> {
    base: IndexMap<K, V>,
    overlay: IndexMap<K, Slot<V>>,
}

impl<K: Hash + Eq, V> LayeredCache<K, V> {
    pub fn new() -> Self {
        Self {
            base: IndexMap::new(),
            overlay: IndexMap::new(),
        }
    }

    /// Create a cache whose base holds `entries` and whose overlay is empty
    pub fn from_base(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            base: entries.into_iter().collect(),
            overlay: IndexMap::new(),
        }
    }

    /// Visible value: overlay first, then base unless tombstoned
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.overlay.get(key) {
            Some(Slot::Value(v)) => Some(v),
            Some(Slot::Tombstone) => None,
            None => self.base.get(key),
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Confirmed value, ignoring the overlay
    pub fn get_base<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.base.get(key)
    }

    pub fn set(&mut self, key: K, value: V) {
        self.overlay.insert(key, Slot::Value(value));
    }

    /// Hide `key`. Returns whether a value was visible before the call.
    pub fn delete(&mut self, key: K) -> bool {
        let was_visible = self.contains_key(&key);
        if self.base.contains_key(&key) {
            self.overlay.insert(key, Slot::Tombstone);
        } else {
            self.overlay.shift_remove(&key);
        }
        was_visible
    }

    /// Merged key view: base keys minus tombstones, then keys only the
    /// overlay knows about, each in insertion order.
    pub fn keys(&self) -> impl Restartable<Item = &K> + '_ {
        let overlay = &self.overlay;
        let base = &self.base;
        chain(
            source(
                base.keys()
                    .filter(move |k| !matches!(overlay.get(*k), Some(Slot::Tombstone))),
            ),
            source(
                overlay
                    .iter()
                    .filter(move |(k, slot)| {
                        matches!(slot, Slot::Value(_)) && !base.contains_key(*k)
                    })
                    .map(|(k, _)| k),
            ),
        )
    }

    /// Merged entries in the same order as [`keys`](Self::keys)
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let overlay = &self.overlay;
        let base = &self.base;
        base.iter()
            .filter_map(move |(k, v)| match overlay.get(k) {
                Some(Slot::Tombstone) => None,
                Some(Slot::Value(shadow)) => Some((k, shadow)),
                None => Some((k, v)),
            })
            .chain(overlay.iter().filter_map(move |(k, slot)| match slot {
                Slot::Value(v) if !base.contains_key(k) => Some((k, v)),
                _ => None,
            }))
    }

    /// Number of visible keys
    pub fn len(&self) -> usize {
        self.keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.overlay.is_empty()
    }

    /// Number of overlay entries (writes and tombstones)
    pub fn overlay_len(&self) -> usize {
        self.overlay.len()
    }

    /// Fold the overlay into the base and clear it
    pub fn commit_layer(&mut self) {
        trace!(entries = self.overlay.len(), "Committing overlay");
        for (key, slot) in self.overlay.drain(..) {
            match slot {
                Slot::Value(v) => {
                    self.base.insert(key, v);
                }
                Slot::Tombstone => {
                    self.base.shift_remove(&key);
                }
            }
        }
    }

    /// Discard every unconfirmed write
    pub fn rollback_layer(&mut self) {
        trace!(entries = self.overlay.len(), "Rolling back overlay");
        self.overlay.clear();
    }

    /// Replace the base wholesale, dropping the overlay
    pub fn replace_base(&mut self, entries: impl IntoIterator<Item = (K, V)>) {
        self.overlay.clear();
        self.base = entries.into_iter().collect();
    }
}

impl<K: Hash + Eq + Clone, V: Clone> LayeredCache<K, V> {
    /// Mutable access to the visible value, copying it up from the base into
    /// the overlay first if needed. `None` if the key is not visible.
    pub fn make_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.overlay.contains_key(key) {
            let base_value = self.base.get(key)?.clone();
            self.overlay.insert(key.clone(), Slot::Value(base_value));
        }
        match self.overlay.get_mut(key) {
            Some(Slot::Value(v)) => Some(v),
            _ => None,
        }
    }
}

impl<K: Hash + Eq, V> Default for LayeredCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
