//! Before/after capture of visible slots.
//!
//! Reconciliation rebuilds the overlay quietly, so the pool's own change
//! events would describe intermediate states. Instead the slots that could
//! have moved are captured before and after, and one event is produced per
//! slot whose visible value actually differs.

use canopy_common::NodeId;
use canopy_storage::{ChangeEvent, ChildKey, Footprint, Lson, Pool};
use indexmap::IndexMap;

#[derive(Debug, Default)]
pub struct VisibleSlots {
    slots: IndexMap<(NodeId, ChildKey), Option<Lson>>,
}

impl VisibleSlots {
    /// Record the current value of every slot under `footprints`
    pub fn capture<'a>(pool: &Pool, footprints: impl IntoIterator<Item = &'a Footprint>) -> Self {
        let mut slots = IndexMap::new();
        for footprint in footprints {
            capture_one(pool, footprint, &mut slots);
        }
        Self { slots }
    }

    /// Every slot of every attached node
    pub fn capture_all(pool: &Pool) -> Self {
        let footprints: Vec<Footprint> = pool.records().map(|r| Footprint::Node(r.id)).collect();
        Self::capture(pool, &footprints)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Events for slots that differ between `self` and `after`. Slots of
    /// nodes no longer attached are left out; their parent slot reports the
    /// change.
    pub fn diff(self, after: &VisibleSlots, pool: &Pool) -> Vec<ChangeEvent> {
        let mut keys: Vec<&(NodeId, ChildKey)> = self.slots.keys().collect();
        keys.extend(after.slots.keys().filter(|k| !self.slots.contains_key(*k)));

        let mut events = Vec::new();
        for key in keys {
            let old = self.slots.get(key).cloned().flatten();
            let new = after.slots.get(key).cloned().flatten();
            if old == new || !pool.is_attached(key.0) {
                continue;
            }
            let mut path = pool.path_of(key.0).unwrap_or_default();
            path.push(key.1.clone());
            events.push(ChangeEvent {
                node: key.0,
                key: key.1.clone(),
                path,
                old,
                new,
            });
        }
        events
    }
}

fn capture_one(
    pool: &Pool,
    footprint: &Footprint,
    slots: &mut IndexMap<(NodeId, ChildKey), Option<Lson>>,
) {
    match footprint {
        Footprint::Slot(node, key) => {
            let value = pool.get_child(*node, key).ok().flatten().cloned();
            slots.entry((*node, key.clone())).or_insert(value);
        }
        Footprint::Node(node) => {
            if let Ok(record) = pool.get_node(*node) {
                for (key, value) in record.body.entries() {
                    slots.entry((*node, key)).or_insert_with(|| Some(value.clone()));
                }
            }
        }
    }
}
