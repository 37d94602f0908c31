//! External collaborator seams: entity identities, positions and locations.
//!
//! The index never owns entity content. It references entities by id and asks an
//! [`EntityStore`] for positions; in return it reports which keys an entity occupies.

use nalgebra as na;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::key::TmKey;

/// Opaque entity identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Monotonic unique id source.
#[derive(Debug, Default)]
pub struct EntityIdGen {
    next: AtomicU64,
}

impl EntityIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> EntityId {
        EntityId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// What the core needs from the entity manager.
pub trait EntityStore {
    /// Position of an entity, if known.
    fn position(&self, id: EntityId) -> Option<na::Point3<f64>>;

    /// Records that `id` now occupies the cell of `key`.
    fn add_location(&mut self, id: EntityId, key: TmKey);

    /// Records that `id` left the cell of `key`.
    fn remove_location(&mut self, id: EntityId, key: TmKey);

    /// Keys currently occupied by `id`.
    fn locations(&self, id: EntityId) -> &[TmKey];
}

/// A FxHashMap-backed entity manager, sufficient for tests and single-process use.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    positions: FxHashMap<EntityId, na::Point3<f64>>,
    locations: FxHashMap<EntityId, SmallVec<[TmKey; 1]>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position(&mut self, id: EntityId, p: na::Point3<f64>) {
        self.positions.insert(id, p);
    }

    pub fn forget(&mut self, id: EntityId) {
        self.positions.remove(&id);
        self.locations.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl EntityStore for InMemoryEntityStore {
    fn position(&self, id: EntityId) -> Option<na::Point3<f64>> {
        self.positions.get(&id).copied()
    }

    fn add_location(&mut self, id: EntityId, key: TmKey) {
        let keys = self.locations.entry(id).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    fn remove_location(&mut self, id: EntityId, key: TmKey) {
        if let Some(keys) = self.locations.get_mut(&id) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.locations.remove(&id);
            }
        }
    }

    fn locations(&self, id: EntityId) -> &[TmKey] {
        self.locations.get(&id).map_or(&[], |keys| keys.as_slice())
    }
}
