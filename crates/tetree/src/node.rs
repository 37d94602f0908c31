//! Per-cell membership nodes with adaptive storage.
//!
//! A node is a set of entity ids in one of two forms with identical observable
//! semantics: a hash set, or a sorted unique array. Small and churn-heavy nodes stay in
//! the set form; once occupancy reaches the configured threshold the node converts to
//! the compact array form, and converts back when removals drain it. Transitions are
//! explicit constructor calls, never dispatch.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::config::TetreeConfig;
use crate::entity::EntityId;

const ARRAY_INLINE: usize = 8;

#[derive(Clone, Debug)]
pub enum NodeStorage {
    Set(FxHashSet<EntityId>),
    /// Sorted, unique.
    Array(SmallVec<[EntityId; ARRAY_INLINE]>),
}

/// Membership node of a single key. The child-present mask is maintained by the store
/// when the balancer splits the cell.
#[derive(Clone, Debug)]
pub struct Node {
    storage: NodeStorage,
    child_mask: u8,
}

impl Node {
    /// A fresh node in the form the configuration asks for.
    pub fn new(config: &TetreeConfig) -> Self {
        let storage = if config.always_use_array_nodes {
            NodeStorage::Array(SmallVec::with_capacity(config.array_initial_capacity))
        } else {
            NodeStorage::Set(FxHashSet::default())
        };
        Node {
            storage,
            child_mask: 0,
        }
    }

    /// Adds an id; `false` if it was already present.
    pub fn add(&mut self, id: EntityId) -> bool {
        match &mut self.storage {
            NodeStorage::Set(set) => set.insert(id),
            NodeStorage::Array(arr) => match arr.binary_search(&id) {
                Ok(_) => false,
                Err(pos) => {
                    arr.insert(pos, id);
                    true
                }
            },
        }
    }

    /// Removes an id; `false` if it was absent.
    pub fn remove(&mut self, id: EntityId) -> bool {
        match &mut self.storage {
            NodeStorage::Set(set) => set.remove(&id),
            NodeStorage::Array(arr) => match arr.binary_search(&id) {
                Ok(pos) => {
                    arr.remove(pos);
                    true
                }
                Err(_) => false,
            },
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        match &self.storage {
            NodeStorage::Set(set) => set.contains(&id),
            NodeStorage::Array(arr) => arr.binary_search(&id).is_ok(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            NodeStorage::Set(set) => set.len(),
            NodeStorage::Array(arr) => arr.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        match &mut self.storage {
            NodeStorage::Set(set) => set.clear(),
            NodeStorage::Array(arr) => arr.clear(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        let (set, arr) = match &self.storage {
            NodeStorage::Set(set) => (Some(set.iter().copied()), None),
            NodeStorage::Array(arr) => (None, Some(arr.iter().copied())),
        };
        set.into_iter().flatten().chain(arr.into_iter().flatten())
    }

    /// The ids as a sorted vector, independent of the storage form.
    pub fn as_sorted_vec(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.iter().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_array_form(&self) -> bool {
        matches!(self.storage, NodeStorage::Array(_))
    }

    /// Spare capacity of the array form; zero for sets.
    pub fn capacity(&self) -> usize {
        match &self.storage {
            NodeStorage::Set(set) => set.len(),
            NodeStorage::Array(arr) => arr.capacity(),
        }
    }

    /// Applies the configured storage-form switching rules after a mutation.
    pub fn rebalance_storage(&mut self, config: &TetreeConfig) {
        if config.always_use_array_nodes {
            if !self.is_array_form() {
                self.to_array(config.array_initial_capacity);
            }
            self.maybe_compact(config);
            return;
        }
        if !config.use_array_nodes {
            if self.is_array_form() {
                self.to_set();
            }
            return;
        }
        let len = self.len();
        if !self.is_array_form() && len >= config.array_threshold {
            self.to_array(config.array_initial_capacity.max(len));
        } else if self.is_array_form() && len < config.array_threshold / 2 {
            self.to_set();
        }
        self.maybe_compact(config);
    }

    fn maybe_compact(&mut self, config: &TetreeConfig) {
        if !config.enable_node_compaction {
            return;
        }
        if let NodeStorage::Array(arr) = &mut self.storage {
            let cap = arr.capacity().max(1);
            if (arr.len() as f64) / (cap as f64) < config.compaction_threshold {
                arr.shrink_to_fit();
            }
        }
    }

    fn to_array(&mut self, capacity: usize) {
        if let NodeStorage::Set(set) = &mut self.storage {
            let mut arr: SmallVec<[EntityId; ARRAY_INLINE]> =
                SmallVec::with_capacity(capacity.max(set.len()));
            arr.extend(set.drain());
            arr.sort_unstable();
            self.storage = NodeStorage::Array(arr);
        }
    }

    fn to_set(&mut self) {
        if let NodeStorage::Array(arr) = &mut self.storage {
            let set: FxHashSet<EntityId> = arr.drain(..).collect();
            self.storage = NodeStorage::Set(set);
        }
    }

    #[inline]
    pub fn child_mask(&self) -> u8 {
        self.child_mask
    }

    pub fn set_child_present(&mut self, child_index: usize) {
        debug_assert!(child_index < 8);
        self.child_mask |= 1 << child_index;
    }

    pub fn clear_child_present(&mut self, child_index: usize) {
        debug_assert!(child_index < 8);
        self.child_mask &= !(1 << child_index);
    }

    /// Whether the balancer has split this cell.
    #[inline]
    pub fn has_children(&self) -> bool {
        self.child_mask != 0
    }
}
