//! The sorted key -> node store.
//!
//! A `BTreeMap` keyed by [`TmKey`] gives iteration in curve order for free, which every
//! order-dependent operation (range sub-scans, key streams) relies on. Hash containers
//! never drive iteration here.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::config::TetreeConfig;
use crate::entity::EntityId;
use crate::key::TmKey;
use crate::node::Node;

/// Aggregate storage statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_nodes: usize,
    pub array_nodes: usize,
    pub set_nodes: usize,
    pub total_entities: usize,
    pub capacity: usize,
    pub average_fill_ratio: f64,
}

/// Sorted mapping from keys to membership nodes.
#[derive(Debug)]
pub struct TetreeIndex {
    nodes: BTreeMap<TmKey, Node>,
    config: TetreeConfig,
}

impl TetreeIndex {
    pub fn new(config: TetreeConfig) -> Self {
        crate::connectivity::validate();
        TetreeIndex {
            nodes: BTreeMap::new(),
            config: config.sanitized(),
        }
    }

    #[inline]
    pub fn config(&self) -> &TetreeConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, key: &TmKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: &TmKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    /// Adds an occupant, creating the node lazily. `false` when the id was already
    /// present in that node.
    pub fn add(&mut self, key: TmKey, id: EntityId) -> bool {
        let node = self
            .nodes
            .entry(key)
            .or_insert_with(|| Node::new(&self.config));
        let added = node.add(id);
        if added {
            node.rebalance_storage(&self.config);
        }
        added
    }

    /// Removes an occupant. The node stays allocated; eviction is a separate decision
    /// taken after a balance check.
    pub fn remove(&mut self, key: &TmKey, id: EntityId) -> bool {
        let Some(node) = self.nodes.get_mut(key) else {
            return false;
        };
        let removed = node.remove(id);
        if removed {
            node.rebalance_storage(&self.config);
        }
        removed
    }

    /// Drops the node when it is empty and has no live children. Returns whether it was
    /// evicted.
    pub fn evict_if_empty(&mut self, key: &TmKey) -> bool {
        if let Some(node) = self.nodes.get(key)
            && node.is_empty()
            && !node.has_children()
        {
            self.nodes.remove(key);
            return true;
        }
        false
    }

    pub fn remove_node(&mut self, key: &TmKey) -> Option<Node> {
        self.nodes.remove(key)
    }

    /// All occupied keys in curve order.
    pub fn keys(&self) -> impl Iterator<Item = &TmKey> + '_ {
        self.nodes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TmKey, &Node)> + '_ {
        self.nodes.iter()
    }

    /// Inclusive sub-scan between two keys.
    pub fn sub_map(&self, range: RangeInclusive<TmKey>) -> impl Iterator<Item = (&TmKey, &Node)> {
        self.nodes.range(range)
    }

    /// All occupied keys of one level.
    pub fn level_range(&self, level: u8) -> impl Iterator<Item = (&TmKey, &Node)> {
        self.nodes
            .range(TmKey::level_floor(level)..=TmKey::level_ceil(level))
    }

    /// Occupied keys of the subtree below `key`, taken at `level`. Prefix scan: one
    /// contiguous sub-scan bracketed by the first and last descendant keys.
    pub fn descendants_of(
        &self,
        key: &TmKey,
        level: u8,
    ) -> crate::error::Result<impl Iterator<Item = (&TmKey, &Node)>> {
        let lo = key.first_descendant(level)?;
        let hi = key.last_descendant(level)?;
        Ok(self.nodes.range(lo..=hi))
    }

    /// Marks `child_index` of the parent cell as split out. Creates the parent node if
    /// the split left it empty of occupants.
    pub fn mark_child_present(&mut self, parent: TmKey, child_index: usize) {
        let node = self
            .nodes
            .entry(parent)
            .or_insert_with(|| Node::new(&self.config));
        node.set_child_present(child_index);
    }

    pub fn clear_child_present(&mut self, parent: &TmKey, child_index: usize) {
        if let Some(node) = self.nodes.get_mut(parent) {
            node.clear_child_present(child_index);
        }
    }

    pub fn stats(&self) -> IndexStats {
        let mut stats = IndexStats::default();
        let mut fill_sum = 0.0;
        let mut fill_count = 0usize;
        for node in self.nodes.values() {
            stats.total_nodes += 1;
            stats.total_entities += node.len();
            stats.capacity += node.capacity();
            if node.is_array_form() {
                stats.array_nodes += 1;
                let cap = node.capacity().max(1);
                fill_sum += node.len() as f64 / cap as f64;
                fill_count += 1;
            } else {
                stats.set_nodes += 1;
            }
        }
        stats.average_fill_ratio = if fill_count == 0 {
            1.0
        } else {
            fill_sum / fill_count as f64
        };
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tet::Tet;

    fn key(x: u32, y: u32, z: u32, level: u8, kind: u8) -> TmKey {
        Tet::new_unchecked(x, y, z, level, kind).index()
    }

    #[test]
    fn add_creates_nodes_lazily_and_idempotently() {
        let mut index = TetreeIndex::new(TetreeConfig::default());
        let k = key(0, 0, 0, 3, 1);
        assert!(index.add(k, EntityId(1)));
        assert!(!index.add(k, EntityId(1)));
        assert_eq!(index.len(), 1);
        assert_eq!(index.node(&k).unwrap().len(), 1);
    }

    #[test]
    fn eviction_requires_empty_and_childless() {
        let mut index = TetreeIndex::new(TetreeConfig::default());
        let k = key(0, 0, 0, 3, 1);
        index.add(k, EntityId(1));
        assert!(!index.evict_if_empty(&k));
        index.mark_child_present(k, 2);
        index.remove(&k, EntityId(1));
        assert!(!index.evict_if_empty(&k));
        index.clear_child_present(&k, 2);
        assert!(index.evict_if_empty(&k));
        assert!(index.is_empty());
    }

    #[test]
    fn iteration_is_in_key_order() {
        let mut index = TetreeIndex::new(TetreeConfig::default());
        let h = crate::geometry::cell_len(4);
        for i in 0..8u32 {
            for kind in 0..6 {
                index.add(key(i * h, 0, h, 4, kind), EntityId(u64::from(i * 6) + u64::from(kind)));
            }
        }
        let keys: Vec<TmKey> = index.keys().copied().collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn level_range_filters_by_level() {
        let mut index = TetreeIndex::new(TetreeConfig::default());
        index.add(key(0, 0, 0, 2, 0), EntityId(1));
        index.add(key(0, 0, 0, 3, 0), EntityId(2));
        index.add(key(0, 0, 0, 4, 0), EntityId(3));
        let level3: Vec<_> = index.level_range(3).collect();
        assert_eq!(level3.len(), 1);
        assert_eq!(level3[0].0.level(), 3);
    }

    #[test]
    fn descendant_scan_sees_exactly_the_subtree() {
        let mut index = TetreeIndex::new(TetreeConfig::default());
        let parent = Tet::new_unchecked(0, 0, 0, 4, 1);
        let children = parent.subdivide_all().unwrap();
        for (i, child) in children.iter().enumerate() {
            index.add(child.index(), EntityId(i as u64));
        }
        // An unrelated cell at the same level.
        let stranger = Tet::new_unchecked(0, 0, 0, 5, 4);
        index.add(stranger.index(), EntityId(99));

        let seen: Vec<TmKey> = index
            .descendants_of(&parent.index(), 5)
            .unwrap()
            .map(|(k, _)| *k)
            .collect();
        assert_eq!(seen.len(), 8);
        for child in &children {
            assert!(seen.contains(&child.index()));
        }
    }

    #[test]
    fn stats_count_forms() {
        let config = TetreeConfig {
            array_threshold: 2,
            ..TetreeConfig::default()
        };
        let mut index = TetreeIndex::new(config);
        let a = key(0, 0, 0, 5, 0);
        let b = key(0, 0, 0, 5, 1);
        index.add(a, EntityId(1));
        for i in 0..4 {
            index.add(b, EntityId(10 + i));
        }
        let stats = index.stats();
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.total_entities, 5);
        assert_eq!(stats.array_nodes, 1);
        assert_eq!(stats.set_nodes, 1);
        assert!(stats.capacity >= 5);
        assert!(stats.average_fill_ratio > 0.0);
    }
}
