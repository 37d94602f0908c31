//! The public facade: a tetrahedral spatial index bound to an entity store.
//!
//! All mutation flows through here so the balancer and the entity-location map stay
//! consistent with the node store. The facade is lock-free by design: callers serialize
//! writers and may share readers, matching `&self` / `&mut self`.

use nalgebra as na;
use rstar::AABB;

use crate::balance::{self, BalanceAction};
use crate::config::{SpanningPolicy, TetreeConfig};
use crate::entity::{EntityId, EntityStore, InMemoryEntityStore};
use crate::error::Result;
use crate::index::{IndexStats, TetreeIndex};
use crate::intersect::tet_intersects_aabb;
use crate::key::TmKey;
use crate::neighbours;
use crate::ranges::level_band;
use crate::search::{self, RegionPredicate};
use crate::tet::Tet;

/// A tetrahedral spatial index over entities managed by `S`.
#[derive(Debug)]
pub struct Tetree<S: EntityStore> {
    index: TetreeIndex,
    store: S,
}

impl Tetree<InMemoryEntityStore> {
    /// An index with the in-memory entity store.
    pub fn new(config: TetreeConfig) -> Self {
        Self::with_store(config, InMemoryEntityStore::new())
    }
}

impl<S: EntityStore> Tetree<S> {
    pub fn with_store(config: TetreeConfig, store: S) -> Self {
        Tetree {
            index: TetreeIndex::new(config),
            store,
        }
    }

    pub fn config(&self) -> &TetreeConfig {
        self.index.config()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn index(&self) -> &TetreeIndex {
        &self.index
    }

    /// The tetrahedron of `level` containing `p`.
    pub fn locate(&self, p: &na::Point3<f64>, level: u8) -> Result<Tet> {
        search::locate(p, level)
    }

    /// Inserts an entity at a point. `level` defaults to the configured maximum depth.
    /// Re-inserting an id into the cell it already occupies is a no-op.
    pub fn insert(&mut self, p: &na::Point3<f64>, id: EntityId, level: Option<u8>) -> Result<()> {
        let level = level.unwrap_or(self.index.config().max_depth);
        let key = search::locate(p, level)?.index();
        if self.index.add(key, id) {
            self.store.add_location(id, key);
        }
        if let BalanceAction::Split = balance::check_node_balance(&self.index, &key) {
            // A refusal to split (all occupants in one child) falls back to doing
            // nothing, per the balancer contract.
            let _ = balance::split_node(&mut self.index, &mut self.store, &key);
        }
        Ok(())
    }

    /// Inserts a bounded entity according to the spanning policy.
    pub fn insert_bounded(
        &mut self,
        bounds: &AABB<[f64; 3]>,
        id: EntityId,
        level: Option<u8>,
    ) -> Result<()> {
        let level = level.unwrap_or(self.index.config().max_depth);
        match self.index.config().spanning_policy {
            SpanningPolicy::AnchorCell => {
                let lower = bounds.lower();
                let upper = bounds.upper();
                let center = na::Point3::new(
                    f64::midpoint(lower[0], upper[0]),
                    f64::midpoint(lower[1], upper[1]),
                    f64::midpoint(lower[2], upper[2]),
                );
                self.insert(&center, id, Some(level))
            }
            SpanningPolicy::SpanCells => {
                // Clamping into the query's level band keeps the cube fan bounded.
                let (lo, hi) = level_band(bounds);
                let level = level.clamp(lo, hi);
                for anchor in crate::ranges::cubes_at_level(bounds, level) {
                    for kind in 0..6 {
                        let tet =
                            Tet::new_unchecked(anchor[0], anchor[1], anchor[2], level, kind);
                        if tet_intersects_aabb(&tet, bounds) {
                            let key = tet.index();
                            if self.index.add(key, id) {
                                self.store.add_location(id, key);
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Removes an entity from every cell it occupies. `false` when it was nowhere.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let keys: Vec<TmKey> = self.store.locations(id).to_vec();
        if keys.is_empty() {
            return false;
        }
        for key in keys {
            self.index.remove(&key, id);
            self.store.remove_location(id, key);
            if let BalanceAction::Merge = balance::check_node_balance(&self.index, &key)
                && let Some(parent) = key.parent()
                && let Ok(family) = balance::sibling_keys(&key)
            {
                let siblings: Vec<TmKey> = family
                    .into_iter()
                    .filter(|k| self.index.node(k).is_some())
                    .collect();
                let _ = balance::merge_nodes(&mut self.index, &mut self.store, &siblings, &parent);
            }
            self.index.evict_if_empty(&key);
        }
        true
    }

    /// Ids occupying the cell of `p` at `level`, sorted.
    pub fn lookup(&self, p: &na::Point3<f64>, level: u8) -> Result<Vec<EntityId>> {
        let key = search::locate(p, level)?.index();
        Ok(self
            .index
            .node(&key)
            .map(crate::node::Node::as_sorted_vec)
            .unwrap_or_default())
    }

    /// Deduplicated ids of entities whose cell intersects the box.
    pub fn entities_in_region(&self, aabb: &AABB<[f64; 3]>) -> Vec<EntityId> {
        search::entities_in_region(&self.index, aabb, RegionPredicate::Intersects)
    }

    /// Region query with an explicit cell predicate.
    pub fn entities_in_region_with(
        &self,
        aabb: &AABB<[f64; 3]>,
        predicate: RegionPredicate,
    ) -> Vec<EntityId> {
        search::entities_in_region(&self.index, aabb, predicate)
    }

    /// The `k` nearest entities within `max_distance`, ascending by distance.
    pub fn k_nearest_neighbors(
        &self,
        p: &na::Point3<f64>,
        k: usize,
        max_distance: f64,
    ) -> Vec<EntityId> {
        search::k_nearest(&self.index, &self.store, p, k, max_distance)
    }

    /// The occupied cell enclosing a point, searched upward from `level`.
    pub fn enclosing(
        &self,
        p: &na::Point3<f64>,
        level: u8,
    ) -> Result<Option<(TmKey, Vec<EntityId>)>> {
        search::enclosing_point(&self.index, p, level)
    }

    /// The occupied cell enclosing a whole volume.
    pub fn enclosing_volume(
        &self,
        aabb: &AABB<[f64; 3]>,
        level: u8,
    ) -> Result<Option<(TmKey, Vec<EntityId>)>> {
        search::enclosing_volume(&self.index, aabb, level)
    }

    /// All occupied keys in curve order.
    pub fn key_stream(&self) -> impl Iterator<Item = TmKey> + '_ {
        self.index.keys().copied()
    }

    /// Same-level face neighbour of the cell of `key`.
    pub fn face_neighbor(&self, key: &TmKey, face: usize) -> Result<Option<(TmKey, u8)>> {
        Ok(key
            .decode()
            .face_neighbour(face)?
            .map(|(tet, back)| (tet.index(), back)))
    }

    /// Same-level edge neighbours of the cell of `key`.
    pub fn edge_neighbors(&self, key: &TmKey, edge: usize) -> Result<Vec<TmKey>> {
        Ok(neighbours::edge_neighbours(&key.decode(), edge)?
            .iter()
            .map(Tet::index)
            .collect())
    }

    /// Same-level vertex neighbours of the cell of `key`.
    pub fn vertex_neighbors(&self, key: &TmKey, vertex: usize) -> Result<Vec<TmKey>> {
        Ok(neighbours::vertex_neighbours(&key.decode(), vertex)?
            .iter()
            .map(Tet::index)
            .collect())
    }

    /// The eight child keys of a cell, derived group-append without re-encoding.
    pub fn subdivide(&self, key: &TmKey) -> Result<[TmKey; 8]> {
        let mut out = [TmKey::ROOT; 8];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = key.child(i)?;
        }
        Ok(out)
    }

    /// Splits the node of `key`, redistributing occupants into children.
    pub fn split_node(&mut self, key: &TmKey) -> Result<Vec<TmKey>> {
        balance::split_node(&mut self.index, &mut self.store, key)
    }

    /// Merges sibling nodes into their parent. `true` when any occupant moved.
    pub fn merge(&mut self, siblings: &[TmKey], parent: &TmKey) -> Result<bool> {
        balance::merge_nodes(&mut self.index, &mut self.store, siblings, parent)
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }
}
