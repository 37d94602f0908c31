//! Occupancy-driven refinement and coarsening of index nodes.
//!
//! The balancer only decides and executes; thresholds come from the configuration and
//! entity positions from the entity store. Structural operations either complete with
//! all invariants intact or leave the index unchanged.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::connectivity::TYPE_CID_TO_LOCAL_INDEX;
use crate::entity::{EntityId, EntityStore};
use crate::error::{Result, TetreeError};
use crate::index::TetreeIndex;
use crate::key::TmKey;
use crate::tet::Tet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceAction {
    Split,
    Merge,
    None,
}

/// Decides what, if anything, to do with the node of `key`.
pub fn check_node_balance(index: &TetreeIndex, key: &TmKey) -> BalanceAction {
    let Some(node) = index.node(key) else {
        return BalanceAction::None;
    };
    let config = index.config();
    if node.len() > config.max_entities_per_node && key.level() < config.max_depth {
        return BalanceAction::Split;
    }
    if key.level() > 0
        && !node.has_children()
        && let Ok(siblings) = sibling_keys(key)
    {
        // Merge when the whole sibling family fits comfortably in the parent.
        let family: usize = siblings
            .iter()
            .filter_map(|k| index.node(k))
            .map(crate::node::Node::len)
            .sum();
        if family > 0 && family <= config.max_entities_per_node / 2 {
            return BalanceAction::Merge;
        }
    }
    BalanceAction::None
}

/// The eight keys of the sibling family containing `key` (including itself).
///
/// The root key has no parent and therefore no sibling family; that case is an
/// `InvalidKey` error, not a panic.
pub fn sibling_keys(key: &TmKey) -> Result<[TmKey; 8]> {
    let parent = key.parent().ok_or(TetreeError::InvalidKey {
        level: key.level(),
        reason: "the root key has no sibling family",
    })?;
    let mut out = [TmKey::ROOT; 8];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = parent.child(i)?;
    }
    Ok(out)
}

/// TM child index of `tet` within its parent.
fn local_index(tet: &Tet) -> usize {
    TYPE_CID_TO_LOCAL_INDEX[tet.kind() as usize][tet.cube_id(tet.level()) as usize] as usize
}

/// Splits the node of `key`, redistributing its occupants to the children containing
/// their positions.
///
/// Aborts with `StructuralConflict` when every occupant would land in the same child
/// (the split would not reduce occupancy). Returns the keys of the children that
/// received entities.
pub fn split_node<S: EntityStore>(
    index: &mut TetreeIndex,
    store: &mut S,
    key: &TmKey,
) -> Result<Vec<TmKey>> {
    let tet = key.decode();
    if tet.level() >= index.config().max_depth {
        return Err(TetreeError::MaxLevelExceeded);
    }
    let node = index.node(key).ok_or(TetreeError::NotFound)?;
    let ids: Vec<EntityId> = node.iter().collect();
    let children = tet.subdivide_all()?;

    // Assign each occupant to the first child containing its position; ids without a
    // known position stay put.
    let mut assignment: FxHashMap<usize, SmallVec<[EntityId; 4]>> = FxHashMap::default();
    let mut movable = 0usize;
    for &id in &ids {
        let Some(pos) = store.position(id) else {
            continue;
        };
        if let Some(slot) = children.iter().position(|c| c.contains(&pos)) {
            assignment.entry(slot).or_default().push(id);
            movable += 1;
        }
    }
    if movable > 0 && assignment.len() == 1 && movable == ids.len() {
        return Err(TetreeError::StructuralConflict(
            "all occupants fall into a single child",
        ));
    }
    if movable == 0 {
        return Err(TetreeError::StructuralConflict(
            "no occupant has a known position",
        ));
    }

    let mut touched = Vec::with_capacity(assignment.len());
    for (slot, ids) in assignment {
        let child_key = children[slot].index();
        for id in ids {
            index.add(child_key, id);
            store.add_location(id, child_key);
            index.remove(key, id);
            store.remove_location(id, *key);
        }
        index.mark_child_present(*key, slot);
        touched.push(child_key);
    }
    touched.sort_unstable();
    Ok(touched)
}

/// Collects the occupants of a sibling family into the parent node and drops the
/// siblings.
///
/// Every key must actually be a child of `parent`, otherwise `StructuralConflict` is
/// raised and nothing changes.
pub fn merge_nodes<S: EntityStore>(
    index: &mut TetreeIndex,
    store: &mut S,
    siblings: &[TmKey],
    parent: &TmKey,
) -> Result<bool> {
    let parent_tet = parent.decode();
    for key in siblings {
        let tet = key.decode();
        if tet.parent() != Some(parent_tet) {
            return Err(TetreeError::StructuralConflict(
                "merge requested on a non-sibling set",
            ));
        }
    }
    let mut moved_any = false;
    for key in siblings {
        let Some(node) = index.remove_node(key) else {
            continue;
        };
        let slot = local_index(&key.decode());
        index.clear_child_present(parent, slot);
        for id in node.iter() {
            index.add(*parent, id);
            store.add_location(id, *parent);
            store.remove_location(id, *key);
            moved_any = true;
        }
    }
    Ok(moved_any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TetreeConfig;
    use crate::entity::InMemoryEntityStore;
    use nalgebra as na;

    fn setup(max_entities: usize) -> (TetreeIndex, InMemoryEntityStore) {
        let config = TetreeConfig {
            max_entities_per_node: max_entities,
            max_depth: 20,
            ..TetreeConfig::default()
        };
        (TetreeIndex::new(config), InMemoryEntityStore::new())
    }

    fn seed_cell(
        index: &mut TetreeIndex,
        store: &mut InMemoryEntityStore,
        tet: &Tet,
        positions: &[na::Point3<f64>],
    ) -> TmKey {
        let key = tet.index();
        for (i, p) in positions.iter().enumerate() {
            let id = EntityId(i as u64);
            store.set_position(id, *p);
            index.add(key, id);
            store.add_location(id, key);
        }
        key
    }

    #[test]
    fn overfull_leaf_wants_a_split() {
        let (mut index, mut store) = setup(4);
        let tet = Tet::new_unchecked(0, 0, 0, 10, 0);
        let h = f64::from(tet.edge_len());
        let positions: Vec<na::Point3<f64>> = (0..5)
            .map(|i| {
                let s = h * (0.2 + 0.12 * i as f64);
                na::Point3::new(s, s * 0.3, s * 0.6)
            })
            .collect();
        let key = seed_cell(&mut index, &mut store, &tet, &positions);
        assert_eq!(check_node_balance(&index, &key), BalanceAction::Split);

        let children = split_node(&mut index, &mut store, &key).unwrap();
        assert!(children.len() >= 2, "expected a spread over children");
        assert!(index.node(&key).unwrap().has_children());
        assert!(index.node(&key).unwrap().is_empty());
        for (i, p) in positions.iter().enumerate() {
            let id = EntityId(i as u64);
            let keys = store.locations(id);
            assert_eq!(keys.len(), 1);
            assert!(children.contains(&keys[0]));
            assert!(index.node(&keys[0]).unwrap().contains(id));
            assert!(keys[0].decode().contains(p));
        }
    }

    #[test]
    fn clustered_occupants_abort_the_split() {
        let (mut index, mut store) = setup(2);
        let tet = Tet::new_unchecked(0, 0, 0, 10, 0);
        let h = f64::from(tet.edge_len());
        // All in one tight cluster near the anchor: same child for everyone.
        let positions: Vec<na::Point3<f64>> = (0..4)
            .map(|i| na::Point3::new(h * 0.05 + i as f64 * 1e-4, h * 0.01, h * 0.02))
            .collect();
        let key = seed_cell(&mut index, &mut store, &tet, &positions);
        let err = split_node(&mut index, &mut store, &key).unwrap_err();
        assert!(matches!(err, TetreeError::StructuralConflict(_)));
        // Index unchanged.
        assert_eq!(index.node(&key).unwrap().len(), 4);
        assert!(!index.node(&key).unwrap().has_children());
    }

    #[test]
    fn sparse_family_wants_a_merge_and_merges() {
        let (mut index, mut store) = setup(16);
        let parent = Tet::new_unchecked(0, 0, 0, 9, 0);
        let children = parent.subdivide_all().unwrap();
        let mut keys = Vec::new();
        for (i, child) in children.iter().enumerate().take(3) {
            let id = EntityId(100 + i as u64);
            let key = child.index();
            store.set_position(id, na::Point3::new(1.0, 1.0, 1.0));
            index.add(key, id);
            store.add_location(id, key);
            keys.push(key);
        }
        assert_eq!(check_node_balance(&index, &keys[0]), BalanceAction::Merge);

        let parent_key = parent.index();
        let all: Vec<TmKey> = children.iter().map(Tet::index).collect();
        assert!(merge_nodes(&mut index, &mut store, &all, &parent_key).unwrap());
        assert_eq!(index.node(&parent_key).unwrap().len(), 3);
        for key in keys {
            assert!(index.node(&key).is_none());
        }
    }

    #[test]
    fn root_key_has_no_sibling_family() {
        assert!(matches!(
            sibling_keys(&TmKey::ROOT),
            Err(TetreeError::InvalidKey { .. })
        ));
        let child = TmKey::ROOT.child(0).unwrap();
        assert!(sibling_keys(&child).is_ok());
    }

    #[test]
    fn non_siblings_cannot_merge() {
        let (mut index, mut store) = setup(16);
        let parent = Tet::new_unchecked(0, 0, 0, 9, 0).index();
        let stranger = Tet::new_unchecked(0, 0, 0, 10, 1).index();
        let err = merge_nodes(&mut index, &mut store, &[stranger], &parent).unwrap_err();
        assert!(matches!(err, TetreeError::StructuralConflict(_)));
    }
}
