//! Spatial query algorithms over the store: point location, region enumeration,
//! best-first k-nearest-neighbour search and enclosing-cell lookup.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use nalgebra as na;
use rstar::AABB;
use rustc_hash::FxHashSet;

use crate::connectivity::{DOMAIN_LEN, MAX_LEVEL};
use crate::entity::{EntityId, EntityStore};
use crate::error::{Result, TetreeError};
use crate::geometry::{cell_len, check_domain_f64, locate_kind};
use crate::index::TetreeIndex;
use crate::intersect::{tet_contained_in_aabb, tet_intersects_aabb};
use crate::key::TmKey;
use crate::ranges::{cached_sfc_ranges, cube_aabb, level_band};
use crate::tet::Tet;

/// How a region query decides whether a cell's contents qualify.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RegionPredicate {
    /// The cell overlaps the query box.
    #[default]
    Intersects,
    /// The cell lies entirely inside the query box.
    Contains,
}

impl RegionPredicate {
    fn matches(self, tet: &Tet, aabb: &AABB<[f64; 3]>) -> bool {
        match self {
            RegionPredicate::Intersects => tet_intersects_aabb(tet, aabb),
            RegionPredicate::Contains => tet_contained_in_aabb(tet, aabb),
        }
    }
}

/// The tetrahedron of `level` containing the point: two to three plane-side decisions
/// inside the point's cube.
pub fn locate(p: &na::Point3<f64>, level: u8) -> Result<Tet> {
    if level > MAX_LEVEL {
        return Err(TetreeError::InvalidLevel {
            level: u32::from(level),
            max: MAX_LEVEL,
        });
    }
    check_domain_f64(p)?;
    let h = f64::from(cell_len(level));
    let ax = (p.x / h).floor() * h;
    let ay = (p.y / h).floor() * h;
    let az = (p.z / h).floor() * h;
    let kind = locate_kind(p.x - ax, p.y - ay, p.z - az);
    Ok(Tet::new_unchecked(
        ax as u32, ay as u32, az as u32, level, kind,
    ))
}

/// Ids of all entities whose cell matches the box under `predicate`, deduplicated and
/// sorted.
///
/// Occupied levels inside the query's level band are reached through fused SFC
/// sub-scans; occupied levels outside the band fall back to a sweep of that level's
/// keys, so the result is exact regardless of where occupants live.
pub fn entities_in_region(
    index: &TetreeIndex,
    aabb: &AABB<[f64; 3]>,
    predicate: RegionPredicate,
) -> Vec<EntityId> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    let mut harvest = |tet: &Tet, node: &crate::node::Node| {
        if predicate.matches(tet, aabb) {
            for id in node.iter() {
                if seen.insert(id) {
                    out.push(id);
                }
            }
        }
    };

    let (band_lo, band_hi) = level_band(aabb);
    for range in cached_sfc_ranges(aabb) {
        for (key, node) in index.sub_map(range.start..=range.end) {
            harvest(&key.cached_decode(), node);
        }
    }
    for level in 0..=MAX_LEVEL {
        if level >= band_lo && level <= band_hi {
            continue;
        }
        for (key, node) in index.level_range(level) {
            harvest(&key.cached_decode(), node);
        }
    }
    out.sort_unstable();
    out
}

/// Max-heap entry: the worst kept neighbour sits on top.
#[derive(Debug, PartialEq)]
struct Kept {
    dist: f64,
    id: EntityId,
}

impl Eq for Kept {}

impl Ord for Kept {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Kept {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap entry of the frontier: cubes keyed by their conservative distance bound.
#[derive(Debug, PartialEq)]
struct Frontier {
    bound: f64,
    anchor: [u32; 3],
    level: u8,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bound
            .total_cmp(&other.bound)
            .then(self.anchor.cmp(&other.anchor))
            .then(self.level.cmp(&other.level))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn cube_lower_bound(anchor: [u32; 3], level: u8, p: &na::Point3<f64>) -> f64 {
    let aabb = cube_aabb(anchor, level);
    let l = aabb.lower();
    let u = aabb.upper();
    let q = [p.x, p.y, p.z];
    let mut acc = 0.0;
    for a in 0..3 {
        let d = if q[a] < l[a] {
            l[a] - q[a]
        } else if q[a] > u[a] {
            q[a] - u[a]
        } else {
            0.0
        };
        acc += d * d;
    }
    acc.sqrt()
}

/// Safety valve against unbounded expansion over sparse space.
const KNN_VISIT_CAP: usize = 1 << 16;

/// The `k` nearest entities within `max_distance`, sorted by ascending distance.
///
/// Best-first expansion: the frontier holds cube cells ordered by a conservative lower
/// bound on their distance, seeded with the query's cube at every occupied level.
/// Expansion stops once the k-th kept distance undercuts the nearest frontier bound.
pub fn k_nearest<S: EntityStore>(
    index: &TetreeIndex,
    store: &S,
    query: &na::Point3<f64>,
    k: usize,
    max_distance: f64,
) -> Vec<EntityId> {
    if k == 0 || index.is_empty() {
        return Vec::new();
    }
    let occupied_levels: Vec<u8> = (0..=MAX_LEVEL)
        .filter(|&l| index.level_range(l).next().is_some())
        .collect();

    let mut kept: BinaryHeap<Kept> = BinaryHeap::new();
    let mut frontier: BinaryHeap<Reverse<Frontier>> = BinaryHeap::new();
    let mut visited: FxHashSet<([u32; 3], u8)> = FxHashSet::default();

    for &level in &occupied_levels {
        let h = f64::from(cell_len(level));
        let clamp = |c: f64| (c.max(0.0).min(f64::from(DOMAIN_LEN) - 1.0) / h).floor() * h;
        let anchor = [clamp(query.x) as u32, clamp(query.y) as u32, clamp(query.z) as u32];
        frontier.push(Reverse(Frontier {
            bound: 0.0,
            anchor,
            level,
        }));
    }

    while let Some(Reverse(cell)) = frontier.pop() {
        if cell.bound > max_distance {
            break;
        }
        if kept.len() == k && cell.bound >= kept.peek().expect("non-empty heap").dist {
            break;
        }
        if !visited.insert((cell.anchor, cell.level)) {
            continue;
        }
        if visited.len() > KNN_VISIT_CAP {
            break;
        }
        // Harvest the six tetrahedra of this cube.
        for kind in 0..6 {
            let key =
                Tet::new_unchecked(cell.anchor[0], cell.anchor[1], cell.anchor[2], cell.level, kind)
                    .index();
            let Some(node) = index.node(&key) else {
                continue;
            };
            for id in node.iter() {
                let Some(pos) = store.position(id) else {
                    continue;
                };
                let dist = na::distance(query, &pos);
                if dist > max_distance {
                    continue;
                }
                if kept.len() < k {
                    kept.push(Kept { dist, id });
                } else if dist < kept.peek().expect("non-empty heap").dist {
                    kept.pop();
                    kept.push(Kept { dist, id });
                }
            }
        }
        // Expand to the 26 surrounding cubes of the grid at this level.
        let h = cell_len(cell.level);
        for dz in -1i64..=1 {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    let nx = i64::from(cell.anchor[0]) + dx * i64::from(h);
                    let ny = i64::from(cell.anchor[1]) + dy * i64::from(h);
                    let nz = i64::from(cell.anchor[2]) + dz * i64::from(h);
                    if nx < 0
                        || ny < 0
                        || nz < 0
                        || nx >= i64::from(DOMAIN_LEN)
                        || ny >= i64::from(DOMAIN_LEN)
                        || nz >= i64::from(DOMAIN_LEN)
                    {
                        continue;
                    }
                    let anchor = [nx as u32, ny as u32, nz as u32];
                    if visited.contains(&(anchor, cell.level)) {
                        continue;
                    }
                    let bound = cube_lower_bound(anchor, cell.level, query);
                    if bound > max_distance {
                        continue;
                    }
                    if kept.len() == k && bound >= kept.peek().expect("non-empty heap").dist {
                        continue;
                    }
                    frontier.push(Reverse(Frontier {
                        bound,
                        anchor,
                        level: cell.level,
                    }));
                }
            }
        }
    }

    let mut result: Vec<Kept> = kept.into_vec();
    result.sort_unstable();
    result.into_iter().map(|kept| kept.id).collect()
}

/// The occupied cell enclosing the point, searching upward from `level`.
pub fn enclosing_point(
    index: &TetreeIndex,
    p: &na::Point3<f64>,
    level: u8,
) -> Result<Option<(TmKey, Vec<EntityId>)>> {
    let mut tet = locate(p, level)?;
    loop {
        let key = tet.index();
        if let Some(node) = index.node(&key) {
            return Ok(Some((key, node.as_sorted_vec())));
        }
        match tet.parent() {
            Some(parent) => tet = parent,
            None => return Ok(None),
        }
    }
}

/// The occupied cell enclosing the whole box, searching upward from the deepest cell
/// (at most `level`) that can contain it.
pub fn enclosing_volume(
    index: &TetreeIndex,
    aabb: &AABB<[f64; 3]>,
    level: u8,
) -> Result<Option<(TmKey, Vec<EntityId>)>> {
    let lower = aabb.lower();
    let upper = aabb.upper();
    let center = na::Point3::new(
        f64::midpoint(lower[0], upper[0]),
        f64::midpoint(lower[1], upper[1]),
        f64::midpoint(lower[2], upper[2]),
    );
    let mut tet = locate(&center, level)?;
    loop {
        let covers = tet_contained_in_aabb_inverse(&tet, aabb);
        if covers {
            let key = tet.index();
            if let Some(node) = index.node(&key) {
                return Ok(Some((key, node.as_sorted_vec())));
            }
        }
        match tet.parent() {
            Some(parent) => tet = parent,
            None => return Ok(None),
        }
    }
}

/// Whether the box lies entirely inside the tetrahedron.
fn tet_contained_in_aabb_inverse(tet: &Tet, aabb: &AABB<[f64; 3]>) -> bool {
    let l = aabb.lower();
    let u = aabb.upper();
    (0..8).all(|i| {
        let corner = na::Point3::new(
            if i & 1 == 0 { l[0] } else { u[0] },
            if i & 2 == 0 { l[1] } else { u[1] },
            if i & 4 == 0 { l[2] } else { u[2] },
        );
        tet.contains(&corner)
    })
}
