//! SFC subranges for region queries, and lazy cell-range streams.
//!
//! A region query never walks the whole store: the axis-aligned query box is covered by
//! cubes over a small band of levels, each cube contributes its six tetrahedra as
//! candidate keys, and runs of adjacent keys are fused into inclusive ranges the sorted
//! store can sub-scan directly.

use std::sync::Mutex;

use arrayvec::ArrayVec;
use itertools::Itertools;
use once_cell::sync::Lazy;
use rstar::{AABB, Envelope};
use rustc_hash::FxHashMap;

use crate::connectivity::{DOMAIN_LEN, MAX_LEVEL};
use crate::geometry::cell_len;
use crate::key::TmKey;
use crate::tet::Tet;

/// An inclusive key interval at a single level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SfcRange {
    pub start: TmKey,
    pub end: TmKey,
}

/// The deepest level whose cells are still at least as large as the box's largest
/// extent. Such a cell can overlap the box without being swamped by it.
pub fn optimal_level(aabb: &AABB<[f64; 3]>) -> u8 {
    let lower = aabb.lower();
    let upper = aabb.upper();
    let extent = (upper[0] - lower[0])
        .max(upper[1] - lower[1])
        .max(upper[2] - lower[2])
        .max(0.0);
    let mut level = MAX_LEVEL;
    while level > 0 && f64::from(cell_len(level)) < extent {
        level -= 1;
    }
    level
}

/// The level band a region query scans: one level above the optimal one, three below.
pub fn level_band(aabb: &AABB<[f64; 3]>) -> (u8, u8) {
    let best = optimal_level(aabb);
    (best.saturating_sub(1), MAX_LEVEL.min(best + 3))
}

/// Cube AABB at `anchor` with cell length of `level`.
pub fn cube_aabb(anchor: [u32; 3], level: u8) -> AABB<[f64; 3]> {
    let h = f64::from(cell_len(level));
    let lower = [
        f64::from(anchor[0]),
        f64::from(anchor[1]),
        f64::from(anchor[2]),
    ];
    AABB::from_corners(lower, [lower[0] + h, lower[1] + h, lower[2] + h])
}

/// Anchors of all cubes at `target` level intersecting the box, by hierarchical descent
/// with early rejection of whole branches.
fn covered_cubes(aabb: &AABB<[f64; 3]>, target: u8, out: &mut Vec<[u32; 3]>) {
    fn descend(anchor: [u32; 3], level: u8, target: u8, aabb: &AABB<[f64; 3]>, out: &mut Vec<[u32; 3]>) {
        if !cube_aabb(anchor, level).intersects(aabb) {
            return;
        }
        if level == target {
            out.push(anchor);
            return;
        }
        let h = cell_len(level + 1);
        for cid in 0..8u32 {
            let child = [
                anchor[0] + (cid & 1) * h,
                anchor[1] + ((cid >> 1) & 1) * h,
                anchor[2] + ((cid >> 2) & 1) * h,
            ];
            descend(child, level + 1, target, aabb, out);
        }
    }
    descend([0, 0, 0], 0, target, aabb, out);
}

/// Fuses a sorted key run into inclusive ranges; runs whose neighbour is the immediate
/// curve successor coalesce.
fn fuse(keys: Vec<TmKey>) -> Vec<SfcRange> {
    keys.into_iter()
        .map(|k| SfcRange { start: k, end: k })
        .coalesce(|a, b| match a.end.sfc_successor() {
            Some(next) if next >= b.start => Ok(SfcRange {
                start: a.start,
                end: a.end.max(b.end),
            }),
            _ => Err((a, b)),
        })
        .collect()
}

/// Anchors of all cubes at `level` intersecting the box.
pub(crate) fn cubes_at_level(aabb: &AABB<[f64; 3]>, level: u8) -> Vec<[u32; 3]> {
    let mut cubes = Vec::new();
    covered_cubes(aabb, level, &mut cubes);
    cubes
}

/// The sorted, disjoint, fused SFC ranges covering a query box over its level band.
pub fn compute_sfc_ranges(aabb: &AABB<[f64; 3]>) -> Vec<SfcRange> {
    let (lo, hi) = level_band(aabb);
    let mut ranges = Vec::new();
    let mut cubes = Vec::new();
    for level in lo..=hi {
        cubes.clear();
        covered_cubes(aabb, level, &mut cubes);
        let mut keys: Vec<TmKey> = cubes
            .iter()
            .flat_map(|&anchor| {
                // One fixed-cap batch of candidates per cube, one key per type.
                (0..6)
                    .map(|kind| {
                        Tet::new_unchecked(anchor[0], anchor[1], anchor[2], level, kind).index()
                    })
                    .collect::<ArrayVec<TmKey, 6>>()
            })
            .collect();
        keys.sort_unstable();
        keys.dedup();
        ranges.extend(fuse(keys));
    }
    ranges
}

const RANGE_CACHE_CAP: usize = 128;

static RANGE_CACHE: Lazy<Mutex<FxHashMap<[u64; 6], Vec<SfcRange>>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

/// Cached variant of [`compute_sfc_ranges`]. The cache is bounded and purely advisory.
pub fn cached_sfc_ranges(aabb: &AABB<[f64; 3]>) -> Vec<SfcRange> {
    let lower = aabb.lower();
    let upper = aabb.upper();
    let tag = [
        lower[0].to_bits(),
        lower[1].to_bits(),
        lower[2].to_bits(),
        upper[0].to_bits(),
        upper[1].to_bits(),
        upper[2].to_bits(),
    ];
    if let Ok(cache) = RANGE_CACHE.lock()
        && let Some(hit) = cache.get(&tag)
    {
        return hit.clone();
    }
    let ranges = compute_sfc_ranges(aabb);
    if let Ok(mut cache) = RANGE_CACHE.lock() {
        if cache.len() >= RANGE_CACHE_CAP {
            cache.clear();
        }
        cache.insert(tag, ranges.clone());
    }
    ranges
}

/// A lazy stream of same-level cells between two tetrahedra.
///
/// Advances type 0..5 within a cell, then x+, wrapping into y+ and z+ like a raster
/// scan of the level's cube grid. The stream is sized, fused and immutable; splitting
/// yields two disjoint sub-streams whose union is the original, which the `rayon`
/// feature uses to parallelize consumption.
#[derive(Clone, Debug)]
pub struct TetRange {
    level: u8,
    /// Linear positions: ((z * grid + y) * grid + x) * 6 + kind.
    next: u128,
    last: u128,
    done: bool,
}

impl TetRange {
    /// Stream over `[start, end]`. Both ends must sit at the same level; `start` must
    /// not come after `end` in scan order.
    pub fn new(start: &Tet, end: &Tet) -> Option<Self> {
        if start.level() != end.level() {
            return None;
        }
        let a = Self::position(start);
        let b = Self::position(end);
        if a > b {
            return None;
        }
        Some(TetRange {
            level: start.level(),
            next: a,
            last: b,
            done: false,
        })
    }

    fn grid(level: u8) -> u128 {
        u128::from(DOMAIN_LEN / cell_len(level))
    }

    fn position(tet: &Tet) -> u128 {
        let h = cell_len(tet.level());
        let grid = Self::grid(tet.level());
        let x = u128::from(tet.x() / h);
        let y = u128::from(tet.y() / h);
        let z = u128::from(tet.z() / h);
        ((z * grid + y) * grid + x) * 6 + u128::from(tet.kind())
    }

    fn tet_at(&self, pos: u128) -> Tet {
        let h = cell_len(self.level);
        let grid = Self::grid(self.level);
        let kind = (pos % 6) as u8;
        let cell = pos / 6;
        let x = (cell % grid) as u32 * h;
        let y = ((cell / grid) % grid) as u32 * h;
        let z = (cell / (grid * grid)) as u32 * h;
        Tet::new_unchecked(x, y, z, self.level, kind)
    }

    /// Splits at the midpoint into two disjoint covering halves. `None` when a single
    /// cell remains.
    pub fn split(self) -> (Self, Option<Self>) {
        if self.done || self.next >= self.last {
            return (self, None);
        }
        let mid = self.next + (self.last - self.next) / 2;
        let left = TetRange {
            level: self.level,
            next: self.next,
            last: mid,
            done: false,
        };
        let right = TetRange {
            level: self.level,
            next: mid + 1,
            last: self.last,
            done: false,
        };
        (left, Some(right))
    }
}

impl Iterator for TetRange {
    type Item = Tet;

    fn next(&mut self) -> Option<Tet> {
        if self.done {
            return None;
        }
        let tet = self.tet_at(self.next);
        if self.next == self.last {
            self.done = true;
        } else {
            self.next += 1;
        }
        Some(tet)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = if self.done {
            0
        } else {
            (self.last - self.next + 1) as usize
        };
        (n, Some(n))
    }
}

impl ExactSizeIterator for TetRange {}

impl std::iter::FusedIterator for TetRange {}

/// Parallel consumption by recursive midpoint splitting.
#[cfg(feature = "rayon")]
pub fn par_tets(range: TetRange) -> impl rayon::iter::ParallelIterator<Item = Tet> {
    use rayon::iter::ParallelIterator;
    rayon::iter::split(range, TetRange::split).flat_map_iter(|chunk| chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aabb(lower: [f64; 3], upper: [f64; 3]) -> AABB<[f64; 3]> {
        AABB::from_corners(lower, upper)
    }

    #[test]
    fn optimal_level_tracks_extent() {
        assert_eq!(optimal_level(&aabb([0.0; 3], [1.0, 1.0, 1.0])), MAX_LEVEL);
        let whole = f64::from(DOMAIN_LEN);
        assert_eq!(optimal_level(&aabb([0.0; 3], [whole, 1.0, 1.0])), 0);
        // A box as large as a level-10 cell.
        let h = f64::from(cell_len(10));
        assert_eq!(optimal_level(&aabb([0.0; 3], [h, h, h])), 10);
    }

    #[test]
    fn covered_cubes_match_brute_force() {
        let h = f64::from(cell_len(5));
        let query = aabb([h * 0.5, h * 1.2, 0.0], [h * 2.5, h * 1.9, h * 0.4]);
        let mut cubes = Vec::new();
        covered_cubes(&query, 5, &mut cubes);
        let mut expected = Vec::new();
        let grid = DOMAIN_LEN / cell_len(5);
        for z in 0..grid {
            for y in 0..grid {
                for x in 0..grid {
                    let anchor = [x * cell_len(5), y * cell_len(5), z * cell_len(5)];
                    if cube_aabb(anchor, 5).intersects(&query) {
                        expected.push(anchor);
                    }
                }
            }
        }
        cubes.sort_unstable();
        expected.sort_unstable();
        assert_eq!(cubes, expected);
    }

    #[test]
    fn ranges_are_sorted_disjoint_and_fused() {
        let h = f64::from(cell_len(8));
        let query = aabb([0.0; 3], [3.0 * h, 2.0 * h, h]);
        let ranges = compute_sfc_ranges(&query);
        assert!(!ranges.is_empty());
        for r in &ranges {
            assert!(r.start <= r.end);
        }
        for pair in ranges.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.end.level() == b.start.level() {
                // Disjoint and not fusable any further.
                assert!(a.end < b.start);
                if let Some(next) = a.end.sfc_successor() {
                    assert!(next < b.start);
                }
            }
        }
    }

    #[test]
    fn ranges_equal_reference_enumeration() {
        // Reference: every cube at every band level, six keys each, sorted and fused.
        let h = f64::from(cell_len(6));
        let query = aabb([h, h, h], [2.5 * h, 2.0 * h, 1.5 * h]);
        let (lo, hi) = level_band(&query);
        let mut reference = Vec::new();
        for level in lo..=hi {
            let step = cell_len(level);
            let grid = DOMAIN_LEN / step;
            let mut keys = Vec::new();
            for z in 0..grid.min(64) {
                for y in 0..grid.min(64) {
                    for x in 0..grid.min(64) {
                        let anchor = [x * step, y * step, z * step];
                        if cube_aabb(anchor, level).intersects(&query) {
                            for kind in 0..6 {
                                keys.push(
                                    Tet::new_unchecked(anchor[0], anchor[1], anchor[2], level, kind)
                                        .index(),
                                );
                            }
                        }
                    }
                }
            }
            keys.sort_unstable();
            keys.dedup();
            reference.extend(fuse(keys));
        }
        assert_eq!(compute_sfc_ranges(&query), reference);
    }

    #[test]
    fn cached_ranges_agree_with_fresh_ones() {
        let query = aabb([10.0, 20.0, 30.0], [40.0, 50.0, 60.0]);
        let fresh = compute_sfc_ranges(&query);
        assert_eq!(cached_sfc_ranges(&query), fresh);
        assert_eq!(cached_sfc_ranges(&query), fresh);
    }

    #[test]
    fn tet_range_walks_types_then_cells() {
        let h = cell_len(3);
        let start = Tet::new_unchecked(0, 0, 0, 3, 0);
        let end = Tet::new_unchecked(h, 0, 0, 3, 5);
        let stream: Vec<Tet> = TetRange::new(&start, &end).unwrap().collect();
        assert_eq!(stream.len(), 12);
        assert_eq!(stream[0].kind(), 0);
        assert_eq!(stream[5].kind(), 5);
        assert_eq!(stream[6].x(), h);
        assert_eq!(stream[6].kind(), 0);
    }

    #[test]
    fn tet_range_wraps_rows_and_planes() {
        let level = 1;
        let h = cell_len(level);
        let start = Tet::new_unchecked(h, 0, 0, level, 4);
        let end = Tet::new_unchecked(0, h, 0, level, 1);
        let stream: Vec<Tet> = TetRange::new(&start, &end).unwrap().collect();
        // Types 4..5 of the first cell, then two types in the row-wrapped cell.
        assert_eq!(stream.len(), 4);
        assert_eq!(stream[2].anchor(), [0, h, 0]);
    }

    #[test]
    fn split_covers_the_range_disjointly() {
        let start = Tet::new_unchecked(0, 0, 0, 2, 0);
        let h = cell_len(2);
        let end = Tet::new_unchecked(3 * h, 2 * h, h, 2, 3);
        let whole: Vec<Tet> = TetRange::new(&start, &end).unwrap().collect();
        let (left, right) = TetRange::new(&start, &end).unwrap().split();
        let right = right.expect("non-singleton range splits");
        let mut rejoined: Vec<Tet> = left.collect();
        rejoined.extend(right);
        assert_eq!(rejoined, whole);
    }

    #[test]
    fn mismatched_levels_refuse_to_stream() {
        let a = Tet::new_unchecked(0, 0, 0, 2, 0);
        let b = Tet::new_unchecked(0, 0, 0, 3, 0);
        assert!(TetRange::new(&a, &b).is_none());
    }
}
