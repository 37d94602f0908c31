//! The `Tet` value: a single tetrahedron of the hierarchical grid.
//!
//! A tetrahedron is `(anchor, level, type)`. The anchor is the v0 corner, aligned to the
//! grid of its level; the type 0..5 selects one of the six tetrahedra sharing the cube's
//! main diagonal. All derivations (children, parent, neighbours) are table walks plus a
//! handful of integer midpoints, so a `Tet` is cheap to copy and never heap-allocates.

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::connectivity::{
    BEY_ID_TO_VERTEX, BEY_TO_INDEX, CHILD_TYPE_BEY, CHILD_TYPE_TM, CID_TYPE_TO_PARENT_TYPE,
    DOMAIN_LEN, FACE_DUAL, FACE_NEIGHBOR_TYPE, INDEX_TO_BEY, MAX_LEVEL, type_axes,
};
use crate::error::{Result, TetreeError};
use crate::geometry::{self, cell_len};
use crate::key::{LazyKey, TmKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tet {
    x: u32,
    y: u32,
    z: u32,
    level: u8,
    kind: u8,
}

impl Tet {
    /// The level-0 tetrahedron of type 0 anchored at the origin.
    pub const ROOT: Tet = Tet {
        x: 0,
        y: 0,
        z: 0,
        level: 0,
        kind: 0,
    };

    /// Builds a tetrahedron, validating domain, alignment, level and type.
    pub fn new(x: u32, y: u32, z: u32, level: u8, kind: u8) -> Result<Self> {
        geometry::check_anchor([x, y, z], level)?;
        if kind > 5 {
            return Err(TetreeError::InvalidIndex {
                what: "type",
                index: kind as usize,
                bound: 6,
            });
        }
        Ok(Tet {
            x,
            y,
            z,
            level,
            kind,
        })
    }

    /// Builds without validation. Callers uphold the alignment invariants.
    #[inline]
    pub const fn new_unchecked(x: u32, y: u32, z: u32, level: u8, kind: u8) -> Self {
        Tet {
            x,
            y,
            z,
            level,
            kind,
        }
    }

    #[inline]
    pub fn x(&self) -> u32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> u32 {
        self.y
    }

    #[inline]
    pub fn z(&self) -> u32 {
        self.z
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    #[inline]
    pub fn kind(&self) -> u8 {
        self.kind
    }

    #[inline]
    pub fn anchor(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }

    /// The SFC key of this tetrahedron.
    pub fn index(&self) -> TmKey {
        TmKey::encode(self)
    }

    /// A deferred key; encoding happens on first comparison against an encoded key.
    pub fn lazy_index(&self) -> LazyKey {
        LazyKey::from(*self)
    }

    pub fn from_index(key: &TmKey) -> Self {
        key.decode()
    }

    /// Edge length of this tetrahedron's cube.
    #[inline]
    pub fn edge_len(&self) -> u32 {
        cell_len(self.level)
    }

    pub fn vertices(&self) -> [[u32; 3]; 4] {
        geometry::vertices(self.anchor(), self.level, self.kind)
    }

    /// Closed point containment.
    pub fn contains(&self, p: &na::Point3<f64>) -> bool {
        geometry::contains_point(&self.vertices(), p)
    }

    /// Six times the signed volume, exact.
    pub fn signed_volume6(&self) -> i128 {
        let v = self.vertices();
        geometry::signed_volume6(v[0], v[1], v[2], v[3])
    }

    /// Orientation sign: -1, 0 or 1.
    pub fn orientation(&self) -> i8 {
        geometry::orientation(&self.vertices())
    }

    /// The 3-bit Morton id of the anchor within its cube at `level` (<= self.level).
    #[inline]
    pub fn cube_id(&self, level: u8) -> u8 {
        if level == 0 || level > self.level {
            return 0;
        }
        let h = cell_len(level);
        let mut id = 0u8;
        if self.x & h != 0 {
            id |= 1;
        }
        if self.y & h != 0 {
            id |= 2;
        }
        if self.z & h != 0 {
            id |= 4;
        }
        id
    }

    /// The type of this tetrahedron's ancestor at `level`.
    pub fn kind_at_level(&self, level: u8) -> u8 {
        let mut kind = self.kind;
        for l in ((level + 1)..=self.level).rev() {
            kind = CID_TYPE_TO_PARENT_TYPE[self.cube_id(l) as usize][kind as usize];
        }
        kind
    }

    /// The parent, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            return None;
        }
        let h = cell_len(self.level);
        let kind = CID_TYPE_TO_PARENT_TYPE[self.cube_id(self.level) as usize][self.kind as usize];
        Some(Tet {
            x: self.x & !h,
            y: self.y & !h,
            z: self.z & !h,
            level: self.level - 1,
            kind,
        })
    }

    fn check_child_args(&self, i: usize) -> Result<()> {
        if self.level >= MAX_LEVEL {
            return Err(TetreeError::MaxLevelExceeded);
        }
        if i > 7 {
            return Err(TetreeError::InvalidIndex {
                what: "child",
                index: i,
                bound: 8,
            });
        }
        Ok(())
    }

    /// Child `i` in **Bey** order. Single-pass: only the one needed midpoint is taken.
    pub fn child_bey(&self, i: usize) -> Result<Self> {
        self.check_child_args(i)?;
        let vertex = BEY_ID_TO_VERTEX[i];
        let off = geometry::vertex_offset(self.kind, vertex, self.edge_len());
        let corner = [self.x + off[0], self.y + off[1], self.z + off[2]];
        let anchor = geometry::midpoint(self.anchor(), corner);
        Ok(Tet {
            x: anchor[0],
            y: anchor[1],
            z: anchor[2],
            level: self.level + 1,
            kind: CHILD_TYPE_BEY[self.kind as usize][i],
        })
    }

    /// Child `i` in **TM** order, the canonical local index of the curve.
    pub fn child_tm(&self, i: usize) -> Result<Self> {
        self.check_child_args(i)?;
        self.child_bey(INDEX_TO_BEY[self.kind as usize][i] as usize)
    }

    /// Child `i` in **Morton** order, the store's canonical child index. Same ordering
    /// as [`Tet::child_tm`].
    #[inline]
    pub fn child_morton(&self, i: usize) -> Result<Self> {
        self.child_tm(i)
    }

    /// All eight children in TM order.
    ///
    /// Computes the four corner anchors once and reorders the Bey fan, which beats eight
    /// single-child derivations when the whole family is needed.
    pub fn subdivide_all(&self) -> Result<[Self; 8]> {
        if self.level >= MAX_LEVEL {
            return Err(TetreeError::MaxLevelExceeded);
        }
        let verts = self.vertices();
        let mids: [[u32; 3]; 4] = std::array::from_fn(|v| geometry::midpoint(verts[0], verts[v]));
        let mut out = [Tet::ROOT; 8];
        for bey in 0..8 {
            let anchor = mids[BEY_ID_TO_VERTEX[bey] as usize];
            let child = Tet {
                x: anchor[0],
                y: anchor[1],
                z: anchor[2],
                level: self.level + 1,
                kind: CHILD_TYPE_BEY[self.kind as usize][bey],
            };
            out[BEY_TO_INDEX[self.kind as usize][bey] as usize] = child;
        }
        Ok(out)
    }

    /// The same-level neighbour across face `f`, with the index of the shared face on
    /// the neighbour's side. `None` when the face lies on the domain boundary.
    pub fn face_neighbour(&self, f: usize) -> Result<Option<(Self, u8)>> {
        if f > 3 {
            return Err(TetreeError::InvalidIndex {
                what: "face",
                index: f,
                bound: 4,
            });
        }
        let (i, j) = type_axes(self.kind);
        let k = 3 - i - j;
        let h = self.edge_len();
        let mut anchor = self.anchor();
        match f {
            // Face 0 exits the cube towards +e_i, face 3 towards -e_k; faces 1 and 2
            // are cube-internal diagonal reflections.
            0 => {
                if anchor[i] + h >= DOMAIN_LEN {
                    return Ok(None);
                }
                anchor[i] += h;
            }
            3 => {
                if anchor[k] == 0 {
                    return Ok(None);
                }
                anchor[k] -= h;
            }
            _ => {}
        }
        let neighbour = Tet {
            x: anchor[0],
            y: anchor[1],
            z: anchor[2],
            level: self.level,
            kind: FACE_NEIGHBOR_TYPE[self.kind as usize][f],
        };
        Ok(Some((neighbour, FACE_DUAL[f])))
    }

    /// Level of the lowest common ancestor of two tetrahedra.
    ///
    /// The anchor XOR gives the deepest shared cube; the result can be lower still when
    /// the type trajectories disagree at that cube. Level 0 with disagreeing types means
    /// the two descend from different tetrahedra of the domain cube.
    pub fn lca_level(a: &Tet, b: &Tet) -> u8 {
        let min_level = a.level.min(b.level);
        let diff = (a.x ^ b.x) | (a.y ^ b.y) | (a.z ^ b.z);
        let mut level = if diff == 0 {
            min_level
        } else {
            let top = 31 - diff.leading_zeros();
            min_level.min((u32::from(MAX_LEVEL) - 1 - top) as u8)
        };
        while level > 0 && a.kind_at_level(level) != b.kind_at_level(level) {
            level -= 1;
        }
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::LOCAL_INDEX_TO_CID;
    use proptest::prelude::*;

    fn arb_tet(max_level: u8) -> impl Strategy<Value = Tet> {
        (0u8..=max_level, 0u8..6, any::<u32>(), any::<u32>(), any::<u32>()).prop_map(
            |(level, kind, x, y, z)| {
                let mask = !(cell_len(level) - 1) & (DOMAIN_LEN - 1);
                Tet::new_unchecked(x & mask, y & mask, z & mask, level, kind)
            },
        )
    }

    #[test]
    fn root_subdivision_types_follow_the_morton_table() {
        let children = Tet::ROOT.subdivide_all().unwrap();
        for (c, child) in children.iter().enumerate() {
            assert_eq!(child.kind(), CHILD_TYPE_TM[0][c]);
            assert_eq!(child.cube_id(1), LOCAL_INDEX_TO_CID[0][c]);
            assert_eq!(child.level(), 1);
        }
    }

    #[test]
    fn children_volumes_partition_the_parent_exactly() {
        for kind in 0..6 {
            let parent = Tet::new_unchecked(0, 0, 0, 3, kind);
            let children = parent.subdivide_all().unwrap();
            let total: i128 = children.iter().map(|c| c.signed_volume6().abs()).sum();
            assert_eq!(total, parent.signed_volume6().abs());
            for c in &children {
                assert_eq!(c.signed_volume6().abs() * 8, parent.signed_volume6().abs());
                assert_eq!(c.orientation(), parent.orientation());
            }
        }
    }

    #[test]
    fn child_vertices_are_parent_vertices_or_edge_midpoints() {
        for kind in 0..6 {
            let parent = Tet::new_unchecked(0, 0, 0, 5, kind);
            let pv = parent.vertices();
            let mut lattice: Vec<[u32; 3]> = pv.to_vec();
            for a in 0..4 {
                for b in (a + 1)..4 {
                    lattice.push(geometry::midpoint(pv[a], pv[b]));
                }
            }
            for c in parent.subdivide_all().unwrap() {
                for v in c.vertices() {
                    assert!(lattice.contains(&v), "stray vertex {v:?} of child {c:?}");
                }
            }
        }
    }

    #[test]
    fn single_child_agrees_with_full_subdivision() {
        for kind in 0..6 {
            let h = cell_len(8);
            let parent = Tet::new_unchecked(h, 2 * h, 0, 8, kind);
            let all = parent.subdivide_all().unwrap();
            for i in 0..8 {
                assert_eq!(parent.child_tm(i).unwrap(), all[i]);
                let bey = INDEX_TO_BEY[kind as usize][i] as usize;
                assert_eq!(parent.child_bey(bey).unwrap(), all[i]);
                assert_eq!(parent.child_morton(i).unwrap(), all[i]);
            }
        }
    }

    #[test]
    fn child_at_max_level_fails() {
        let deep = Tet::new_unchecked(0, 0, 0, MAX_LEVEL, 0);
        assert_eq!(deep.child_tm(0), Err(TetreeError::MaxLevelExceeded));
        assert_eq!(deep.subdivide_all(), Err(TetreeError::MaxLevelExceeded));
    }

    #[test]
    fn bad_indices_are_rejected() {
        assert!(matches!(
            Tet::ROOT.child_tm(8),
            Err(TetreeError::InvalidIndex { what: "child", .. })
        ));
        assert!(matches!(
            Tet::ROOT.face_neighbour(4),
            Err(TetreeError::InvalidIndex { what: "face", .. })
        ));
        assert!(Tet::new(0, 0, 0, 0, 6).is_err());
        assert!(Tet::new(3, 0, 0, 1, 0).is_err());
    }

    #[test]
    fn type0_face0_neighbour_and_back() {
        let t = Tet::new_unchecked(0, 0, 0, 4, 0);
        let (n, back) = t.face_neighbour(0).unwrap().unwrap();
        assert_eq!(n.kind(), 4);
        assert_eq!(back, 3);
        let (orig, f) = n.face_neighbour(back as usize).unwrap().unwrap();
        assert_eq!(orig, t);
        assert_eq!(f, 0);
    }

    #[test]
    fn boundary_faces_have_no_neighbour() {
        // Type 0 at the far x edge: face 0 points out of the domain.
        let h = cell_len(1);
        let t = Tet::new_unchecked(DOMAIN_LEN - h, 0, 0, 1, 0);
        assert_eq!(t.face_neighbour(0).unwrap(), None);
        // Type 0 at y == 0: face 3 points out (k axis is y).
        let t = Tet::new_unchecked(0, 0, 0, 1, 0);
        assert_eq!(t.face_neighbour(3).unwrap(), None);
    }

    #[test]
    fn lca_can_undershoot_the_shared_cube_level() {
        // Same anchor cube, disagreeing types: the LCA falls below the cube level.
        let a = Tet::new_unchecked(0, 0, 0, 2, 0);
        let b = Tet::new_unchecked(0, 0, 0, 2, 3);
        let level = Tet::lca_level(&a, &b);
        assert!(level < 2);
        // Descendants of one tetrahedron agree at the ancestor's level.
        let t = Tet::new_unchecked(0, 0, 0, 5, 2);
        let c0 = t.child_tm(1).unwrap();
        let c1 = t.child_tm(6).unwrap();
        let level = Tet::lca_level(&c0, &c1);
        assert!(level <= 5);
        assert_eq!(c0.kind_at_level(level), c1.kind_at_level(level));
    }

    proptest! {
        #[test]
        fn parent_of_child_is_identity(t in arb_tet(MAX_LEVEL - 1), i in 0usize..8) {
            let child = t.child_tm(i).unwrap();
            prop_assert_eq!(child.parent().unwrap(), t);
            let bey_child = t.child_bey(i).unwrap();
            prop_assert_eq!(bey_child.parent().unwrap(), t);
        }

        #[test]
        fn face_neighbour_is_involutive(t in arb_tet(MAX_LEVEL), f in 0usize..4) {
            if let Some((n, back)) = t.face_neighbour(f).unwrap() {
                let (orig, dual) = n.face_neighbour(back as usize).unwrap().unwrap();
                prop_assert_eq!(orig, t);
                prop_assert_eq!(dual as usize, f);
            }
        }

        #[test]
        fn kind_at_own_level_is_kind(t in arb_tet(MAX_LEVEL)) {
            prop_assert_eq!(t.kind_at_level(t.level()), t.kind());
            // Walking all the way up lands on whichever of the six level-0 tetrahedra
            // this one descends from.
            prop_assert!(t.kind_at_level(0) < 6);
        }
    }
}
