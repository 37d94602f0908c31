//! Constant connectivity tables of the tetrahedral refinement scheme.
//!
//! A cube is split into six tetrahedra, one per type 0..5. Refining a tetrahedron yields
//! eight children: four corner children and four children tiling the interior octahedron.
//! Children carry three orderings:
//!
//! - **Bey order**: corner children 0..3 first, octahedral children 4..7 last.
//! - **TM order**: rank of the child's `(cube_id << 3) | type` group, which is the order
//!   the space-filling curve visits siblings in. This is the canonical local child index.
//! - **Morton order**: synonym used by the store for the TM index.
//!
//! Every table below is cross-checked by the inverse-property tests at the bottom of the
//! file; `validate()` runs the same checks at startup in debug builds.

/// Deepest refinement level. Anchors are multiples of `1 << (MAX_LEVEL - level)`.
pub const MAX_LEVEL: u8 = 21;

/// Domain edge length. The root tetrahedra tile the cube `[0, DOMAIN_LEN)^3`.
pub const DOMAIN_LEN: u32 = 1 << MAX_LEVEL;

/// Child type by parent type and **Bey** child id.
pub const CHILD_TYPE_BEY: [[u8; 8]; 6] = [
    [0, 0, 0, 0, 4, 5, 2, 1],
    [1, 1, 1, 1, 3, 2, 5, 0],
    [2, 2, 2, 2, 0, 1, 4, 3],
    [3, 3, 3, 3, 5, 4, 1, 2],
    [4, 4, 4, 4, 2, 3, 0, 5],
    [5, 5, 5, 5, 1, 0, 3, 4],
];

/// Child type by parent type and **TM** child index.
pub const CHILD_TYPE_TM: [[u8; 8]; 6] = [
    [0, 0, 4, 5, 0, 1, 2, 0],
    [1, 1, 2, 3, 0, 1, 5, 1],
    [2, 0, 1, 2, 2, 3, 4, 2],
    [3, 3, 4, 5, 1, 2, 3, 3],
    [4, 2, 3, 4, 0, 4, 5, 4],
    [5, 0, 1, 5, 3, 4, 5, 5],
];

/// TM child index -> Bey child id, per parent type.
pub const INDEX_TO_BEY: [[u8; 8]; 6] = [
    [0, 1, 4, 5, 2, 7, 6, 3],
    [0, 1, 5, 4, 7, 2, 6, 3],
    [0, 4, 5, 1, 2, 7, 6, 3],
    [0, 1, 5, 4, 6, 7, 2, 3],
    [0, 4, 5, 1, 6, 2, 7, 3],
    [0, 5, 4, 1, 6, 7, 2, 3],
];

/// Bey child id -> TM child index, per parent type. Inverse of [`INDEX_TO_BEY`].
pub const BEY_TO_INDEX: [[u8; 8]; 6] = [
    [0, 1, 4, 7, 2, 3, 6, 5],
    [0, 1, 5, 7, 3, 2, 6, 4],
    [0, 3, 4, 7, 1, 2, 6, 5],
    [0, 1, 6, 7, 3, 2, 4, 5],
    [0, 3, 5, 7, 1, 2, 4, 6],
    [0, 3, 6, 7, 2, 1, 4, 5],
];

/// Parent type by the child's cube-id within the parent and the child's type.
///
/// Walking this table towards the root recovers the whole type trajectory of a
/// tetrahedron, which is what the key codec interleaves.
pub const CID_TYPE_TO_PARENT_TYPE: [[u8; 6]; 8] = [
    [0, 1, 2, 3, 4, 5],
    [0, 1, 1, 1, 0, 0],
    [2, 2, 2, 3, 3, 3],
    [1, 1, 2, 2, 2, 1],
    [5, 5, 4, 4, 4, 5],
    [0, 0, 0, 5, 5, 5],
    [4, 3, 3, 3, 4, 4],
    [0, 1, 2, 3, 4, 5],
];

/// TM child index by the child's own type and cube-id. Well defined: a child's local
/// position is determined by its type and octant without knowing the parent type.
pub const TYPE_CID_TO_LOCAL_INDEX: [[u8; 8]; 6] = [
    [0, 1, 1, 4, 1, 4, 4, 7],
    [0, 1, 2, 5, 2, 5, 4, 7],
    [0, 2, 3, 4, 1, 6, 5, 7],
    [0, 3, 1, 5, 2, 4, 6, 7],
    [0, 2, 2, 6, 3, 5, 5, 7],
    [0, 3, 3, 6, 3, 6, 6, 7],
];

/// Cube-id of the TM-indexed child within the parent cube, per parent type.
pub const LOCAL_INDEX_TO_CID: [[u8; 8]; 6] = [
    [0, 1, 1, 1, 5, 5, 5, 7],
    [0, 1, 1, 1, 3, 3, 3, 7],
    [0, 2, 2, 2, 3, 3, 3, 7],
    [0, 2, 2, 2, 6, 6, 6, 7],
    [0, 4, 4, 4, 6, 6, 6, 7],
    [0, 4, 4, 4, 5, 5, 5, 7],
];

/// Bey child id by the child's own type and cube-id.
pub const TYPE_CID_TO_BEY_ID: [[u8; 8]; 6] = [
    [0, 1, 4, 7, 5, 2, 6, 3],
    [0, 1, 5, 2, 4, 7, 6, 3],
    [0, 5, 1, 2, 4, 6, 7, 3],
    [0, 4, 1, 7, 5, 6, 2, 3],
    [0, 4, 5, 6, 1, 7, 2, 3],
    [0, 5, 4, 6, 1, 2, 7, 3],
];

/// Parent vertex whose midpoint with the parent anchor is the Bey child's anchor.
///
/// Bey children 0..3 sit at the parent anchor and the three edge midpoints towards
/// vertices 1..3; the octahedral children 4,5 share the anchor of child 1 and 6,7 the
/// anchor of child 2.
pub const BEY_ID_TO_VERTEX: [u8; 8] = [0, 1, 2, 3, 1, 1, 2, 2];

/// Type of the same-level neighbour across each face.
pub const FACE_NEIGHBOR_TYPE: [[u8; 4]; 6] = [
    [4, 5, 1, 2],
    [3, 2, 0, 5],
    [0, 1, 3, 4],
    [5, 4, 2, 1],
    [2, 3, 5, 0],
    [1, 0, 4, 3],
];

/// Face index of the neighbour that is glued to our face f.
///
/// Crossing face 0 leaves the cube in the +e_i direction and lands on the neighbour's
/// face 3 (and vice versa); faces 1 and 2 are internal cube diagonals and map to
/// themselves.
pub const FACE_DUAL: [u8; 4] = [3, 1, 2, 0];

/// Vertex indices spanning each face. Face f is opposite vertex f; identical for all
/// six types.
pub const FACE_CORNERS: [[u8; 3]; 4] = [[1, 2, 3], [0, 2, 3], [0, 1, 3], [0, 1, 2]];

/// TM indices of the four children incident to each parent face, ascending.
pub const CHILDREN_AT_FACE: [[[u8; 4]; 4]; 6] = [
    [[1, 4, 5, 7], [0, 4, 6, 7], [0, 1, 2, 7], [0, 1, 3, 4]],
    [[1, 4, 5, 7], [0, 5, 6, 7], [0, 1, 3, 7], [0, 1, 2, 5]],
    [[3, 4, 5, 7], [0, 4, 6, 7], [0, 1, 3, 7], [0, 2, 3, 4]],
    [[1, 5, 6, 7], [0, 4, 6, 7], [0, 1, 3, 7], [0, 1, 2, 6]],
    [[3, 5, 6, 7], [0, 4, 5, 7], [0, 1, 3, 7], [0, 2, 3, 5]],
    [[3, 5, 6, 7], [0, 4, 6, 7], [0, 2, 3, 7], [0, 1, 3, 6]],
];

/// For slot s of `CHILDREN_AT_FACE[t][f]`, the child's face lying on parent face f.
///
/// Corner children keep the parent's face index; the octahedral mid-face child maps
/// faces 1 and 2 onto each other.
pub const FACE_CHILD_FACE: [[[u8; 4]; 4]; 6] = [
    [[0, 0, 0, 0], [1, 1, 2, 1], [2, 2, 1, 2], [3, 3, 3, 3]],
    [[0, 0, 0, 0], [1, 1, 2, 1], [2, 2, 1, 2], [3, 3, 3, 3]],
    [[0, 0, 0, 0], [1, 1, 2, 1], [2, 1, 2, 2], [3, 3, 3, 3]],
    [[0, 0, 0, 0], [1, 2, 1, 1], [2, 2, 1, 2], [3, 3, 3, 3]],
    [[0, 0, 0, 0], [1, 2, 1, 1], [2, 1, 2, 2], [3, 3, 3, 3]],
    [[0, 0, 0, 0], [1, 2, 1, 1], [2, 1, 2, 2], [3, 3, 3, 3]],
];

/// The two faces containing each edge.
pub const EDGE_FACES: [[u8; 2]; 6] = [[0, 2], [0, 3], [1, 3], [0, 1], [1, 2], [2, 3]];

/// Vertex pair of each edge, consistent with [`EDGE_FACES`].
pub const EDGE_VERTICES: [[u8; 2]; 6] = [[1, 3], [1, 2], [0, 2], [2, 3], [0, 3], [0, 1]];

/// The three faces incident to each vertex (all faces but the opposite one).
pub const VERTEX_FACES: [[u8; 3]; 4] = [[1, 2, 3], [0, 2, 3], [0, 1, 3], [0, 1, 2]];

/// The three edges incident to each vertex.
pub const VERTEX_EDGES: [[u8; 3]; 4] = [[2, 4, 5], [0, 1, 5], [1, 2, 3], [0, 3, 4]];

/// Axis pair (e_i, e_j) of a type: v1 = anchor + h e_i, v2 = v1 + h e_j.
#[inline]
pub const fn type_axes(kind: u8) -> (usize, usize) {
    let i = (kind / 2) as usize;
    let j = if kind % 2 == 0 { (i + 2) % 3 } else { (i + 1) % 3 };
    (i, j)
}

static VALIDATED: std::sync::Once = std::sync::Once::new();

/// Runs the inverse-property cross-checks once per process, before first use of the
/// tables by a store.
pub fn validate() {
    VALIDATED.call_once(checks);
}

fn checks() {
    for t in 0..6 {
        for c in 0..8 {
            let bey = INDEX_TO_BEY[t][c] as usize;
            assert_eq!(BEY_TO_INDEX[t][bey] as usize, c);
            let cid = LOCAL_INDEX_TO_CID[t][c] as usize;
            let kind = CHILD_TYPE_TM[t][c] as usize;
            assert_eq!(CHILD_TYPE_BEY[t][bey] as usize, kind);
            assert_eq!(TYPE_CID_TO_LOCAL_INDEX[kind][cid] as usize, c);
            assert_eq!(TYPE_CID_TO_BEY_ID[kind][cid] as usize, bey);
            assert_eq!(CID_TYPE_TO_PARENT_TYPE[cid][kind] as usize, t);
        }
    }
}
