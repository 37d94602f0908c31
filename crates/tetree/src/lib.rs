/// This module decides split and merge actions from node occupancy and executes them.
pub mod balance;
/// This module enumerates the configuration options of the store and balancer.
pub mod config;
/// This module holds the constant connectivity tables of the refinement scheme.
///
/// Everything else in the crate is a walk over these tables plus integer arithmetic;
/// the tables are validated against each other by inverse-property tests.
pub mod connectivity;
/// This module defines the collaborator seams: entity ids, the id generator and the
/// entity store trait with an in-memory implementation.
pub mod entity;
/// This module defines the error taxonomy of the core.
pub mod error;
/// This module defines the integer coordinate geometry of grid tetrahedra.
///
/// ---
///
/// # Geometry of the tetrahedral grid
///
/// The domain is the positive octant `[0, 2^21)^3`. Every cube of the uniform grid at
/// level `l` (side `1 << (21 - l)`) is tiled by six tetrahedra, one per type 0..5, all
/// sharing the cube's main diagonal. A tetrahedron is identified by its anchor corner,
/// its level and its type; its other three vertices follow from the type's axis pair.
///
/// Point location is a cascade of two to three coordinate comparisons selecting the
/// type within the point's cube. Containment is four plane-side tests backed by the
/// adaptive predicates of the `robust` crate; volumes and orientations are exact i128
/// integer arithmetic.
pub mod geometry;
/// This module stores the sorted key -> node mapping.
pub mod index;
/// This module tests tetrahedral cells against axis-aligned query boxes.
pub mod intersect;
/// This module implements the TM-index key codec.
///
/// ---
///
/// # The TM-index
///
/// The key of a tetrahedron interleaves, level by level, the 3-bit Morton id of its
/// anchor within the parent cube and its 3-bit type. Ten such 6-bit groups fit in each
/// of two 64-bit words; the last level's group is split across the spare top bits of
/// both words. Keys compare level first and then along the curve, so a sorted map of
/// keys is a linearization of the whole hierarchy with spatial locality.
pub mod key;
/// This module finds face, edge and vertex neighbours, same-level and across levels.
pub mod neighbours;
/// This module implements membership nodes with adaptive set/array storage.
pub mod node;
/// This module covers query boxes with fused SFC key ranges and provides lazy,
/// splittable cell streams.
pub mod ranges;
/// This module implements the query algorithms: locate, region enumeration, k-NN and
/// enclosing-cell search.
pub mod search;
/// This module defines the `Tet` value and its algebra.
pub mod tet;
/// This module exposes the public facade binding the store, the balancer and the
/// queries together.
pub mod tetree;

pub mod prelude {
    pub use crate::balance::{BalanceAction, check_node_balance, merge_nodes, split_node};
    pub use crate::config::{SpanningPolicy, TetreeConfig};
    pub use crate::connectivity::{DOMAIN_LEN, MAX_LEVEL};
    pub use crate::entity::{EntityId, EntityIdGen, EntityStore, InMemoryEntityStore};
    pub use crate::error::{Result, TetreeError};
    pub use crate::index::{IndexStats, TetreeIndex};
    pub use crate::key::{LazyKey, TmKey};
    pub use crate::ranges::{SfcRange, TetRange, compute_sfc_ranges, optimal_level};
    pub use crate::search::{RegionPredicate, locate};
    pub use crate::tet::Tet;
    pub use crate::tetree::Tetree;
}
