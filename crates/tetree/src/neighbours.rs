//! Face, edge and vertex neighbour traversal, same-level and across levels.
//!
//! Same-level face neighbours are a table walk on the `Tet` itself. Cross-level queries
//! either ascend (coarser target) or descend the refinement along the shared face using
//! the children-at-face tables (finer target). Edge and vertex neighbourhoods are unions
//! of the incident faces' and edges' neighbourhoods.

use rustc_hash::FxHashSet;

use crate::connectivity::{
    CHILDREN_AT_FACE, EDGE_FACES, FACE_CHILD_FACE, MAX_LEVEL, VERTEX_EDGES, VERTEX_FACES,
};
use crate::error::{Result, TetreeError};
use crate::tet::Tet;

/// All four same-level face neighbours; `None` entries sit on the domain boundary.
pub fn all_face_neighbours(tet: &Tet) -> [Option<(Tet, u8)>; 4] {
    std::array::from_fn(|f| tet.face_neighbour(f).expect("face index in range"))
}

/// Face neighbours of `tet` across face `f`, taken at `level`.
///
/// Coarser than the tetrahedron: the ancestor at `level` is taken first and its
/// neighbour returned. Finer: all neighbour descendants incident to the shared face are
/// enumerated. The result is empty on the domain boundary.
pub fn face_neighbours_at_level(tet: &Tet, f: usize, level: u8) -> Result<Vec<Tet>> {
    if level > MAX_LEVEL {
        return Err(TetreeError::InvalidLevel {
            level: u32::from(level),
            max: MAX_LEVEL,
        });
    }
    if level <= tet.level() {
        let mut t = *tet;
        while t.level() > level {
            t = t.parent().expect("level > 0 while above the target");
        }
        return Ok(match t.face_neighbour(f)? {
            Some((n, _)) => vec![n],
            None => Vec::new(),
        });
    }
    let Some((neighbour, shared)) = tet.face_neighbour(f)? else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    descend_at_face(&neighbour, shared as usize, level, &mut out);
    Ok(out)
}

/// Collects descendants of `tet` at `target` level having a face on `tet`'s face.
fn descend_at_face(tet: &Tet, face: usize, target: u8, out: &mut Vec<Tet>) {
    if tet.level() == target {
        out.push(*tet);
        return;
    }
    let kind = tet.kind() as usize;
    for slot in 0..4 {
        let child_index = CHILDREN_AT_FACE[kind][face][slot] as usize;
        let child_face = FACE_CHILD_FACE[kind][face][slot] as usize;
        let child = tet
            .child_tm(child_index)
            .expect("descent stays above the deepest level");
        descend_at_face(&child, child_face, target, out);
    }
}

/// Same-level neighbours across edge `e`: the union over the edge's two incident faces.
pub fn edge_neighbours(tet: &Tet, e: usize) -> Result<Vec<Tet>> {
    if e > 5 {
        return Err(TetreeError::InvalidIndex {
            what: "edge",
            index: e,
            bound: 6,
        });
    }
    let mut seen = FxHashSet::default();
    for f in EDGE_FACES[e] {
        if let Some((n, _)) = tet.face_neighbour(f as usize)? {
            seen.insert(n);
        }
    }
    seen.remove(tet);
    Ok(in_sfc_order(seen))
}

/// Neighbours across edge `e` at an arbitrary level.
pub fn edge_neighbours_at_level(tet: &Tet, e: usize, level: u8) -> Result<Vec<Tet>> {
    if e > 5 {
        return Err(TetreeError::InvalidIndex {
            what: "edge",
            index: e,
            bound: 6,
        });
    }
    let mut seen = FxHashSet::default();
    for f in EDGE_FACES[e] {
        seen.extend(face_neighbours_at_level(tet, f as usize, level)?);
    }
    seen.remove(tet);
    Ok(in_sfc_order(seen))
}

/// Same-level neighbours around vertex `v`: the three incident faces plus the three
/// incident edges, minus the tetrahedron itself.
pub fn vertex_neighbours(tet: &Tet, v: usize) -> Result<Vec<Tet>> {
    if v > 3 {
        return Err(TetreeError::InvalidIndex {
            what: "vertex",
            index: v,
            bound: 4,
        });
    }
    let mut seen = FxHashSet::default();
    for f in VERTEX_FACES[v] {
        if let Some((n, _)) = tet.face_neighbour(f as usize)? {
            seen.insert(n);
        }
    }
    for e in VERTEX_EDGES[v] {
        seen.extend(edge_neighbours(tet, e as usize)?);
    }
    seen.remove(tet);
    Ok(in_sfc_order(seen))
}

/// Neighbours around vertex `v` at an arbitrary level.
pub fn vertex_neighbours_at_level(tet: &Tet, v: usize, level: u8) -> Result<Vec<Tet>> {
    if v > 3 {
        return Err(TetreeError::InvalidIndex {
            what: "vertex",
            index: v,
            bound: 4,
        });
    }
    let mut seen = FxHashSet::default();
    for f in VERTEX_FACES[v] {
        seen.extend(face_neighbours_at_level(tet, f as usize, level)?);
    }
    for e in VERTEX_EDGES[v] {
        seen.extend(edge_neighbours_at_level(tet, e as usize, level)?);
    }
    seen.remove(tet);
    Ok(in_sfc_order(seen))
}

fn in_sfc_order(seen: FxHashSet<Tet>) -> Vec<Tet> {
    let mut out: Vec<Tet> = seen.into_iter().collect();
    out.sort_unstable_by_key(|t| t.index());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::FACE_NEIGHBOR_TYPE;

    #[test]
    fn same_level_query_matches_direct_neighbour() {
        let t = Tet::new_unchecked(8192, 8192, 8192, 8, 2);
        for f in 0..4 {
            let direct = t.face_neighbour(f).unwrap().map(|(n, _)| n);
            let at_level = face_neighbours_at_level(&t, f, t.level()).unwrap();
            assert_eq!(at_level, direct.into_iter().collect::<Vec<_>>());
        }
    }

    #[test]
    fn coarser_query_ascends_first() {
        let t = Tet::new_unchecked(4096, 4096, 4096, 10, 1);
        let ns = face_neighbours_at_level(&t, 1, 8).unwrap();
        assert_eq!(ns.len(), 1);
        assert_eq!(ns[0].level(), 8);
    }

    #[test]
    fn finer_query_yields_the_face_fan() {
        let t = Tet::new_unchecked(0, 0, 0, 5, 0);
        // One level down the shared face splits in four.
        let ns = face_neighbours_at_level(&t, 0, 6).unwrap();
        assert_eq!(ns.len(), 4);
        for n in &ns {
            assert_eq!(n.level(), 6);
        }
        // Two levels down: sixteen.
        let ns = face_neighbours_at_level(&t, 0, 7).unwrap();
        assert_eq!(ns.len(), 16);
    }

    #[test]
    fn finer_neighbours_descend_from_the_direct_one() {
        let t = Tet::new_unchecked(4096, 4096, 4096, 9, 3);
        for f in 0..4 {
            let Some((direct, _)) = t.face_neighbour(f).unwrap() else {
                continue;
            };
            for n in face_neighbours_at_level(&t, f, 11).unwrap() {
                let mut a = n;
                while a.level() > direct.level() {
                    a = a.parent().unwrap();
                }
                assert_eq!(a, direct);
            }
        }
    }

    #[test]
    fn boundary_faces_yield_empty_sets() {
        let t = Tet::new_unchecked(0, 0, 0, 3, 0);
        // Face 3 of type 0 exits through y == 0.
        assert!(face_neighbours_at_level(&t, 3, 5).unwrap().is_empty());
    }

    #[test]
    fn edge_neighbours_are_the_two_face_neighbours() {
        let t = Tet::new_unchecked(8192, 8192, 8192, 8, 0);
        // Edge 3 joins faces 0 and 1.
        let ns = edge_neighbours(&t, 3).unwrap();
        assert_eq!(ns.len(), 2);
        let expected_kinds: FxHashSet<u8> = [FACE_NEIGHBOR_TYPE[0][0], FACE_NEIGHBOR_TYPE[0][1]]
            .into_iter()
            .collect();
        assert_eq!(ns.iter().map(|n| n.kind()).collect::<FxHashSet<_>>(), expected_kinds);
    }

    #[test]
    fn vertex_neighbours_exclude_self_and_are_sorted() {
        let t = Tet::new_unchecked(8192, 8192, 8192, 8, 4);
        for v in 0..4 {
            let ns = vertex_neighbours(&t, v).unwrap();
            assert!(!ns.contains(&t));
            assert!(!ns.is_empty());
            let keys: Vec<_> = ns.iter().map(Tet::index).collect();
            assert!(keys.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn invalid_indices_are_rejected() {
        let t = Tet::ROOT;
        assert!(matches!(
            edge_neighbours(&t, 6),
            Err(TetreeError::InvalidIndex { what: "edge", .. })
        ));
        assert!(matches!(
            vertex_neighbours(&t, 4),
            Err(TetreeError::InvalidIndex { what: "vertex", .. })
        ));
        assert!(matches!(
            face_neighbours_at_level(&t, 0, 22),
            Err(TetreeError::InvalidLevel { .. })
        ));
    }
}
