//! Integer coordinate geometry of grid tetrahedra.
//!
//! All anchors live on the integer grid of the positive octant `[0, 2^21)^3`. Vertices,
//! midpoints and volumes are exact in integer arithmetic; plane-side tests against
//! floating-point query points go through the adaptive predicates of the `robust` crate.

use nalgebra as na;
use robust as ro;

use crate::connectivity::{DOMAIN_LEN, FACE_CORNERS, MAX_LEVEL, type_axes};
use crate::error::{Result, TetreeError};

/// Edge length of a cell at `level`.
#[inline]
pub const fn cell_len(level: u8) -> u32 {
    1 << (MAX_LEVEL - level)
}

/// Offset of vertex `vi` from the anchor, for a tetrahedron of type `kind` with cell
/// length `h`.
///
/// v0 is the anchor; v1 = anchor + h e_i; v2 = v1 + h e_j; v3 = anchor + (h, h, h),
/// with (i, j) the type's axis pair.
#[inline]
pub fn vertex_offset(kind: u8, vi: u8, h: u32) -> [u32; 3] {
    let (i, j) = type_axes(kind);
    let mut off = [0u32; 3];
    match vi {
        0 => {}
        1 => off[i] = h,
        2 => {
            off[i] = h;
            off[j] = h;
        }
        3 => off = [h, h, h],
        _ => unreachable!("vertex index {vi} out of range"),
    }
    off
}

/// The four vertices of the tetrahedron `(anchor, level, kind)`.
pub fn vertices(anchor: [u32; 3], level: u8, kind: u8) -> [[u32; 3]; 4] {
    let h = cell_len(level);
    std::array::from_fn(|vi| {
        let off = vertex_offset(kind, vi as u8, h);
        [anchor[0] + off[0], anchor[1] + off[1], anchor[2] + off[2]]
    })
}

/// Integer midpoint of two grid points. Exact: edge endpoints at any valid level are
/// even-aligned in every coordinate where they differ.
#[inline]
pub fn midpoint(a: [u32; 3], b: [u32; 3]) -> [u32; 3] {
    [(a[0] + b[0]) >> 1, (a[1] + b[1]) >> 1, (a[2] + b[2]) >> 1]
}

/// Six times the signed volume of (a, b, c, d), exact.
pub fn signed_volume6(a: [u32; 3], b: [u32; 3], c: [u32; 3], d: [u32; 3]) -> i128 {
    let u = [
        i128::from(b[0]) - i128::from(a[0]),
        i128::from(b[1]) - i128::from(a[1]),
        i128::from(b[2]) - i128::from(a[2]),
    ];
    let v = [
        i128::from(c[0]) - i128::from(a[0]),
        i128::from(c[1]) - i128::from(a[1]),
        i128::from(c[2]) - i128::from(a[2]),
    ];
    let w = [
        i128::from(d[0]) - i128::from(a[0]),
        i128::from(d[1]) - i128::from(a[1]),
        i128::from(d[2]) - i128::from(a[2]),
    ];
    u[0] * (v[1] * w[2] - v[2] * w[1]) - u[1] * (v[0] * w[2] - v[2] * w[0])
        + u[2] * (v[0] * w[1] - v[1] * w[0])
}

/// Orientation sign of the vertex tuple: -1, 0 or 1.
pub fn orientation(verts: &[[u32; 3]; 4]) -> i8 {
    signed_volume6(verts[0], verts[1], verts[2], verts[3]).signum() as i8
}

#[inline]
fn coord3(p: [f64; 3]) -> ro::Coord3D<f64> {
    ro::Coord3D {
        x: p[0],
        y: p[1],
        z: p[2],
    }
}

#[inline]
fn to_f64(p: [u32; 3]) -> [f64; 3] {
    [f64::from(p[0]), f64::from(p[1]), f64::from(p[2])]
}

/// Closed containment test: `p` lies inside or on the boundary of the tetrahedron.
///
/// A conjunction of four plane-side tests; each face's admissible side is the side of
/// the opposite vertex.
pub fn contains_point(verts: &[[u32; 3]; 4], p: &na::Point3<f64>) -> bool {
    let q = ro::Coord3D {
        x: p.x,
        y: p.y,
        z: p.z,
    };
    for (f, corners) in FACE_CORNERS.iter().enumerate() {
        let a = coord3(to_f64(verts[corners[0] as usize]));
        let b = coord3(to_f64(verts[corners[1] as usize]));
        let c = coord3(to_f64(verts[corners[2] as usize]));
        let opposite = coord3(to_f64(verts[f]));
        let reference = ro::orient3d(a, b, c, opposite);
        let side = ro::orient3d(a, b, c, q);
        if reference * side < 0.0 {
            return false;
        }
    }
    true
}

/// Type of the tetrahedron containing the local offset `(dx, dy, dz)` within its cube.
///
/// The six types are the six orderings of the local coordinates; two or three
/// comparisons decide. Ties sit on shared faces and resolve deterministically.
#[inline]
pub fn locate_kind(dx: f64, dy: f64, dz: f64) -> u8 {
    if dx >= dy {
        if dz > dx {
            5
        } else if dz > dy {
            0
        } else {
            1
        }
    } else if dz > dy {
        4
    } else if dz > dx {
        3
    } else {
        2
    }
}

/// Validates that a floating-point position lies in the domain.
pub fn check_domain_f64(p: &na::Point3<f64>) -> Result<()> {
    let edge = f64::from(DOMAIN_LEN);
    if p.x < 0.0 || p.y < 0.0 || p.z < 0.0 || p.x >= edge || p.y >= edge || p.z >= edge {
        return Err(TetreeError::InvalidDomain {
            x: p.x as i64,
            y: p.y as i64,
            z: p.z as i64,
        });
    }
    Ok(())
}

/// Validates integer anchor coordinates against the domain and level alignment.
pub fn check_anchor(anchor: [u32; 3], level: u8) -> Result<()> {
    if level > MAX_LEVEL {
        return Err(TetreeError::InvalidLevel {
            level: u32::from(level),
            max: MAX_LEVEL,
        });
    }
    let h = cell_len(level);
    let aligned = |c: u32| c < DOMAIN_LEN && c % h == 0;
    if aligned(anchor[0]) && aligned(anchor[1]) && aligned(anchor[2]) {
        Ok(())
    } else {
        Err(TetreeError::InvalidDomain {
            x: i64::from(anchor[0]),
            y: i64::from(anchor[1]),
            z: i64::from(anchor[2]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cell_len_halves_per_level() {
        assert_eq!(cell_len(0), DOMAIN_LEN);
        assert_eq!(cell_len(MAX_LEVEL), 1);
        for l in 0..MAX_LEVEL {
            assert_eq!(cell_len(l), 2 * cell_len(l + 1));
        }
    }

    #[test]
    fn six_types_tile_the_cube_volume() {
        // Each type's 6x-volume is exactly the cube volume.
        let total: i128 = (0..6)
            .map(|t| {
                let v = vertices([0, 0, 0], 0, t);
                signed_volume6(v[0], v[1], v[2], v[3]).abs()
            })
            .sum();
        let edge = i128::from(DOMAIN_LEN);
        assert_eq!(total, 6 * edge * edge * edge);
    }

    #[test]
    fn locate_kind_matches_containment() {
        // Interior sample points of each type at level 0 land back on their type.
        let probes = [
            (0.9, 0.1, 0.5, 0u8),
            (0.9, 0.5, 0.1, 1),
            (0.5, 0.9, 0.1, 2),
            (0.1, 0.9, 0.5, 3),
            (0.1, 0.5, 0.9, 4),
            (0.5, 0.1, 0.9, 5),
        ];
        let edge = f64::from(DOMAIN_LEN);
        for (fx, fy, fz, kind) in probes {
            let p = na::Point3::new(fx * edge, fy * edge, fz * edge);
            assert_eq!(locate_kind(p.x, p.y, p.z), kind);
            let verts = vertices([0, 0, 0], 0, kind);
            assert!(contains_point(&verts, &p));
        }
    }

    #[test]
    fn boundary_point_is_contained_by_both_types() {
        // x == z plane is shared by types 0 and 5.
        let p = na::Point3::new(100.0, 10.0, 100.0);
        assert!(contains_point(&vertices([0, 0, 0], 0, 0), &p));
        assert!(contains_point(&vertices([0, 0, 0], 0, 5), &p));
    }

    #[test]
    fn out_of_domain_is_rejected() {
        assert!(check_domain_f64(&na::Point3::new(-1.0, 0.0, 0.0)).is_err());
        assert!(check_domain_f64(&na::Point3::new(0.0, f64::from(DOMAIN_LEN), 0.0)).is_err());
        assert!(check_anchor([3, 0, 0], 20).is_err());
        assert!(check_anchor([0, 0, 0], 22).is_err());
    }

    proptest! {
        #[test]
        fn located_type_contains_the_point(
            x in 0f64..2_097_152.0,
            y in 0f64..2_097_152.0,
            z in 0f64..2_097_152.0,
            level in 0u8..=21,
        ) {
            let h = f64::from(cell_len(level));
            let anchor = [
                ((x / h).floor() * h) as u32,
                ((y / h).floor() * h) as u32,
                ((z / h).floor() * h) as u32,
            ];
            let kind = locate_kind(
                x - f64::from(anchor[0]),
                y - f64::from(anchor[1]),
                z - f64::from(anchor[2]),
            );
            let verts = vertices(anchor, level, kind);
            prop_assert!(contains_point(&verts, &na::Point3::new(x, y, z)));
        }
    }
}
