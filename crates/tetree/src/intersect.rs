//! Exact-enough intersection predicates between tetrahedral cells and query boxes.
//!
//! Region queries over-approximate with SFC ranges and then apply these per-cell tests.
//! Two convex bodies intersect iff a vertex of one lies in the other or an edge of one
//! crosses the other, so the test below is a cascade of cheap rejections followed by
//! segment clipping.

use nalgebra as na;
use rstar::{AABB, Envelope};

use crate::connectivity::{EDGE_VERTICES, FACE_CORNERS};
use crate::geometry::contains_point;
use crate::tet::Tet;

/// Bounding box of the tetrahedron itself (not its cube).
pub fn tet_aabb(tet: &Tet) -> AABB<[f64; 3]> {
    let verts = tet.vertices();
    let mut lower = [f64::INFINITY; 3];
    let mut upper = [f64::NEG_INFINITY; 3];
    for v in verts {
        for a in 0..3 {
            lower[a] = lower[a].min(f64::from(v[a]));
            upper[a] = upper[a].max(f64::from(v[a]));
        }
    }
    AABB::from_corners(lower, upper)
}

/// All four vertices inside the box.
pub fn tet_contained_in_aabb(tet: &Tet, aabb: &AABB<[f64; 3]>) -> bool {
    tet.vertices().into_iter().all(|v| {
        aabb.contains_point(&[f64::from(v[0]), f64::from(v[1]), f64::from(v[2])])
    })
}

/// Solid-solid intersection between the tetrahedron and the box.
pub fn tet_intersects_aabb(tet: &Tet, aabb: &AABB<[f64; 3]>) -> bool {
    if !tet_aabb(tet).intersects(aabb) {
        return false;
    }
    let verts = tet.vertices();
    for v in verts {
        if aabb.contains_point(&[f64::from(v[0]), f64::from(v[1]), f64::from(v[2])]) {
            return true;
        }
    }
    for corner in box_corners(aabb) {
        if contains_point(&verts, &na::Point3::new(corner[0], corner[1], corner[2])) {
            return true;
        }
    }
    // Boundary crossings: tet edges against the box, box edges against the tet.
    let fverts: [[f64; 3]; 4] =
        std::array::from_fn(|i| [f64::from(verts[i][0]), f64::from(verts[i][1]), f64::from(verts[i][2])]);
    for [a, b] in EDGE_VERTICES {
        if segment_intersects_aabb(fverts[a as usize], fverts[b as usize], aabb) {
            return true;
        }
    }
    for (a, b) in box_edges(aabb) {
        if segment_intersects_tet(a, b, &fverts) {
            return true;
        }
    }
    false
}

fn box_corners(aabb: &AABB<[f64; 3]>) -> [[f64; 3]; 8] {
    let l = aabb.lower();
    let u = aabb.upper();
    std::array::from_fn(|i| {
        [
            if i & 1 == 0 { l[0] } else { u[0] },
            if i & 2 == 0 { l[1] } else { u[1] },
            if i & 4 == 0 { l[2] } else { u[2] },
        ]
    })
}

fn box_edges(aabb: &AABB<[f64; 3]>) -> Vec<([f64; 3], [f64; 3])> {
    let c = box_corners(aabb);
    let pairs = [
        (0, 1),
        (2, 3),
        (4, 5),
        (6, 7),
        (0, 2),
        (1, 3),
        (4, 6),
        (5, 7),
        (0, 4),
        (1, 5),
        (2, 6),
        (3, 7),
    ];
    pairs.into_iter().map(|(a, b)| (c[a], c[b])).collect()
}

/// Slab test of a segment against the box.
fn segment_intersects_aabb(a: [f64; 3], b: [f64; 3], aabb: &AABB<[f64; 3]>) -> bool {
    let l = aabb.lower();
    let u = aabb.upper();
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for axis in 0..3 {
        let d = b[axis] - a[axis];
        if d.abs() < f64::EPSILON {
            if a[axis] < l[axis] || a[axis] > u[axis] {
                return false;
            }
            continue;
        }
        let mut near = (l[axis] - a[axis]) / d;
        let mut far = (u[axis] - a[axis]) / d;
        if near > far {
            std::mem::swap(&mut near, &mut far);
        }
        t0 = t0.max(near);
        t1 = t1.min(far);
        if t0 > t1 {
            return false;
        }
    }
    true
}

/// Clips a segment against the four face half-spaces of the tetrahedron.
fn segment_intersects_tet(a: [f64; 3], b: [f64; 3], verts: &[[f64; 3]; 4]) -> bool {
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for (f, corners) in FACE_CORNERS.iter().enumerate() {
        let p0 = verts[corners[0] as usize];
        let p1 = verts[corners[1] as usize];
        let p2 = verts[corners[2] as usize];
        let mut n = cross(sub(p1, p0), sub(p2, p0));
        let mut offset = dot(n, p0);
        // Orient the half-space towards the opposite vertex.
        if dot(n, verts[f]) < offset {
            n = [-n[0], -n[1], -n[2]];
            offset = -offset;
        }
        let da = dot(n, a) - offset;
        let db = dot(n, b) - offset;
        let delta = db - da;
        if delta.abs() < f64::EPSILON {
            if da < 0.0 {
                return false;
            }
            continue;
        }
        let t = -da / delta;
        if delta > 0.0 {
            // Entering the half-space at t.
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return false;
        }
    }
    true
}

#[inline]
fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
