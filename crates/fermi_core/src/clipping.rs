//! Half-space clipping of triangulated surfaces.
//!
//! Sequential cuts against the faces of a convex polyhedron give the same
//! geometry in any order; non-convex face sets are not checked.

use nalgebra::Vector3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::surface::{PointData, Surface};

/// Points within this signed distance of a plane count as inside.
pub const PLANE_EPS: f64 = 1e-9;

/// The closed half-space `normal · (p - origin) <= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HalfSpace {
    pub origin: [f64; 3],
    pub normal: [f64; 3],
}

impl HalfSpace {
    pub fn new(origin: [f64; 3], normal: [f64; 3]) -> Self {
        Self { origin, normal }
    }

    pub fn signed_distance(&self, point: &[f64; 3]) -> f64 {
        let normal = Vector3::from(self.normal);
        normal.dot(&(Vector3::from(*point) - Vector3::from(self.origin)))
    }
}

/// Cut `surface` by each half-space in turn.
pub fn clip(surface: &Surface, half_spaces: &[HalfSpace]) -> Surface {
    half_spaces
        .iter()
        .fold(surface.clone(), |current, half_space| {
            clip_by_half_space(&current, half_space)
        })
}

/// Keep the part of `surface` inside `half_space`.
///
/// Triangles straddling the plane are cut along it; cut points are shared by
/// neighbouring triangles and carry linearly interpolated attributes.
pub fn clip_by_half_space(surface: &Surface, half_space: &HalfSpace) -> Surface {
    let distances: Vec<f64> = surface
        .points
        .iter()
        .map(|p| half_space.signed_distance(p))
        .collect();
    let outside = |v: u32| distances[v as usize] > PLANE_EPS;

    if !surface.triangles.iter().flatten().any(|&v| outside(v)) {
        return surface.clone();
    }

    let mut points = surface.points.clone();
    let mut cuts: Vec<(u32, u32, f64)> = Vec::new();
    let mut cut_lookup: FxHashMap<(u32, u32), u32> = FxHashMap::default();
    let mut triangles = Vec::with_capacity(surface.triangles.len());

    for tri in &surface.triangles {
        let outside_count = tri.iter().filter(|&&v| outside(v)).count();
        if outside_count == 0 {
            triangles.push(*tri);
            continue;
        }
        if outside_count == 3 {
            continue;
        }

        let mut polygon: Vec<u32> = Vec::with_capacity(4);
        for corner in 0..3 {
            let current = tri[corner];
            let next = tri[(corner + 1) % 3];
            if !outside(current) {
                polygon.push(current);
            }
            if outside(current) != outside(next) {
                let key = if current < next {
                    (current, next)
                } else {
                    (next, current)
                };
                let index = *cut_lookup.entry(key).or_insert_with(|| {
                    let (a, b) = key;
                    let da = distances[a as usize];
                    let db = distances[b as usize];
                    let t = da / (da - db);
                    let pa = Vector3::from(surface.points[a as usize]);
                    let pb = Vector3::from(surface.points[b as usize]);
                    let p = pa + (pb - pa) * t;
                    points.push([p.x, p.y, p.z]);
                    cuts.push((a, b, t));
                    (points.len() - 1) as u32
                });
                polygon.push(index);
            }
        }
        for i in 1..polygon.len().saturating_sub(1) {
            triangles.push([polygon[0], polygon[i], polygon[i + 1]]);
        }
    }

    let point_data = surface
        .point_data
        .iter()
        .map(|data| {
            let mut values = data.values.clone();
            for &(a, b, t) in &cuts {
                data.push_lerp(a as usize, b as usize, t, &mut values);
            }
            PointData {
                name: data.name.clone(),
                width: data.width,
                values,
            }
        })
        .collect();

    let mut clipped = Surface {
        points,
        triangles,
        point_data,
    };
    clipped.compact();
    clipped
}
