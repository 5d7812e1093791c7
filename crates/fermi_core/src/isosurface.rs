//! Marching-tetrahedra isosurface extraction.

use log::debug;
use nalgebra::Vector3;
use rustc_hash::FxHashMap;

use crate::field::FieldHandle;
use crate::surface::{PointData, Surface};

/// Name of the per-point scalar holding the field value on an extracted surface.
pub const ENERGY: &str = "energy";

/// Source of an output point: a field edge `(a, b)` at parameter `t`, or a
/// field vertex when `a == b`.
#[derive(Debug, Clone, Copy)]
struct EdgeSample {
    a: usize,
    b: usize,
    t: f64,
}

/// Triangles where the piecewise-linear field crosses `isovalue`.
///
/// Points on shared tetrahedron edges are shared between triangles and
/// triangles are wound so their normals point toward increasing field
/// values. Per-vertex arrays attached to the field are interpolated onto the
/// surface. A value that no tetrahedron brackets yields an empty surface.
pub fn extract(field: &FieldHandle, isovalue: f64) -> Surface {
    let mesh = field.mesh();
    let coords = mesh.points();
    let values = field.sample();

    let mut samples: Vec<EdgeSample> = Vec::new();
    let mut lookup: FxHashMap<(usize, usize), u32> = FxHashMap::default();
    let mut triangles: Vec<[u32; 3]> = Vec::new();

    let mut point_for = |a: usize, b: usize, samples: &mut Vec<EdgeSample>| -> u32 {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let t = interpolate_factor(values[lo] - isovalue, values[hi] - isovalue);
        let key = if t <= 0.0 {
            (lo, lo)
        } else if t >= 1.0 {
            (hi, hi)
        } else {
            (lo, hi)
        };
        *lookup.entry(key).or_insert_with(|| {
            samples.push(EdgeSample {
                a: key.0,
                b: key.1,
                t: if key.0 == key.1 { 0.0 } else { t },
            });
            (samples.len() - 1) as u32
        })
    };

    for tet in mesh.tetrahedra() {
        let (above, below): (Vec<usize>, Vec<usize>) =
            tet.iter().partition(|&&v| values[v] >= isovalue);
        let crossing = match (above.len(), below.len()) {
            (1, 3) => vec![[
                point_for(above[0], below[0], &mut samples),
                point_for(above[0], below[1], &mut samples),
                point_for(above[0], below[2], &mut samples),
            ]],
            (3, 1) => vec![[
                point_for(below[0], above[0], &mut samples),
                point_for(below[0], above[1], &mut samples),
                point_for(below[0], above[2], &mut samples),
            ]],
            (2, 2) => {
                let ac = point_for(above[0], below[0], &mut samples);
                let ad = point_for(above[0], below[1], &mut samples);
                let bd = point_for(above[1], below[1], &mut samples);
                let bc = point_for(above[1], below[0], &mut samples);
                vec![[ac, ad, bd], [ac, bd, bc]]
            }
            _ => continue,
        };

        let rising = centroid(coords, &above) - centroid(coords, &below);
        for mut tri in crossing {
            if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
                continue;
            }
            let p = tri.map(|i| sample_point(coords, samples[i as usize]));
            if (p[1] - p[0]).cross(&(p[2] - p[0])).dot(&rising) < 0.0 {
                tri.swap(1, 2);
            }
            triangles.push(tri);
        }
    }

    let points = samples
        .iter()
        .map(|&s| {
            let p = sample_point(coords, s);
            [p.x, p.y, p.z]
        })
        .collect();
    if triangles.is_empty() {
        return Surface::default();
    }
    let mut surface = Surface::new(points, triangles);
    surface.set_attribute(PointData::scalar(ENERGY, vec![isovalue; samples.len()]));
    for data in field.point_data() {
        let mut values = Vec::with_capacity(samples.len() * data.width);
        for s in &samples {
            data.push_lerp(s.a, s.b, s.t, &mut values);
        }
        surface.set_attribute(PointData {
            name: data.name.clone(),
            width: data.width,
            values,
        });
    }
    // Samples of dropped degenerate triangles.
    surface.compact();
    debug!(
        "isovalue {isovalue:.4}: {} points, {} triangles",
        surface.points.len(),
        surface.triangles.len()
    );
    surface
}

fn sample_point(coords: &[Vector3<f64>], sample: EdgeSample) -> Vector3<f64> {
    let a = coords[sample.a];
    let b = coords[sample.b];
    a + (b - a) * sample.t
}

fn centroid(coords: &[Vector3<f64>], indices: &[usize]) -> Vector3<f64> {
    indices.iter().fold(Vector3::zeros(), |acc, &i| acc + coords[i]) / indices.len() as f64
}

/// Parameter along `v0 -> v1` where the linear interpolant crosses zero.
pub(crate) fn interpolate_factor(v0: f64, v1: f64) -> f64 {
    let denominator = v0 - v1;
    if denominator.abs() <= 1e-12 {
        0.5
    } else {
        (v0 / denominator).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_field() -> FieldHandle {
        let mut points = Vec::new();
        for x in [0.0, 1.0] {
            for y in [0.0, 1.0] {
                for z in [0.0, 1.0] {
                    points.push([x, y, z]);
                }
            }
        }
        let mut field = FieldHandle::build(&points).expect("cube should build");
        let xs: Vec<f64> = points.iter().map(|p| p[0]).collect();
        field.set_scalar(&xs).expect("scalar binds");
        let ys: Vec<f64> = points.iter().map(|p| p[1]).collect();
        field
            .set_point_data(PointData::scalar("y", ys))
            .expect("point data binds");
        field
    }

    #[test]
    fn cube_with_linear_scalar_yields_unit_quad() {
        let surface = extract(&cube_field(), 0.5);
        assert!(!surface.is_empty());
        for p in &surface.points {
            assert!((p[0] - 0.5).abs() < 1e-12, "{p:?}");
            assert!((-1e-12..=1.0 + 1e-12).contains(&p[1]));
            assert!((-1e-12..=1.0 + 1e-12).contains(&p[2]));
        }
        assert!((surface.area() - 1.0).abs() < 1e-9, "area {}", surface.area());
        for tri in &surface.triangles {
            let [a, b, c] = tri.map(|i| surface.point(i as usize));
            assert!((b - a).cross(&(c - a)).x > 0.0, "normal should face +x");
        }
    }

    #[test]
    fn field_arrays_are_interpolated_onto_the_surface() {
        let surface = extract(&cube_field(), 0.25);
        let y = surface.attribute("y").expect("y carried");
        let energy = surface.attribute(ENERGY).expect("energy attached");
        assert_eq!(y.len(), surface.points.len());
        assert_eq!(energy.len(), surface.points.len());
        for (i, p) in surface.points.iter().enumerate() {
            assert!((y.get(i)[0] - p[1]).abs() < 1e-12);
            assert_eq!(energy.get(i)[0], 0.25);
        }
    }

    #[test]
    fn isovalue_outside_range_gives_empty_surface() {
        let field = cube_field();
        assert!(extract(&field, 1.5).is_empty());
        assert!(extract(&field, -0.1).is_empty());
        assert!(extract(&field, 1.5).points.is_empty());
    }
}
