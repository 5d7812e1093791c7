//! Convex Brillouin-zone (or primitive-cell) polyhedra.

use anyhow::{bail, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::clipping::HalfSpace;
use crate::surface::Surface;

/// A planar boundary face: a point on it, its outward unit normal and its
/// polygon as indices into [`Polyhedron::vertices`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneFace {
    pub origin: [f64; 3],
    pub normal: [f64; 3],
    pub polygon: Vec<usize>,
}

/// A labelled high-symmetry k-point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialPoint {
    pub label: String,
    pub position: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyhedron {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<ZoneFace>,
    /// Rows are the reciprocal lattice vectors `b1, b2, b3`.
    pub reciprocal_basis: [[f64; 3]; 3],
    #[serde(default)]
    pub special_points: Vec<SpecialPoint>,
}

impl Polyhedron {
    /// The primitive reciprocal cell spanned by `b1, b2, b3` from the origin.
    pub fn parallelepiped(reciprocal_basis: [[f64; 3]; 3]) -> Self {
        let b: Vec<Vector3<f64>> = reciprocal_basis.iter().map(|r| Vector3::from(*r)).collect();
        let mut vertices = Vec::with_capacity(8);
        for corner in 0..8usize {
            let p = (0..3).fold(Vector3::zeros(), |acc, axis| {
                if corner & (1 << axis) != 0 {
                    acc + b[axis]
                } else {
                    acc
                }
            });
            vertices.push([p.x, p.y, p.z]);
        }
        let center = (b[0] + b[1] + b[2]) * 0.5;

        let polygons: [[usize; 4]; 6] = [
            [0, 2, 6, 4],
            [1, 5, 7, 3],
            [0, 4, 5, 1],
            [2, 3, 7, 6],
            [0, 1, 3, 2],
            [4, 6, 7, 5],
        ];
        let faces = polygons
            .iter()
            .map(|polygon| {
                let p0 = Vector3::from(vertices[polygon[0]]);
                let p1 = Vector3::from(vertices[polygon[1]]);
                let p2 = Vector3::from(vertices[polygon[2]]);
                let mut normal = (p1 - p0).cross(&(p2 - p0)).normalize();
                if normal.dot(&(p0 - center)) < 0.0 {
                    normal = -normal;
                }
                ZoneFace {
                    origin: vertices[polygon[0]],
                    normal: [normal.x, normal.y, normal.z],
                    polygon: polygon.to_vec(),
                }
            })
            .collect();

        Self {
            vertices,
            faces,
            reciprocal_basis,
            special_points: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.faces.len() < 4 {
            bail!("Zone polyhedron needs at least 4 faces, got {}.", self.faces.len());
        }
        for (index, face) in self.faces.iter().enumerate() {
            let norm = Vector3::from(face.normal).norm();
            if !norm.is_finite() || (norm - 1.0).abs() > 1e-6 {
                bail!("Face {index} normal must be a unit vector (norm {norm}).");
            }
            if face.polygon.len() < 3 {
                bail!("Face {index} polygon needs at least 3 vertices.");
            }
            if let Some(&bad) = face.polygon.iter().find(|&&v| v >= self.vertices.len()) {
                bail!("Face {index} references vertex {bad} out of range.");
            }
        }
        let det = nalgebra::Matrix3::from_rows(&[
            Vector3::from(self.reciprocal_basis[0]).transpose(),
            Vector3::from(self.reciprocal_basis[1]).transpose(),
            Vector3::from(self.reciprocal_basis[2]).transpose(),
        ])
        .determinant();
        if det.abs() < 1e-12 {
            bail!("Reciprocal basis is singular.");
        }
        Ok(())
    }

    /// One half-space per face, keeping the zone's interior.
    pub fn half_spaces(&self) -> Vec<HalfSpace> {
        self.faces
            .iter()
            .map(|face| HalfSpace::new(face.origin, face.normal))
            .collect()
    }

    /// Whether `point` lies inside or on the boundary.
    pub fn contains(&self, point: &[f64; 3], tolerance: f64) -> bool {
        self.half_spaces()
            .iter()
            .all(|h| h.signed_distance(point) <= tolerance)
    }

    /// Unique boundary edges as vertex index pairs.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        let mut edges: Vec<(usize, usize)> = self
            .faces
            .iter()
            .flat_map(|face| {
                let n = face.polygon.len();
                (0..n).map(move |i| {
                    let a = face.polygon[i];
                    let b = face.polygon[(i + 1) % n];
                    if a < b {
                        (a, b)
                    } else {
                        (b, a)
                    }
                })
            })
            .collect();
        edges.sort_unstable();
        edges.dedup();
        edges
    }

    /// Closed boundary mesh: every face polygon fan-triangulated and wound
    /// along its outward normal.
    pub fn boundary_mesh(&self) -> Surface {
        let mut triangles = Vec::new();
        for face in &self.faces {
            let normal = Vector3::from(face.normal);
            let anchor = face.polygon[0];
            for window in face.polygon[1..].windows(2) {
                let mut tri = [anchor as u32, window[0] as u32, window[1] as u32];
                let a = Vector3::from(self.vertices[tri[0] as usize]);
                let b = Vector3::from(self.vertices[tri[1] as usize]);
                let c = Vector3::from(self.vertices[tri[2] as usize]);
                if (b - a).cross(&(c - a)).dot(&normal) < 0.0 {
                    tri.swap(1, 2);
                }
                triangles.push(tri);
            }
        }
        Surface::new(self.vertices.clone(), triangles)
    }

    /// Volume of the polyhedron.
    pub fn volume(&self) -> f64 {
        self.boundary_mesh().enclosed_volume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipping::clip;

    const CUBIC: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    #[test]
    fn parallelepiped_matches_cell_volume() {
        let skew = [[1.0, 0.0, 0.0], [0.5, 1.0, 0.0], [0.0, 0.3, 2.0]];
        let cell = Polyhedron::parallelepiped(skew);
        cell.validate().expect("parallelepiped is valid");
        assert_eq!(cell.vertices.len(), 8);
        assert_eq!(cell.edges().len(), 12);
        assert!((cell.volume() - 2.0).abs() < 1e-12, "{}", cell.volume());
        assert!(cell.contains(&[0.75, 0.65, 1.0], 1e-12));
        assert!(!cell.contains(&[-0.1, 0.5, 1.0], 1e-12));
    }

    #[test]
    fn boundary_mesh_is_closed_and_survives_its_own_clip() {
        let cell = Polyhedron::parallelepiped(CUBIC);
        let mesh = cell.boundary_mesh();
        assert_eq!(mesh.boundary_edge_count(), 0);
        assert_eq!(mesh.triangles.len(), 12);
        let clipped = clip(&mesh, &cell.half_spaces());
        assert_eq!(clipped, mesh);
    }

    #[test]
    fn validate_rejects_bad_faces() {
        let mut cell = Polyhedron::parallelepiped(CUBIC);
        cell.faces[0].normal = [2.0, 0.0, 0.0];
        assert!(cell.validate().is_err());

        let mut cell = Polyhedron::parallelepiped(CUBIC);
        cell.faces[1].polygon.push(99);
        let err = cell.validate().expect_err("out of range vertex");
        assert!(err.to_string().contains("99"));
    }
}
