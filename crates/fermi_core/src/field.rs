//! Piecewise-linear scalar field over a tetrahedralized k-point cloud.
//!
//! The geometry ([`TetMesh`]) is built once per k-point set and shared
//! behind an `Arc`; a [`FieldHandle`] pairs it with the active scalar (the
//! energy of one band/spin) and any extra per-vertex arrays. Switching bands
//! only swaps the scalar buffer.

use std::sync::{Arc, OnceLock};

use log::debug;
use nalgebra::Vector3;

use crate::tessellation::{signed_volume, tetrahedralize};
use crate::derived::GradientOperator;
use crate::error::FieldError;
use crate::surface::PointData;

/// Immutable tetrahedral decomposition of a point cloud.
#[derive(Debug)]
pub struct TetMesh {
    points: Vec<Vector3<f64>>,
    tetrahedra: Vec<[usize; 4]>,
    volumes: Vec<f64>,
    total_volume: f64,
    gradient: OnceLock<GradientOperator>,
}

impl TetMesh {
    pub fn build(points: &[[f64; 3]]) -> Result<Self, FieldError> {
        let points: Vec<Vector3<f64>> = points.iter().map(|p| Vector3::from(*p)).collect();
        let tetrahedra = tetrahedralize(&points)?;
        let volumes: Vec<f64> = tetrahedra
            .iter()
            .map(|tet| signed_volume(tet, &points))
            .collect();
        let total_volume = volumes.iter().sum();
        debug!(
            "field mesh: {} vertices, {} tetrahedra, volume {:.6}",
            points.len(),
            tetrahedra.len(),
            total_volume
        );
        Ok(Self {
            points,
            tetrahedra,
            volumes,
            total_volume,
            gradient: OnceLock::new(),
        })
    }

    pub fn points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    pub fn tetrahedra(&self) -> &[[usize; 4]] {
        &self.tetrahedra
    }

    pub fn volumes(&self) -> &[f64] {
        &self.volumes
    }

    pub fn vertex_count(&self) -> usize {
        self.points.len()
    }

    /// Sum of all tetrahedron volumes.
    pub fn total_volume(&self) -> f64 {
        self.total_volume
    }

    /// Gradient operator of this geometry, assembled on first use.
    pub fn gradient_operator(&self) -> &GradientOperator {
        self.gradient.get_or_init(|| GradientOperator::assemble(self))
    }
}

/// Shared field geometry plus the active per-vertex scalar.
#[derive(Debug, Clone)]
pub struct FieldHandle {
    mesh: Arc<TetMesh>,
    values: Vec<f64>,
    point_data: Vec<PointData>,
}

impl FieldHandle {
    /// Tetrahedralize `points`; the active scalar starts at zero.
    pub fn build(points: &[[f64; 3]]) -> Result<Self, FieldError> {
        Ok(Self::from_mesh(Arc::new(TetMesh::build(points)?)))
    }

    pub fn from_mesh(mesh: Arc<TetMesh>) -> Self {
        let values = vec![0.0; mesh.vertex_count()];
        Self {
            mesh,
            values,
            point_data: Vec::new(),
        }
    }

    /// Replace the active scalar. The geometry is untouched.
    pub fn set_scalar(&mut self, values: &[f64]) -> Result<(), FieldError> {
        self.check_length(values.len())?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FieldError::NonFiniteInput("field scalar"));
        }
        self.values.clear();
        self.values.extend_from_slice(values);
        Ok(())
    }

    /// Per-vertex active scalar.
    pub fn sample(&self) -> &[f64] {
        &self.values
    }

    /// A new handle over the same geometry bound to `values`, without extra arrays.
    pub fn rebind(&self, values: &[f64]) -> Result<FieldHandle, FieldError> {
        let mut handle = FieldHandle::from_mesh(Arc::clone(&self.mesh));
        handle.set_scalar(values)?;
        Ok(handle)
    }

    /// Attach a per-vertex array that extraction interpolates onto surfaces.
    pub fn set_point_data(&mut self, data: PointData) -> Result<(), FieldError> {
        self.check_length(data.len())?;
        if let Some(existing) = self.point_data.iter_mut().find(|d| d.name == data.name) {
            *existing = data;
        } else {
            self.point_data.push(data);
        }
        Ok(())
    }

    pub fn point_data(&self) -> &[PointData] {
        &self.point_data
    }

    pub fn mesh(&self) -> &TetMesh {
        &self.mesh
    }

    pub fn shared_mesh(&self) -> Arc<TetMesh> {
        Arc::clone(&self.mesh)
    }

    pub fn total_volume(&self) -> f64 {
        self.mesh.total_volume()
    }

    /// `(min, max)` of the active scalar over vertices used by a tetrahedron.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let mut range: Option<(f64, f64)> = None;
        for tet in self.mesh.tetrahedra() {
            for &v in tet {
                let value = self.values[v];
                range = Some(match range {
                    Some((lo, hi)) => (lo.min(value), hi.max(value)),
                    None => (value, value),
                });
            }
        }
        range
    }

    fn check_length(&self, got: usize) -> Result<(), FieldError> {
        let expected = self.mesh.vertex_count();
        if got != expected {
            return Err(FieldError::ScalarLengthMismatch { expected, got });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetra_points() -> Vec<[f64; 3]> {
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.3, 0.3, 0.3],
        ]
    }

    #[test]
    fn build_reports_positive_total_volume() {
        let field = FieldHandle::build(&tetra_points()).expect("field should build");
        assert!((field.total_volume() - 1.0 / 6.0).abs() < 1e-12);
        assert!(field.mesh().tetrahedra().len() >= 4);
    }

    #[test]
    fn set_scalar_rebinds_without_touching_geometry() {
        let mut field = FieldHandle::build(&tetra_points()).expect("field should build");
        let tets_before = field.mesh().tetrahedra().to_vec();
        field
            .set_scalar(&[0.0, 1.0, 2.0, 3.0, 4.0])
            .expect("scalar should bind");
        assert_eq!(field.sample(), &[0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(field.mesh().tetrahedra(), tets_before.as_slice());

        let other = field.rebind(&[5.0; 5]).expect("rebind");
        assert!(Arc::ptr_eq(&field.shared_mesh(), &other.shared_mesh()));
        assert_eq!(field.sample()[0], 0.0);
        assert_eq!(other.value_range(), Some((5.0, 5.0)));
    }

    #[test]
    fn set_scalar_rejects_wrong_length() {
        let mut field = FieldHandle::build(&tetra_points()).expect("field should build");
        let err = field.set_scalar(&[1.0, 2.0]).expect_err("length mismatch");
        assert_eq!(
            err,
            FieldError::ScalarLengthMismatch {
                expected: 5,
                got: 2
            }
        );
    }

    /// Fractional `n³` grid scaled by the rows of `basis`.
    fn basis_grid(basis: [[f64; 3]; 3], n: usize) -> Vec<[f64; 3]> {
        let step = 1.0 / (n - 1) as f64;
        let mut points = Vec::with_capacity(n * n * n);
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    let f = [i as f64 * step, j as f64 * step, k as f64 * step];
                    points.push(std::array::from_fn(|axis| {
                        (0..3).map(|row| f[row] * basis[row][axis]).sum::<f64>()
                    }));
                }
            }
        }
        points
    }

    fn assert_mesh_volume(basis: [[f64; 3]; 3], n: usize) {
        let field = FieldHandle::build(&basis_grid(basis, n)).expect("field should build");
        let expected = nalgebra::Matrix3::from_fn(|r, c| basis[r][c]).determinant().abs();
        assert!(
            (field.total_volume() - expected).abs() < 1e-6 * expected,
            "expected {expected}, got {}",
            field.total_volume()
        );
        assert!(field.mesh().volumes().iter().all(|&v| v > 0.0));
        assert_eq!(field.mesh().vertex_count(), n * n * n);
    }

    #[test]
    fn bcc_reciprocal_cell_mesh_has_the_cell_volume() {
        assert_mesh_volume([[-1.0, 1.0, 1.0], [1.0, -1.0, 1.0], [1.0, 1.0, -1.0]], 4);
    }

    #[test]
    fn fcc_reciprocal_cell_mesh_has_the_cell_volume() {
        assert_mesh_volume([[0.0, 1.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 0.0]], 4);
    }

    #[test]
    fn hexagonal_cell_mesh_has_the_cell_volume() {
        let s = 3.0_f64.sqrt() / 2.0;
        assert_mesh_volume([[1.0, 0.0, 0.0], [-0.5, s, 0.0], [0.0, 0.0, 0.6]], 5);
    }

    #[test]
    fn collinear_points_fail_with_degenerate_geometry() {
        let points: Vec<[f64; 3]> = (0..6).map(|i| [i as f64, 2.0 * i as f64, 0.0]).collect();
        let err = FieldHandle::build(&points).expect_err("collinear cloud");
        assert!(matches!(err, FieldError::DegenerateGeometry(_)));
    }
}
