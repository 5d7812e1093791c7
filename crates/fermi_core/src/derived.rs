//! Gradients, Laplacians and group velocities of a tetrahedral field.

use log::debug;
use nalgebra::{Matrix3, Vector3};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::field::{FieldHandle, TetMesh};

/// eV·Å to m/s: `e · 1e-10 / ħ`.
pub const VELOCITY_CONVERSION: f64 = 1.6e-19 * 1e-10 / 1.05e-34;

/// Upper bound of the point-transfer radius, in reciprocal-space units.
pub const MAX_CAPTURE_RADIUS: f64 = 0.2;

/// Per-vertex gradient as a sparse `(3n × n)` linear map; row `3v + c` holds
/// component `c` at vertex `v`.
///
/// Each tetrahedron contributes its constant gradient to its four vertices,
/// and vertex gradients average the contributions of the adjacent cells.
#[derive(Debug, Clone)]
pub struct GradientOperator {
    matrix: CsrMatrix<f64>,
    vertex_count: usize,
}

impl GradientOperator {
    pub fn assemble(mesh: &TetMesh) -> Self {
        let n = mesh.vertex_count();
        let coords = mesh.points();

        let mut degree = vec![0usize; n];
        for tet in mesh.tetrahedra() {
            for &v in tet {
                degree[v] += 1;
            }
        }

        let mut coo = CooMatrix::new(3 * n, n);
        let mut singular = 0usize;
        for tet in mesh.tetrahedra() {
            let Some(weights) = barycentric_gradients(tet, coords) else {
                singular += 1;
                continue;
            };
            for &v in tet {
                let share = 1.0 / degree[v] as f64;
                for (corner, weight) in tet.iter().zip(weights.iter()) {
                    for c in 0..3 {
                        coo.push(3 * v + c, *corner, weight[c] * share);
                    }
                }
            }
        }
        if singular > 0 {
            debug!("gradient operator skipped {singular} singular tetrahedra");
        }
        Self {
            matrix: CsrMatrix::from(&coo),
            vertex_count: n,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Gradient of the per-vertex scalar `values`.
    pub fn apply(&self, values: &[f64]) -> Vec<[f64; 3]> {
        let mut out = vec![[0.0; 3]; self.vertex_count];
        for (row_index, row) in self.matrix.row_iter().enumerate() {
            let sum: f64 = row
                .col_indices()
                .iter()
                .zip(row.values())
                .map(|(&col, &weight)| weight * values[col])
                .sum();
            out[row_index / 3][row_index % 3] = sum;
        }
        out
    }
}

/// Gradients of the four linear shape functions of a tetrahedron, or `None`
/// for a flat cell.
fn barycentric_gradients(tet: &[usize; 4], coords: &[Vector3<f64>]) -> Option<[Vector3<f64>; 4]> {
    let origin = coords[tet[0]];
    let edges = Matrix3::from_columns(&[
        coords[tet[1]] - origin,
        coords[tet[2]] - origin,
        coords[tet[3]] - origin,
    ]);
    // Rows of the inverse are the shape-function gradients of vertices 1..3.
    let inverse = edges.try_inverse()?;
    let g1 = inverse.row(0).transpose();
    let g2 = inverse.row(1).transpose();
    let g3 = inverse.row(2).transpose();
    Some([-(g1 + g2 + g3), g1, g2, g3])
}

/// Per-vertex gradient of the active scalar.
pub fn gradient(field: &FieldHandle) -> Vec<[f64; 3]> {
    field.mesh().gradient_operator().apply(field.sample())
}

/// Per-vertex divergence of a vector field defined on the vertices of `mesh`.
pub fn divergence(mesh: &TetMesh, vectors: &[[f64; 3]]) -> Vec<f64> {
    let operator = mesh.gradient_operator();
    let mut out = vec![0.0; mesh.vertex_count()];
    for c in 0..3 {
        let component: Vec<f64> = vectors.iter().map(|v| v[c]).collect();
        for (acc, grad) in out.iter_mut().zip(operator.apply(&component)) {
            *acc += grad[c];
        }
    }
    out
}

/// Laplacian `∇·(∇E)` of the active scalar.
pub fn laplacian(field: &FieldHandle) -> Vec<f64> {
    divergence(field.mesh(), &gradient(field))
}

/// Group-velocity magnitude in m/s from energy gradients in eV·Å.
pub fn velocity_magnitude(gradients: &[[f64; 3]]) -> Vec<f64> {
    gradients
        .iter()
        .map(|g| Vector3::from(*g).norm() * VELOCITY_CONVERSION)
        .collect()
}

/// Zero every value above `mean + multiplier · stddev` (population stddev).
pub fn suppress_outliers(values: &[f64], multiplier: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let threshold = mean + multiplier * variance.sqrt();
    values
        .iter()
        .map(|&v| if v > threshold { 0.0 } else { v })
        .collect()
}

/// Neighborhood radius for moving vertex quantities onto a surface: twice the
/// largest reciprocal-vector spacing of the sampling grid, capped at
/// [`MAX_CAPTURE_RADIUS`].
pub fn capture_radius(reciprocal_basis: &[[f64; 3]; 3], grid: [usize; 3]) -> f64 {
    let spacing = reciprocal_basis
        .iter()
        .map(|row| {
            row.iter()
                .zip(grid)
                .map(|(component, divisions)| component / divisions.max(1) as f64)
                .sum::<f64>()
        })
        .fold(f64::NEG_INFINITY, f64::max);
    let radius = 2.0 * spacing;
    if !radius.is_finite() || radius <= 0.0 {
        return MAX_CAPTURE_RADIUS;
    }
    radius.min(MAX_CAPTURE_RADIUS)
}
