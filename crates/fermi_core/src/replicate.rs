//! Periodic copies of a finished surface for supercell display.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::surface::Surface;

/// Placement of the cell indices `0..N` along each axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupercellCentering {
    /// `i - (N - 1) / 2`: copies symmetric about the origin.
    #[default]
    Symmetric,
    /// `i - (N / 2 - 1)` for even `N`, `i - (N - 1) / 2` for odd `N`.
    Legacy,
}

impl SupercellCentering {
    fn shift(self, index: usize, count: usize) -> f64 {
        let i = index as f64;
        let n = count as f64;
        match self {
            SupercellCentering::Symmetric => i - (n - 1.0) / 2.0,
            SupercellCentering::Legacy if count % 2 == 0 => i - (n / 2.0 - 1.0),
            SupercellCentering::Legacy => i - (n - 1.0) / 2.0,
        }
    }
}

/// Fractional offsets of every copy, `i` slowest and `k` fastest.
pub fn supercell_offsets(dims: [usize; 3], centering: SupercellCentering) -> Vec<[f64; 3]> {
    let mut offsets = Vec::with_capacity(dims.iter().product());
    for i in 0..dims[0] {
        for j in 0..dims[1] {
            for k in 0..dims[2] {
                offsets.push([
                    centering.shift(i, dims[0]),
                    centering.shift(j, dims[1]),
                    centering.shift(k, dims[2]),
                ]);
            }
        }
    }
    offsets
}

/// Translate `surface` by `i·b1 + j·b2 + k·b3` for every supercell offset.
pub fn replicate(
    surface: &Surface,
    dims: [usize; 3],
    reciprocal_basis: &[[f64; 3]; 3],
    centering: SupercellCentering,
) -> Vec<Surface> {
    let basis = reciprocal_basis.map(Vector3::from);
    supercell_offsets(dims, centering)
        .into_iter()
        .map(|[i, j, k]| surface.translated(basis[0] * i + basis[1] * j + basis[2] * k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{box_surface, PointData};

    const BASIS: [[f64; 3]; 3] = [[2.0, 0.0, 0.0], [0.0, 3.0, 0.0], [1.0, 0.0, 4.0]];

    #[test]
    fn two_cubed_supercell_is_centered_on_the_origin() {
        let origin = Surface::new(vec![[0.0; 3]], Vec::new());
        let copies = replicate(&origin, [2, 2, 2], &BASIS, SupercellCentering::Symmetric);
        assert_eq!(copies.len(), 8);
        let b = BASIS.map(Vector3::from);
        for (copy, [i, j, k]) in copies.iter().zip(supercell_offsets([2, 2, 2], SupercellCentering::Symmetric)) {
            for c in [i, j, k] {
                assert!(c == -0.5 || c == 0.5);
            }
            let expected = b[0] * i + b[1] * j + b[2] * k;
            assert!((copy.point(0) - expected).norm() < 1e-12);
        }
    }

    #[test]
    fn legacy_centering_shifts_even_counts() {
        let offsets = supercell_offsets([2, 3, 1], SupercellCentering::Legacy);
        let xs: Vec<f64> = offsets.iter().map(|o| o[0]).collect();
        assert!(xs.iter().all(|&x| x == 0.0 || x == 1.0));
        let ys: Vec<f64> = offsets.iter().take(3).map(|o| o[1]).collect();
        assert_eq!(ys, vec![-1.0, 0.0, 1.0]);
        assert!(offsets.iter().all(|o| o[2] == 0.0));
    }

    #[test]
    fn replication_is_rigid() {
        let mut cube = box_surface([0.0; 3], [0.5; 3]);
        cube.set_attribute(PointData::scalar("energy", vec![0.1; 8]));
        for copy in replicate(&cube, [3, 1, 2], &BASIS, SupercellCentering::Symmetric) {
            assert_eq!(copy.triangles, cube.triangles);
            assert_eq!(copy.point_data, cube.point_data);
            assert!((copy.area() - cube.area()).abs() < 1e-12);
            for (a, b) in copy.edges().iter().zip(cube.edges()) {
                let moved = (copy.point(a.0 as usize) - copy.point(a.1 as usize)).norm();
                let original = (cube.point(b.0 as usize) - cube.point(b.1 as usize)).norm();
                assert!((moved - original).abs() < 1e-12);
            }
        }
    }
}
