//! Electron/hole labelling and per-point color blending.

use serde::{Deserialize, Serialize};

pub const ELECTRON_COLOR: [f64; 4] = [1.0, 0.0, 0.0, 1.0];
pub const HOLE_COLOR: [f64; 4] = [0.0, 0.0, 1.0, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierType {
    Electron,
    Hole,
}

impl CarrierType {
    pub fn color(self) -> [f64; 4] {
        match self {
            CarrierType::Electron => ELECTRON_COLOR,
            CarrierType::Hole => HOLE_COLOR,
        }
    }
}

/// How the points of a surface should be colored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SurfaceColoring {
    Uniform { color: [f64; 4] },
    Rgba { colors: Vec<[f64; 4]> },
    Scalar { name: String, values: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub carrier: Option<CarrierType>,
    pub coloring: SurfaceColoring,
}

/// Hole when the summed Laplacian over the surface is negative, electron otherwise.
pub fn classify_by_divergence(laplacian_on_surface: &[f64]) -> CarrierType {
    let total: f64 = laplacian_on_surface.iter().sum();
    if total < 0.0 {
        CarrierType::Hole
    } else {
        CarrierType::Electron
    }
}

/// Σ weight[c] · basis[c] per point, RGB clamped to `[0, 1]` and alpha 1.
pub fn blend_colors(weights: &[Vec<f64>], basis: &[[f64; 4]]) -> Vec<[f64; 4]> {
    weights
        .iter()
        .map(|point_weights| {
            let mut rgba = [0.0, 0.0, 0.0, 1.0];
            for (weight, color) in point_weights.iter().zip(basis) {
                for channel in 0..3 {
                    rgba[channel] += weight * color[channel];
                }
            }
            for channel in rgba.iter_mut().take(3) {
                *channel = channel.clamp(0.0, 1.0);
            }
            rgba
        })
        .collect()
}

/// Category colors cycling blue, red, green, yellow, purple, orange, black, cyan.
pub fn default_category_basis(categories: usize) -> Vec<[f64; 4]> {
    const CYCLE: [[f64; 4]; 8] = [
        [0.0, 0.0, 1.0, 1.0],
        [1.0, 0.0, 0.0, 1.0],
        [0.0, 0.501_960_784_313_725_5, 0.0, 1.0],
        [1.0, 1.0, 0.0, 1.0],
        [0.501_960_784_313_725_5, 0.0, 0.501_960_784_313_725_5, 1.0],
        [1.0, 0.647_058_823_529_411_8, 0.0, 1.0],
        [0.0, 0.0, 0.0, 1.0],
        [0.0, 1.0, 1.0, 1.0],
    ];
    (0..categories).map(|i| CYCLE[i % CYCLE.len()]).collect()
}

/// One projected orbital: its species (1-based) and angular momentum `l`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrbitalChannel {
    pub species: usize,
    pub angular_momentum: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryGrouping {
    /// s, p, d, f.
    #[default]
    AngularMomentum,
    Species,
}

impl CategoryGrouping {
    pub fn category_count(self, orbitals: &[OrbitalChannel]) -> usize {
        match self {
            CategoryGrouping::AngularMomentum => 4,
            CategoryGrouping::Species => orbitals.iter().map(|o| o.species).max().unwrap_or(0),
        }
    }
}

/// Per-point category weights from orbital populations.
///
/// `populations[k][o]` is the population of orbital `o` at point `k`. Rows are
/// normalised by their sum, summed into categories and clamped to `[0, 1]`.
pub fn aggregate_populations(
    orbitals: &[OrbitalChannel],
    populations: &[Vec<f64>],
    grouping: CategoryGrouping,
) -> Vec<Vec<f64>> {
    let categories = grouping.category_count(orbitals);
    populations
        .iter()
        .map(|row| {
            let mut weights = vec![0.0; categories];
            let norm: f64 = row.iter().sum();
            if norm.abs() <= f64::EPSILON || !norm.is_finite() {
                return weights;
            }
            for (orbital, population) in orbitals.iter().zip(row) {
                let category = match grouping {
                    CategoryGrouping::AngularMomentum => orbital.angular_momentum,
                    CategoryGrouping::Species => orbital.species.wrapping_sub(1),
                };
                if let Some(slot) = weights.get_mut(category) {
                    *slot += population / norm;
                }
            }
            for weight in &mut weights {
                *weight = weight.clamp(0.0, 1.0);
            }
            weights
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divergence_sign_decides_carrier() {
        assert_eq!(classify_by_divergence(&[0.5, 1.0, -0.2]), CarrierType::Electron);
        assert_eq!(classify_by_divergence(&[-0.5, 0.1]), CarrierType::Hole);
        assert_eq!(classify_by_divergence(&[]), CarrierType::Electron);
        assert_eq!(CarrierType::Hole.color(), HOLE_COLOR);
    }

    #[test]
    fn convex_weights_blend_inside_the_unit_cube() {
        let basis = [[1.0, 0.0, 0.0, 1.0], [0.0, 0.5, 1.0, 1.0], [0.2, 0.2, 0.2, 1.0]];
        let weights = vec![vec![0.2, 0.3, 0.5], vec![1.0, 0.0, 0.0]];
        let colors = blend_colors(&weights, &basis);
        let expected = [
            0.2 * 1.0 + 0.5 * 0.2,
            0.3 * 0.5 + 0.5 * 0.2,
            0.3 * 1.0 + 0.5 * 0.2,
        ];
        for channel in 0..3 {
            assert!((colors[0][channel] - expected[channel]).abs() < 1e-12);
            assert!((0.0..=1.0).contains(&colors[0][channel]));
        }
        assert_eq!(colors[0][3], 1.0);
        assert_eq!(colors[1], [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn oversaturated_blends_are_clamped() {
        let basis = [[1.0, 1.0, 0.0, 1.0], [1.0, 0.0, 0.0, 1.0]];
        let colors = blend_colors(&[vec![1.0, 1.0]], &basis);
        assert_eq!(colors[0], [1.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn populations_group_by_angular_momentum_and_species() {
        let orbitals = [
            OrbitalChannel { species: 1, angular_momentum: 0 },
            OrbitalChannel { species: 1, angular_momentum: 1 },
            OrbitalChannel { species: 2, angular_momentum: 1 },
            OrbitalChannel { species: 2, angular_momentum: 2 },
        ];
        let populations = vec![vec![1.0, 1.0, 1.0, 1.0], vec![0.0; 4]];
        let by_l = aggregate_populations(&orbitals, &populations, CategoryGrouping::AngularMomentum);
        assert_eq!(by_l[0], vec![0.25, 0.5, 0.25, 0.0]);
        assert_eq!(by_l[1], vec![0.0; 4]);
        let by_species = aggregate_populations(&orbitals, &populations, CategoryGrouping::Species);
        assert_eq!(by_species[0], vec![0.5, 0.5]);
    }

    #[test]
    fn default_basis_cycles() {
        let basis = default_category_basis(10);
        assert_eq!(basis.len(), 10);
        assert_eq!(basis[0], basis[8]);
        assert_eq!(basis[1], ELECTRON_COLOR);
    }
}
