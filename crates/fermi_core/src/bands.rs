//! Band energies on the k-point sample and Fermi-level bookkeeping.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::classify::{aggregate_populations, default_category_basis, CategoryGrouping, OrbitalChannel};

const DEGENERACY_TOLERANCE: f64 = 1e-9;

/// Orbital-projected populations used for category coloring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbitalProjections {
    pub orbitals: Vec<OrbitalChannel>,
    /// `populations[spin][band][k][orbital]`.
    pub populations: Vec<Vec<Vec<Vec<f64>>>>,
    #[serde(default)]
    pub grouping: CategoryGrouping,
    /// One RGBA color per category; the default cycle when absent.
    #[serde(default)]
    pub basis: Option<Vec<[f64; 4]>>,
}

impl OrbitalProjections {
    /// Category weights per k-point for one band.
    pub fn category_weights(&self, spin: usize, band: usize) -> Vec<Vec<f64>> {
        self.populations
            .get(spin)
            .and_then(|bands| bands.get(band))
            .map(|rows| aggregate_populations(&self.orbitals, rows, self.grouping))
            .unwrap_or_default()
    }

    pub fn category_basis(&self) -> Vec<[f64; 4]> {
        self.basis.clone().unwrap_or_else(|| {
            default_category_basis(self.grouping.category_count(&self.orbitals))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandDataset {
    pub kpoints: Vec<[f64; 3]>,
    /// `energies[spin][band][k]` in eV.
    pub energies: Vec<Vec<Vec<f64>>>,
    pub fermi_energy: f64,
    /// Monkhorst-Pack divisions along each reciprocal axis.
    pub grid: [usize; 3],
    #[serde(default)]
    pub projections: Option<OrbitalProjections>,
}

/// Energy range of one band in one spin channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandSummary {
    pub band: usize,
    pub spin: usize,
    pub min: f64,
    pub max: f64,
    pub bandwidth: f64,
}

impl BandDataset {
    pub fn validate(&self) -> Result<()> {
        let kpoint_count = self.kpoints.len();
        if self.energies.is_empty() || self.energies.len() > 2 {
            bail!(
                "Expected 1 or 2 spin channels, got {}.",
                self.energies.len()
            );
        }
        if !self.fermi_energy.is_finite() {
            bail!("Fermi energy must be finite.");
        }
        if self.grid.iter().any(|&g| g == 0) {
            bail!("Monkhorst-Pack grid must be positive, got {:?}.", self.grid);
        }
        for (spin, bands) in self.energies.iter().enumerate() {
            for (band, values) in bands.iter().enumerate() {
                if values.len() != kpoint_count {
                    bail!(
                        "Band {band} (spin {spin}) has {} energies for {kpoint_count} k-points.",
                        values.len()
                    );
                }
                if values.iter().any(|v| !v.is_finite()) {
                    bail!("Band {band} (spin {spin}) contains non-finite energies.");
                }
            }
        }
        if let Some(projections) = &self.projections {
            for (spin, bands) in projections.populations.iter().enumerate() {
                for (band, rows) in bands.iter().enumerate() {
                    if rows.len() != kpoint_count {
                        bail!("Projections for band {band} (spin {spin}) do not cover every k-point.");
                    }
                    if rows.iter().any(|row| row.len() != projections.orbitals.len()) {
                        bail!("Projections for band {band} (spin {spin}) do not match the orbital list.");
                    }
                }
            }
        }
        Ok(())
    }

    pub fn spin_count(&self) -> usize {
        self.energies.len()
    }

    pub fn band_energies(&self, spin: usize, band: usize) -> &[f64] {
        &self.energies[spin][band]
    }

    /// Energies of one band relative to the Fermi level.
    pub fn relative_energies(&self, spin: usize, band: usize) -> Vec<f64> {
        self.energies[spin][band]
            .iter()
            .map(|e| e - self.fermi_energy)
            .collect()
    }

    pub fn summary(&self, spin: usize, band: usize) -> BandSummary {
        let values = self.band_energies(spin, band);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        BandSummary {
            band,
            spin,
            min,
            max,
            bandwidth: max - min,
        }
    }

    /// Bands of `spin` whose range contains `E_F + offset`, in band order.
    pub fn crossing_bands(&self, spin: usize, offset: f64) -> Vec<usize> {
        let level = self.fermi_energy + offset;
        (0..self.energies[spin].len())
            .filter(|&band| {
                let summary = self.summary(spin, band);
                summary.min <= level && level <= summary.max
            })
            .collect()
    }

    /// Summaries of every crossing band, spin up first.
    pub fn crossing_summaries(&self, offset: f64) -> Vec<BandSummary> {
        (0..self.spin_count())
            .flat_map(|spin| {
                self.crossing_bands(spin, offset)
                    .into_iter()
                    .map(move |band| (spin, band))
            })
            .map(|(spin, band)| self.summary(spin, band))
            .collect()
    }

    pub fn is_metallic(&self, offset: f64) -> bool {
        (0..self.spin_count()).any(|spin| !self.crossing_bands(spin, offset).is_empty())
    }

    /// Two spin channels carrying the same energies.
    pub fn spin_degenerate(&self) -> bool {
        let [up, down] = match self.energies.as_slice() {
            [up, down] => [up, down],
            _ => return false,
        };
        up.len() == down.len()
            && up.iter().zip(down).all(|(a, b)| {
                a.iter()
                    .zip(b)
                    .all(|(x, y)| (x - y).abs() <= DEGENERACY_TOLERANCE)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> BandDataset {
        BandDataset {
            kpoints: vec![[0.0; 3], [0.5, 0.0, 0.0], [0.0, 0.5, 0.0]],
            energies: vec![vec![
                vec![-5.0, -4.0, -3.0],
                vec![-1.0, 0.5, 1.0],
                vec![2.0, 3.0, 4.0],
            ]],
            fermi_energy: 0.0,
            grid: [4, 4, 4],
            projections: None,
        }
    }

    #[test]
    fn crossing_bands_bracket_the_fermi_level() {
        let data = dataset();
        data.validate().expect("dataset is valid");
        assert_eq!(data.crossing_bands(0, 0.0), vec![1]);
        assert_eq!(data.crossing_bands(0, 2.5), vec![2]);
        assert!(data.is_metallic(0.0));
        assert!(!data.is_metallic(-2.0));
        let summary = data.summary(0, 1);
        assert_eq!((summary.min, summary.max, summary.bandwidth), (-1.0, 1.0, 2.0));
    }

    #[test]
    fn identical_spin_channels_are_degenerate() {
        let mut data = dataset();
        assert!(!data.spin_degenerate());
        data.energies.push(data.energies[0].clone());
        assert!(data.spin_degenerate());
        data.energies[1][1][0] += 0.1;
        assert!(!data.spin_degenerate());
        assert_eq!(data.crossing_summaries(0.0).len(), 2);
    }

    #[test]
    fn shape_mismatches_are_reported() {
        let mut data = dataset();
        data.energies[0][2].pop();
        let err = data.validate().expect_err("short band");
        assert!(err.to_string().contains("Band 2"), "{err}");
    }

    #[test]
    fn relative_energies_subtract_fermi_level() {
        let mut data = dataset();
        data.fermi_energy = 1.0;
        assert_eq!(data.relative_energies(0, 1), vec![-2.0, -0.5, 0.0]);
    }
}
