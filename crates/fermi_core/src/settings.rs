//! Analysis configuration.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::classify::{ELECTRON_COLOR, HOLE_COLOR};
use crate::replicate::SupercellCentering;

pub const DEFAULT_SURFACE_COLORS: [&str; 5] = ["#0081a7", "#eb8258", "#f6f740", "#3cdbd3", "#e3d7ff"];

/// Which Fermi-crossing bands to process. Indices count the crossing bands of
/// each spin channel from 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "indices", rename_all = "snake_case")]
pub enum BandSelection {
    #[default]
    All,
    Indices(Vec<usize>),
}

impl BandSelection {
    pub fn includes(&self, surface_index: usize) -> bool {
        match self {
            BandSelection::All => true,
            BandSelection::Indices(indices) => indices.contains(&surface_index),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpinSelection {
    Up,
    Down,
    #[default]
    Both,
}

impl SpinSelection {
    pub fn includes(self, spin: usize) -> bool {
        match self {
            SpinSelection::Up => spin == 0,
            SpinSelection::Down => spin == 1,
            SpinSelection::Both => spin < 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupercellSpec {
    pub dims: [usize; 3],
    #[serde(default)]
    pub centering: SupercellCentering,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceSettings {
    pub miller: [i32; 3],
    /// In-plane target for the first reciprocal axis; chosen from the Miller
    /// indices when absent.
    #[serde(default)]
    pub reference_direction: Option<[f64; 3]>,
    #[serde(default)]
    pub correction_degrees: f64,
    #[serde(default = "default_grid_resolution")]
    pub grid_resolution: usize,
}

fn default_grid_resolution() -> usize {
    300
}

impl SliceSettings {
    pub fn new(miller: [i32; 3]) -> Self {
        Self {
            miller,
            reference_direction: None,
            correction_degrees: 0.0,
            grid_resolution: default_grid_resolution(),
        }
    }
}

/// Display style assigned to one surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceStyle {
    pub color: [f64; 4],
    pub opacity: f64,
}

/// Per-surface colors and opacities, cycled by surface position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfacePalette {
    pub colors: Vec<[f64; 4]>,
    pub opacities: Vec<f64>,
    /// Spin up red, spin down blue, overriding `colors`.
    #[serde(default)]
    pub color_by_spin: bool,
}

impl Default for SurfacePalette {
    fn default() -> Self {
        Self {
            colors: DEFAULT_SURFACE_COLORS
                .iter()
                .filter_map(|hex| hex_color(hex))
                .collect(),
            opacities: vec![1.0],
            color_by_spin: false,
        }
    }
}

impl SurfacePalette {
    /// Style of the `position`-th processed surface.
    pub fn style(&self, position: usize, spin: usize) -> SurfaceStyle {
        let color = if self.color_by_spin {
            if spin == 0 {
                ELECTRON_COLOR
            } else {
                HOLE_COLOR
            }
        } else if self.colors.is_empty() {
            [1.0, 1.0, 1.0, 1.0]
        } else {
            self.colors[position % self.colors.len()]
        };
        let opacity = if self.opacities.is_empty() {
            1.0
        } else {
            self.opacities[position % self.opacities.len()]
        };
        SurfaceStyle { color, opacity }
    }
}

/// `#rrggbb` to RGBA in `[0, 1]` with alpha 1.
pub fn hex_color(hex: &str) -> Option<[f64; 4]> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| -> Option<f64> {
        u8::from_str_radix(&digits[range], 16)
            .ok()
            .map(|v| f64::from(v) / 255.0)
    };
    Some([channel(0..2)?, channel(2..4)?, channel(4..6)?, 1.0])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    pub smoothing_iterations: usize,
    /// Isovalue relative to the Fermi energy, in eV.
    pub isovalue_offset: f64,
    pub bands: BandSelection,
    pub spins: SpinSelection,
    pub supercell: Option<SupercellSpec>,
    pub slice: Option<SliceSettings>,
    pub electron_hole: bool,
    pub velocity: bool,
    pub dry_run: bool,
    /// Cut surfaces against the zone faces.
    pub clip_to_zone: bool,
    pub palette: SurfacePalette,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            smoothing_iterations: 10,
            isovalue_offset: 0.0,
            bands: BandSelection::All,
            spins: SpinSelection::Both,
            supercell: None,
            slice: None,
            electron_hole: false,
            velocity: false,
            dry_run: false,
            clip_to_zone: true,
            palette: SurfacePalette::default(),
        }
    }
}

impl AnalysisSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.isovalue_offset.is_finite() {
            bail!("Isovalue offset must be finite.");
        }
        if let Some(supercell) = &self.supercell {
            if supercell.dims.iter().any(|&d| d == 0) {
                bail!(
                    "Supercell dimensions must be positive, got {:?}.",
                    supercell.dims
                );
            }
        }
        if let Some(slice) = &self.slice {
            if slice.miller == [0, 0, 0] {
                bail!("Slice Miller indices must not all be zero.");
            }
            if !slice.correction_degrees.is_finite() {
                bail!("Slice correction angle must be finite.");
            }
            if slice.grid_resolution < 2 {
                bail!("Slice grid resolution must be at least 2.");
            }
            if let Some(direction) = slice.reference_direction {
                if direction.iter().any(|v| !v.is_finite()) || direction.iter().all(|&v| v == 0.0) {
                    bail!("Slice reference direction must be finite and non-zero.");
                }
            }
        }
        if self
            .palette
            .opacities
            .iter()
            .any(|o| !(0.0..=1.0).contains(o))
        {
            bail!("Surface opacities must lie in [0, 1].");
        }
        Ok(())
    }
}
