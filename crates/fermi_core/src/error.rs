//! Fatal field-construction errors and the advisory conditions collected
//! while an analysis runs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures that make a k-point cloud unusable as an interpolation domain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("at least 4 distinct k-points are required to tetrahedralize, got {0}")]
    InsufficientPoints(usize),
    #[error("k-point cloud is degenerate ({0}); no tetrahedralization exists")]
    DegenerateGeometry(String),
    #[error("scalar length ({got}) does not match the number of field vertices ({expected})")]
    ScalarLengthMismatch { expected: usize, got: usize },
    #[error("non-finite value in {0}")]
    NonFiniteInput(&'static str),
}

/// Non-fatal conditions surfaced next to partial results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisWarning {
    /// The band does not cross the isovalue inside the sampled region.
    NoIntersection { band: usize, spin: usize },
    /// Fewer k-points than the reliability threshold.
    LowDensity { kpoints: usize, threshold: usize },
    /// Small surface combined with aggressive smoothing.
    Distortion {
        band: usize,
        spin: usize,
        volume_percent: f64,
        iterations: usize,
    },
    /// No band crosses the Fermi level in any spin channel.
    Insulating,
    /// A slice rotation fell back to the identity.
    SliceAlignmentDegenerate { stage: AlignmentStage },
    /// Both spin channels carry identical energies; only spin up is processed.
    DegenerateSpinSkipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentStage {
    /// Plane normal onto the z axis.
    Normal,
    /// Projected first reciprocal axis onto the in-plane reference direction.
    InPlane,
}

impl std::fmt::Display for AnalysisWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisWarning::NoIntersection { band, spin } => {
                write!(f, "band {band} (spin {spin}) does not cross the isovalue")
            }
            AnalysisWarning::LowDensity { kpoints, threshold } => write!(
                f,
                "k-point density is relatively low ({kpoints} < {threshold}), results may not be accurate"
            ),
            AnalysisWarning::Distortion {
                band,
                spin,
                volume_percent,
                iterations,
            } => write!(
                f,
                "band {band} (spin {spin}) fills {volume_percent:.3}% of the zone; {iterations} smoothing passes may distort it"
            ),
            AnalysisWarning::Insulating => {
                write!(f, "material is insulating, no Fermi surfaces to display")
            }
            AnalysisWarning::SliceAlignmentDegenerate { stage } => {
                write!(f, "slice rotation ({stage:?}) is degenerate, identity substituted")
            }
            AnalysisWarning::DegenerateSpinSkipped => {
                write!(f, "spin channels are degenerate, spin down skipped")
            }
        }
    }
}
