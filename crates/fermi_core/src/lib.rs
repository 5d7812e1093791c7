/// The `fermi_core` crate turns band energies sampled on an irregular k-point
/// cloud into Fermi surfaces and their derived views.
///
/// Key components:
/// - **Field**: Delaunay tetrahedralization of the k-points with a swappable per-band scalar.
/// - **Isosurface**: Marching tetrahedra, Laplacian smoothing and half-space clipping to the zone.
/// - **Derived quantities**: Gradient, divergence and Laplacian operators, Fermi velocity and
///   electron/hole classification.
/// - **Slice**: Plane frames from Miller indices, field sections and 2D contours.
/// - **Pipeline**: `analyze` runs every selected band and spin and collects records and warnings.
pub mod bands;
pub mod classify;
pub mod clipping;
pub mod tessellation;
pub mod derived;
pub mod error;
pub mod field;
pub mod interpolate;
pub mod isosurface;
pub mod pipeline;
pub mod replicate;
pub mod settings;
pub mod slice;
pub mod smoothing;
pub mod surface;
pub mod zone;

pub use bands::{BandDataset, BandSummary, OrbitalProjections};
pub use error::{AnalysisWarning, FieldError};
pub use field::{FieldHandle, TetMesh};
pub use pipeline::{analyze, AnalysisReport, SurfaceRecord};
pub use settings::AnalysisSettings;
pub use surface::{PointData, Surface};
pub use zone::Polyhedron;
