//! End-to-end Fermi-surface analysis of one band dataset.
//!
//! The field geometry is built once from all k-points; every selected
//! (spin, band) pair then runs extract, smooth, clip, classify and the
//! optional slice/replicate stages against it. Records come back in spin-major,
//! band-minor order whether or not the `parallel` feature is enabled.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::bands::{BandDataset, BandSummary};
use crate::classify::{classify_by_divergence, blend_colors, ClassificationResult, SurfaceColoring};
use crate::clipping::{clip, HalfSpace};
use crate::derived::{capture_radius, gradient, laplacian, suppress_outliers, velocity_magnitude};
use crate::error::AnalysisWarning;
use crate::field::FieldHandle;
use crate::interpolate::interpolate_onto_points;
use crate::isosurface::extract;
use crate::replicate::replicate;
use crate::settings::{AnalysisSettings, SurfaceStyle};
use crate::slice::{
    build_frame, contour_grid, in_plane_points, resample_section, slice_field, slice_surface,
    Segment2, SliceFrame,
};
use crate::smoothing::smooth;
use crate::surface::{PointData, Surface};
use crate::zone::Polyhedron;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Fewer k-points than this give unreliable surfaces.
pub const LOW_DENSITY_THRESHOLD: usize = 600;
pub const DISTORTION_VOLUME_PERCENT: f64 = 5.0;
pub const DISTORTION_SMOOTHING_PASSES: usize = 10;
pub const OUTLIER_MULTIPLIER: f64 = 1.0;

pub const FERMI_VELOCITY: &str = "fermi_velocity";
pub const LAPLACIAN: &str = "laplacian";
pub const CATEGORY_COLOR: &str = "category_color";

/// One processed Fermi surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceRecord {
    pub band_index: usize,
    pub spin_index: usize,
    /// Position among the Fermi-crossing bands of this spin channel.
    pub surface_index: usize,
    pub surface: Surface,
    /// Supercell translations of `surface`, empty unless requested.
    #[serde(default)]
    pub copies: Vec<Surface>,
    pub classification: Option<ClassificationResult>,
    pub volume_fraction_percent: f64,
    pub style: SurfaceStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub label: String,
    pub position: [f64; 2],
}

/// 2D contours of one band on the slicing plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceContour {
    pub band_index: usize,
    pub spin_index: usize,
    pub surface_index: usize,
    pub style: SurfaceStyle,
    /// Resampled field section contoured at the isovalue.
    pub field_contours: Vec<Segment2>,
    /// The clipped 3D surface cut by the plane.
    pub surface_segments: Vec<Segment2>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceOutput {
    pub frame: SliceFrame,
    pub special_points: Vec<ProjectedPoint>,
    pub contours: Vec<SliceContour>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub summaries: Vec<BandSummary>,
    pub records: Vec<SurfaceRecord>,
    pub slice: Option<SliceOutput>,
    pub warnings: Vec<AnalysisWarning>,
    /// Volume covered by the k-point tetrahedralization; `None` when no field was built.
    pub total_volume: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct SurfaceTask {
    spin: usize,
    band: usize,
    surface_index: usize,
    style: SurfaceStyle,
}

#[derive(Debug, Default)]
struct TaskOutput {
    record: Option<SurfaceRecord>,
    contour: Option<SliceContour>,
    warnings: Vec<AnalysisWarning>,
}

/// Shared, read-only inputs of every per-surface task.
struct TaskContext<'a> {
    data: &'a BandDataset,
    zone: &'a Polyhedron,
    settings: &'a AnalysisSettings,
    field: &'a FieldHandle,
    half_spaces: Vec<HalfSpace>,
    total_volume: f64,
    radius: f64,
    frame: Option<&'a SliceFrame>,
}

fn record_warning(warnings: &mut Vec<AnalysisWarning>, warning: AnalysisWarning) {
    warn!("{warning}");
    warnings.push(warning);
}

/// Run the full analysis. Fatal geometry and validation failures abort;
/// advisory conditions are collected into the report.
pub fn analyze(
    data: &BandDataset,
    zone: &Polyhedron,
    settings: &AnalysisSettings,
) -> Result<AnalysisReport> {
    settings.validate()?;
    data.validate()?;
    zone.validate()?;

    let mut report = AnalysisReport::default();
    let offset = settings.isovalue_offset;

    if data.kpoints.len() < LOW_DENSITY_THRESHOLD {
        record_warning(
            &mut report.warnings,
            AnalysisWarning::LowDensity {
                kpoints: data.kpoints.len(),
                threshold: LOW_DENSITY_THRESHOLD,
            },
        );
    }

    report.summaries = data.crossing_summaries(offset);
    for summary in &report.summaries {
        debug!(
            "band {} spin {}: {:.3} .. {:.3} eV (width {:.3})",
            summary.band, summary.spin, summary.min, summary.max, summary.bandwidth
        );
    }
    if !data.is_metallic(offset) {
        record_warning(&mut report.warnings, AnalysisWarning::Insulating);
        return Ok(report);
    }
    if settings.dry_run {
        return Ok(report);
    }

    let mut spins: Vec<usize> = (0..data.spin_count())
        .filter(|&spin| settings.spins.includes(spin))
        .collect();
    if data.spin_degenerate() && spins.contains(&1) {
        // Both channels hold the same bands; spin 0 stands in for either.
        spins = vec![0];
        record_warning(&mut report.warnings, AnalysisWarning::DegenerateSpinSkipped);
    }

    let tasks = plan_tasks(data, settings, &spins);

    let field = FieldHandle::build(&data.kpoints).context("Failed to build the interpolation field")?;
    let total_volume = field.total_volume();
    report.total_volume = Some(total_volume);

    let mut slice_output = None;
    if let Some(slice) = &settings.slice {
        let (frame, frame_warnings) = build_frame(
            slice.miller,
            zone,
            slice.reference_direction,
            slice.correction_degrees,
        )?;
        report.warnings.extend(frame_warnings);
        let special_points = in_plane_points(&frame, &zone.special_points)
            .into_iter()
            .map(|(label, position)| ProjectedPoint { label, position })
            .collect();
        slice_output = Some(SliceOutput {
            frame,
            special_points,
            contours: Vec::new(),
        });
    }

    let context = TaskContext {
        data,
        zone,
        settings,
        field: &field,
        half_spaces: zone.half_spaces(),
        total_volume,
        radius: capture_radius(&zone.reciprocal_basis, data.grid),
        frame: slice_output.as_ref().map(|s| &s.frame),
    };
    let outputs = run_tasks(&context, &tasks)?;

    let mut contours = Vec::new();
    for output in outputs {
        report.warnings.extend(output.warnings);
        report.records.extend(output.record);
        contours.extend(output.contour);
    }
    if let Some(slice) = slice_output.as_mut() {
        slice.contours = contours;
    }
    report.slice = slice_output;
    Ok(report)
}

/// Selected (spin, band) pairs; styles follow the position of each pair among
/// all crossing bands so a surface keeps its color when others are deselected.
fn plan_tasks(data: &BandDataset, settings: &AnalysisSettings, spins: &[usize]) -> Vec<SurfaceTask> {
    let mut tasks = Vec::new();
    let mut position = 0;
    for spin in 0..data.spin_count() {
        for (surface_index, band) in data
            .crossing_bands(spin, settings.isovalue_offset)
            .into_iter()
            .enumerate()
        {
            let style = settings.palette.style(position, spin);
            position += 1;
            if spins.contains(&spin) && settings.bands.includes(surface_index) {
                tasks.push(SurfaceTask {
                    spin,
                    band,
                    surface_index,
                    style,
                });
            }
        }
    }
    tasks
}

#[cfg(feature = "parallel")]
fn run_tasks(context: &TaskContext<'_>, tasks: &[SurfaceTask]) -> Result<Vec<TaskOutput>> {
    tasks
        .par_iter()
        .map(|task| process_surface(context, task))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn run_tasks(context: &TaskContext<'_>, tasks: &[SurfaceTask]) -> Result<Vec<TaskOutput>> {
    tasks
        .iter()
        .map(|task| process_surface(context, task))
        .collect()
}

fn process_surface(context: &TaskContext<'_>, task: &SurfaceTask) -> Result<TaskOutput> {
    let settings = context.settings;
    let isovalue = settings.isovalue_offset;
    let mut output = TaskOutput::default();

    let mut handle = context
        .field
        .rebind(&context.data.relative_energies(task.spin, task.band))
        .with_context(|| format!("Failed to bind band {} (spin {})", task.band, task.spin))?;

    let projections = context
        .data
        .projections
        .as_ref()
        .filter(|_| !settings.electron_hole && !settings.velocity);
    if let Some(projections) = projections {
        let colors = blend_colors(
            &projections.category_weights(task.spin, task.band),
            &projections.category_basis(),
        );
        if colors.len() == handle.mesh().vertex_count() {
            handle.set_point_data(PointData::rgba(CATEGORY_COLOR, &colors))?;
        }
    }

    if let Some(frame) = context.frame {
        output.contour = Some(slice_contours(context, &handle, frame, task)?);
    }

    let extracted = extract(&handle, isovalue);
    if extracted.is_empty() {
        record_warning(
            &mut output.warnings,
            AnalysisWarning::NoIntersection {
                band: task.band,
                spin: task.spin,
            },
        );
        return Ok(output);
    }
    let smoothed = smooth(&extracted, settings.smoothing_iterations);
    let mut surface = if settings.clip_to_zone {
        clip(&smoothed, &context.half_spaces)
    } else {
        smoothed
    };
    if surface.is_empty() {
        record_warning(
            &mut output.warnings,
            AnalysisWarning::NoIntersection {
                band: task.band,
                spin: task.spin,
            },
        );
        return Ok(output);
    }

    let volume_fraction_percent = 100.0 * surface.enclosed_volume() / context.total_volume;
    info!(
        "band {} spin {}: {:.3} % of the sampled volume",
        task.band, task.spin, volume_fraction_percent
    );
    if volume_fraction_percent < DISTORTION_VOLUME_PERCENT
        && settings.smoothing_iterations > DISTORTION_SMOOTHING_PASSES
    {
        record_warning(
            &mut output.warnings,
            AnalysisWarning::Distortion {
                band: task.band,
                spin: task.spin,
                volume_percent: volume_fraction_percent,
                iterations: settings.smoothing_iterations,
            },
        );
    }

    let classification = classify_surface(context, &handle, &mut surface);

    if let (Some(frame), Some(contour)) = (context.frame, output.contour.as_mut()) {
        contour.surface_segments = slice_surface(frame, &surface);
    }

    let copies = match &settings.supercell {
        Some(spec) => replicate(
            &surface,
            spec.dims,
            &context.zone.reciprocal_basis,
            spec.centering,
        ),
        None => Vec::new(),
    };

    output.record = Some(SurfaceRecord {
        band_index: task.band,
        spin_index: task.spin,
        surface_index: task.surface_index,
        surface,
        copies,
        classification,
        volume_fraction_percent,
        style: task.style,
    });
    Ok(output)
}

/// Coloring by electron/hole character, then velocity, then projected
/// weights; `None` leaves the surface in its palette color.
fn classify_surface(
    context: &TaskContext<'_>,
    handle: &FieldHandle,
    surface: &mut Surface,
) -> Option<ClassificationResult> {
    let settings = context.settings;
    let kpoints = &context.data.kpoints;

    if settings.electron_hole {
        let values = PointData::scalar(LAPLACIAN, laplacian(handle));
        let on_surface = interpolate_onto_points(kpoints, &values, &surface.points, context.radius);
        let carrier = classify_by_divergence(&on_surface.values);
        surface.set_attribute(on_surface);
        return Some(ClassificationResult {
            carrier: Some(carrier),
            coloring: SurfaceColoring::Uniform {
                color: carrier.color(),
            },
        });
    }

    if settings.velocity {
        let speeds = suppress_outliers(&velocity_magnitude(&gradient(handle)), OUTLIER_MULTIPLIER);
        let values = PointData::scalar(FERMI_VELOCITY, speeds);
        let on_surface = interpolate_onto_points(kpoints, &values, &surface.points, context.radius);
        let coloring = SurfaceColoring::Scalar {
            name: FERMI_VELOCITY.to_string(),
            values: on_surface.values.clone(),
        };
        surface.set_attribute(on_surface);
        return Some(ClassificationResult {
            carrier: None,
            coloring,
        });
    }

    let colors = surface.attribute(CATEGORY_COLOR)?;
    let colors = (0..colors.len())
        .map(|i| {
            let c = colors.get(i);
            [
                c[0].clamp(0.0, 1.0),
                c[1].clamp(0.0, 1.0),
                c[2].clamp(0.0, 1.0),
                1.0,
            ]
        })
        .collect();
    Some(ClassificationResult {
        carrier: None,
        coloring: SurfaceColoring::Rgba { colors },
    })
}

fn slice_contours(
    context: &TaskContext<'_>,
    handle: &FieldHandle,
    frame: &SliceFrame,
    task: &SurfaceTask,
) -> Result<SliceContour> {
    let isovalue = context.settings.isovalue_offset;
    let resolution = context
        .settings
        .slice
        .as_ref()
        .map_or(300, |slice| slice.grid_resolution);
    let section = slice_field(handle, frame)
        .with_context(|| format!("Failed to slice band {} (spin {})", task.band, task.spin))?;
    let field_contours = match frame.extent() {
        Some(extent) => {
            let grid = resample_section(&section, resolution, extent, isovalue + 1.0);
            contour_grid(&grid, isovalue)
        }
        None => Vec::new(),
    };
    Ok(SliceContour {
        band_index: task.band,
        spin_index: task.spin,
        surface_index: task.surface_index,
        style: task.style,
        field_contours,
        surface_segments: Vec::new(),
    })
}
