//! Planar cross-sections through the origin of reciprocal space.
//!
//! A [`SliceFrame`] rotates the cutting plane onto `z = 0` so every section
//! (zone outline, field, surfaces) is reported in the same 2D coordinates.

use anyhow::{bail, Result};
use delaunay::prelude::{ConvexHull, DelaunayTriangulation, FacetView, RobustKernel, Vertex};
use delaunay::vertex;
use log::warn;
use nalgebra::{Matrix3, Vector3};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{AlignmentStage, AnalysisWarning, FieldError};
use crate::field::FieldHandle;
use crate::isosurface::{extract, interpolate_factor};
use crate::surface::{PointData, Surface};
use crate::zone::{Polyhedron, SpecialPoint};

const PARALLEL_EPS: f64 = 1e-12;
const MIN_ROTATION_DET: f64 = 1e-3;
const HULL_EPS: f64 = 1e-9;
/// Special points closer than this to the plane are reported in 2D.
pub const IN_PLANE_TOLERANCE: f64 = 1e-3;
const SECTION_VALUE: &str = "section_value";

pub type Segment2 = [[f64; 2]; 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceFrame {
    pub miller: [i32; 3],
    /// Unit plane normal in Cartesian reciprocal coordinates.
    pub normal: [f64; 3],
    /// Row-major rotation taking the plane onto `z = 0`.
    pub rotation: [[f64; 3]; 3],
    /// Zone cross-section as a counter-clockwise convex loop.
    pub outline: Vec<[f64; 2]>,
}

impl SliceFrame {
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|r, c| self.rotation[r][c])
    }

    /// In-plane coordinates of `point` after rotation.
    pub fn project(&self, point: &[f64; 3]) -> [f64; 2] {
        let rotated = self.matrix() * Vector3::from(*point);
        [rotated.x, rotated.y]
    }

    pub fn signed_distance(&self, point: &[f64; 3]) -> f64 {
        Vector3::from(self.normal).dot(&Vector3::from(*point))
    }

    /// `(min, max)` over both outline coordinates.
    pub fn extent(&self) -> Option<(f64, f64)> {
        let mut values = self.outline.iter().flatten().copied();
        let first = values.next()?;
        Some(values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

/// Rodrigues rotation taking direction `from` onto direction `to`.
///
/// Returns the identity for already-parallel inputs and `None` when no
/// well-defined rotation exists: zero-length or anti-parallel inputs, or a
/// numerically broken result.
pub fn rotation_aligning(from: &Vector3<f64>, to: &Vector3<f64>) -> Option<Matrix3<f64>> {
    let (from_norm, to_norm) = (from.norm(), to.norm());
    if from_norm <= PARALLEL_EPS || to_norm <= PARALLEL_EPS {
        return None;
    }
    let a = from / from_norm;
    let b = to / to_norm;
    let axis = a.cross(&b);
    let sine = axis.norm();
    let cosine = a.dot(&b);
    if sine <= PARALLEL_EPS {
        return (cosine > 0.0).then(Matrix3::identity);
    }
    let skew = axis.cross_matrix();
    let rotation = Matrix3::identity() + skew + skew * skew * ((1.0 - cosine) / (sine * sine));
    if rotation.iter().any(|v| !v.is_finite()) || rotation.determinant().abs() < MIN_ROTATION_DET {
        return None;
    }
    Some(rotation)
}

/// In-plane target for the projected first reciprocal axis.
pub fn default_reference_direction(miller: [i32; 3]) -> [f64; 3] {
    if miller == [1, 0, 0] {
        [0.0, 1.0, 0.0]
    } else {
        [1.0, 0.0, 0.0]
    }
}

fn rotation_about_z(degrees: f64) -> Matrix3<f64> {
    let (s, c) = degrees.to_radians().sin_cos();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

/// Frame for the lattice plane `miller` through the origin of `zone`.
///
/// The rotation is `Rc · R2 · R1`: `R1` takes the normal onto `z`, `R2` turns
/// the projected first reciprocal axis onto `reference_direction`, and `Rc`
/// applies `correction_degrees` about `z`. Degenerate stages fall back to the
/// identity and are reported as warnings.
pub fn build_frame(
    miller: [i32; 3],
    zone: &Polyhedron,
    reference_direction: Option<[f64; 3]>,
    correction_degrees: f64,
) -> Result<(SliceFrame, Vec<AnalysisWarning>)> {
    if miller == [0, 0, 0] {
        bail!("Slice Miller indices must not all be zero.");
    }
    if !correction_degrees.is_finite() {
        bail!("Slice correction angle must be finite.");
    }
    let basis: Vec<Vector3<f64>> = zone
        .reciprocal_basis
        .iter()
        .map(|row| Vector3::from(*row))
        .collect();
    let normal = basis
        .iter()
        .zip(miller)
        .fold(Vector3::zeros(), |acc, (b, m)| acc + b * m as f64);
    let Some(normal) = normal.try_normalize(PARALLEL_EPS) else {
        bail!("Slice plane normal vanishes for Miller indices {miller:?}.");
    };

    let mut warnings = Vec::new();
    let r1 = rotation_aligning(&normal, &Vector3::z()).unwrap_or_else(|| {
        warnings.push(AnalysisWarning::SliceAlignmentDegenerate {
            stage: AlignmentStage::Normal,
        });
        Matrix3::identity()
    });

    let kx = basis[0].normalize();
    let in_plane = r1 * (kx - normal * kx.dot(&normal));
    let target = Vector3::from(reference_direction.unwrap_or_else(|| default_reference_direction(miller)));
    let r2 = rotation_aligning(&in_plane, &target).unwrap_or_else(|| {
        warnings.push(AnalysisWarning::SliceAlignmentDegenerate {
            stage: AlignmentStage::InPlane,
        });
        Matrix3::identity()
    });
    for warning in &warnings {
        warn!("{warning}");
    }

    let rotation = rotation_about_z(correction_degrees) * r2 * r1;
    let mut frame = SliceFrame {
        miller,
        normal: [normal.x, normal.y, normal.z],
        rotation: [
            [rotation[(0, 0)], rotation[(0, 1)], rotation[(0, 2)]],
            [rotation[(1, 0)], rotation[(1, 1)], rotation[(1, 2)]],
            [rotation[(2, 0)], rotation[(2, 1)], rotation[(2, 2)]],
        ],
        outline: Vec::new(),
    };
    frame.outline = zone_outline(&frame, zone);
    Ok((frame, warnings))
}

/// Zone boundary ∩ plane, projected and ordered as a convex loop.
pub fn zone_outline(frame: &SliceFrame, zone: &Polyhedron) -> Vec<[f64; 2]> {
    let crossings: Vec<[f64; 2]> = plane_segments(frame, &zone.boundary_mesh())
        .into_iter()
        .flatten()
        .collect();
    convex_hull(crossings).unwrap_or_else(|e| {
        warn!("zone outline unavailable for plane {:?}: {e}", frame.miller);
        Vec::new()
    })
}

/// Surface ∩ plane as projected segments.
pub fn slice_surface(frame: &SliceFrame, surface: &Surface) -> Vec<Segment2> {
    plane_segments(frame, surface)
}

fn plane_segments(frame: &SliceFrame, surface: &Surface) -> Vec<Segment2> {
    let distances: Vec<f64> = surface
        .points
        .iter()
        .map(|p| frame.signed_distance(p))
        .collect();
    let mut segments = Vec::new();
    for tri in &surface.triangles {
        let mut ends: Vec<[f64; 2]> = Vec::with_capacity(2);
        for corner in 0..3 {
            let a = tri[corner] as usize;
            let b = tri[(corner + 1) % 3] as usize;
            if (distances[a] >= 0.0) == (distances[b] >= 0.0) {
                continue;
            }
            let t = interpolate_factor(distances[a], distances[b]);
            let pa = Vector3::from(surface.points[a]);
            let pb = Vector3::from(surface.points[b]);
            let p = pa + (pb - pa) * t;
            ends.push(frame.project(&[p.x, p.y, p.z]));
        }
        if let [start, end] = ends[..] {
            segments.push([start, end]);
        }
    }
    segments
}

/// Counter-clockwise hull loop of `points` with collinear boundary points
/// pruned, read off the boundary of their planar Delaunay triangulation.
fn convex_hull(mut points: Vec<[f64; 2]>) -> Result<Vec<[f64; 2]>, FieldError> {
    points.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
    points.dedup_by(|a, b| (a[0] - b[0]).abs() < HULL_EPS && (a[1] - b[1]).abs() < HULL_EPS);
    if points.len() < 3 {
        return Ok(points);
    }
    let last = points.len() - 1;
    let (first_point, last_point) = (points[0], points[last]);
    let area = |i: usize| turn(first_point, last_point, points[i]).abs();
    let apex = match (1..last).max_by(|&i, &j| area(i).total_cmp(&area(j))) {
        Some(i) if area(i) > HULL_EPS => i,
        _ => return Ok(vec![first_point, last_point]),
    };

    // The crate seeds its triangulation with the first three vertices.
    let mut order: Vec<usize> = vec![0, last, apex];
    order.extend((1..last).filter(|&i| i != apex));
    let vertices: Vec<Vertex<f64, usize, 2>> =
        order.iter().map(|&i| vertex!(points[i], i)).collect();
    let dt: DelaunayTriangulation<RobustKernel<f64>, usize, (), 2> =
        DelaunayTriangulation::with_kernel(RobustKernel::new(), &vertices)
            .map_err(|e| FieldError::DegenerateGeometry(e.to_string()))?;
    let hull = ConvexHull::from_triangulation(dt.triangulation())
        .map_err(|e| FieldError::DegenerateGeometry(e.to_string()))?;

    let index_of = |vertex: &Vertex<f64, usize, 2>| {
        vertex.data.ok_or_else(|| {
            FieldError::DegenerateGeometry("hull vertex lost its index".to_string())
        })
    };
    let mut next: FxHashMap<usize, usize> = FxHashMap::default();
    for handle in hull.facets() {
        let facet = FacetView::new(dt.tds(), handle.cell_key(), handle.facet_index())
            .map_err(|e| FieldError::DegenerateGeometry(e.to_string()))?;
        let ends = facet
            .vertices()
            .map_err(|e| FieldError::DegenerateGeometry(e.to_string()))?
            .map(index_of)
            .collect::<Result<Vec<usize>, FieldError>>()?;
        let inside = facet
            .opposite_vertex()
            .map_err(|e| FieldError::DegenerateGeometry(e.to_string()))
            .and_then(index_of)?;
        let [a, b] = ends[..] else {
            return Err(FieldError::DegenerateGeometry(format!(
                "hull edge with {} vertices",
                ends.len()
            )));
        };
        // Interior on the left walks the boundary counter-clockwise.
        if turn(points[a], points[b], points[inside]) > 0.0 {
            next.insert(a, b);
        } else {
            next.insert(b, a);
        }
    }

    // The lexicographically smallest point is always a hull vertex.
    let mut chain = vec![0usize];
    while chain.len() <= next.len() {
        let Some(&following) = next.get(&chain[chain.len() - 1]) else {
            return Err(FieldError::DegenerateGeometry("open hull boundary".to_string()));
        };
        if following == 0 {
            break;
        }
        chain.push(following);
    }

    let loop_points: Vec<[f64; 2]> = chain.iter().map(|&i| points[i]).collect();
    let n = loop_points.len();
    Ok((0..n)
        .filter(|&i| {
            let (before, after) = (loop_points[(i + n - 1) % n], loop_points[(i + 1) % n]);
            turn(before, loop_points[i], after) > HULL_EPS
        })
        .map(|i| loop_points[i])
        .collect())
}

fn turn(o: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

/// Special points lying in the plane, projected.
pub fn in_plane_points(frame: &SliceFrame, points: &[SpecialPoint]) -> Vec<(String, [f64; 2])> {
    points
        .iter()
        .filter(|point| frame.signed_distance(&point.position).abs() < IN_PLANE_TOLERANCE)
        .map(|point| (point.label.clone(), frame.project(&point.position)))
        .collect()
}

/// Planar triangulation of the field on the slicing plane, in frame coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSection {
    pub points: Vec<[f64; 2]>,
    pub triangles: Vec<[u32; 3]>,
    pub values: Vec<f64>,
}

/// Tetrahedra ∩ plane with the active scalar linearly interpolated.
pub fn slice_field(field: &FieldHandle, frame: &SliceFrame) -> Result<FieldSection, FieldError> {
    let distances: Vec<f64> = field
        .mesh()
        .points()
        .iter()
        .map(|p| frame.signed_distance(&[p.x, p.y, p.z]))
        .collect();
    let mut plane_field = field.rebind(&distances)?;
    plane_field.set_point_data(PointData::scalar(SECTION_VALUE, field.sample().to_vec()))?;
    let section = extract(&plane_field, 0.0);
    let values = section
        .attribute(SECTION_VALUE)
        .map(|data| data.values.clone())
        .unwrap_or_default();
    Ok(FieldSection {
        points: section.points.iter().map(|p| frame.project(p)).collect(),
        triangles: section.triangles,
        values,
    })
}

/// Square `N × N` sampling of a section; `values[j * N + i]` sits at `(xs[i], ys[j])`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionGrid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub values: Vec<f64>,
}

/// Linear resampling of `section` on a regular grid over `[lo, hi]²`; nodes
/// outside every section triangle get `fill`.
pub fn resample_section(
    section: &FieldSection,
    resolution: usize,
    (lo, hi): (f64, f64),
    fill: f64,
) -> SectionGrid {
    let n = resolution.max(2);
    let step = (hi - lo) / (n - 1) as f64;
    let axis: Vec<f64> = (0..n).map(|i| lo + step * i as f64).collect();
    let mut values = vec![fill; n * n];
    let mut assigned = vec![false; n * n];

    let node_range = |min: f64, max: f64| -> (usize, usize) {
        if step <= 0.0 {
            return (0, n - 1);
        }
        let first = ((min - lo) / step).floor().max(0.0) as usize;
        let last = (((max - lo) / step).ceil().max(0.0) as usize).min(n - 1);
        (first, last)
    };

    for tri in &section.triangles {
        let [a, b, c] = tri.map(|i| section.points[i as usize]);
        let [va, vb, vc] = tri.map(|i| section.values[i as usize]);
        let det = (b[1] - c[1]) * (a[0] - c[0]) + (c[0] - b[0]) * (a[1] - c[1]);
        if det.abs() <= 1e-18 {
            continue;
        }
        let (i0, i1) = node_range(a[0].min(b[0]).min(c[0]), a[0].max(b[0]).max(c[0]));
        let (j0, j1) = node_range(a[1].min(b[1]).min(c[1]), a[1].max(b[1]).max(c[1]));
        for j in j0..=j1 {
            for i in i0..=i1 {
                let index = j * n + i;
                if assigned[index] {
                    continue;
                }
                let (x, y) = (axis[i], axis[j]);
                let wa = ((b[1] - c[1]) * (x - c[0]) + (c[0] - b[0]) * (y - c[1])) / det;
                let wb = ((c[1] - a[1]) * (x - c[0]) + (a[0] - c[0]) * (y - c[1])) / det;
                let wc = 1.0 - wa - wb;
                if wa < -1e-12 || wb < -1e-12 || wc < -1e-12 {
                    continue;
                }
                values[index] = wa * va + wb * vb + wc * vc;
                assigned[index] = true;
            }
        }
    }

    SectionGrid {
        xs: axis.clone(),
        ys: axis,
        values,
    }
}

/// Marching-squares contour of `grid` at `level`.
pub fn contour_grid(grid: &SectionGrid, level: f64) -> Vec<Segment2> {
    let nx = grid.xs.len();
    let ny = grid.ys.len();
    let index = |ix: usize, iy: usize| -> usize { ix + iy * nx };
    let mut segments = Vec::new();
    for iy in 0..ny.saturating_sub(1) {
        let (y0, y1) = (grid.ys[iy], grid.ys[iy + 1]);
        for ix in 0..nx.saturating_sub(1) {
            let (x0, x1) = (grid.xs[ix], grid.xs[ix + 1]);
            let v0 = grid.values[index(ix, iy)] - level;
            let v1 = grid.values[index(ix + 1, iy)] - level;
            let v2 = grid.values[index(ix + 1, iy + 1)] - level;
            let v3 = grid.values[index(ix, iy + 1)] - level;

            let mut case_index = 0u8;
            for (bit, value) in [v0, v1, v2, v3].into_iter().enumerate() {
                if value >= 0.0 {
                    case_index |= 1 << bit;
                }
            }
            let square = Square { x0, x1, y0, y1, values: [v0, v1, v2, v3] };
            for (edge_a, edge_b) in marching_squares_edge_pairs(case_index) {
                segments.push([square.edge_point(*edge_a), square.edge_point(*edge_b)]);
            }
        }
    }
    segments
}

fn marching_squares_edge_pairs(case_index: u8) -> &'static [(u8, u8)] {
    match case_index {
        1 | 14 => &[(3, 0)],
        2 | 13 => &[(0, 1)],
        3 | 12 => &[(3, 1)],
        4 | 11 => &[(1, 2)],
        5 => &[(3, 2), (0, 1)],
        6 | 9 => &[(0, 2)],
        7 | 8 => &[(3, 2)],
        10 => &[(0, 3), (1, 2)],
        _ => &[],
    }
}

struct Square {
    x0: f64,
    x1: f64,
    y0: f64,
    y1: f64,
    values: [f64; 4],
}

impl Square {
    fn edge_point(&self, edge: u8) -> [f64; 2] {
        let [v0, v1, v2, v3] = self.values;
        match edge {
            0 => [self.x0 + (self.x1 - self.x0) * interpolate_factor(v0, v1), self.y0],
            1 => [self.x1, self.y0 + (self.y1 - self.y0) * interpolate_factor(v1, v2)],
            2 => [self.x1 + (self.x0 - self.x1) * interpolate_factor(v2, v3), self.y1],
            _ => [self.x0, self.y1 + (self.y0 - self.y1) * interpolate_factor(v3, v0)],
        }
    }
}
