//! Moving per-vertex field quantities onto surface points with a Gaussian
//! kernel of fixed radius.

use rustc_hash::FxHashMap;

use crate::surface::PointData;

pub const GAUSSIAN_SHARPNESS: f64 = 2.0;
/// Value given to targets with no source inside the radius.
pub const NULL_VALUE: f64 = 0.0;

/// Uniform grid of point indices with cell size equal to the query radius, so
/// a radius query only visits the 27 surrounding cells.
#[derive(Debug, Clone)]
pub struct SpatialHash {
    cell_size: f64,
    cells: FxHashMap<[i64; 3], Vec<usize>>,
}

impl SpatialHash {
    pub fn new(points: &[[f64; 3]], cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            1.0
        };
        let mut cells: FxHashMap<[i64; 3], Vec<usize>> = FxHashMap::default();
        for (index, point) in points.iter().enumerate() {
            cells.entry(key(point, cell_size)).or_default().push(index);
        }
        Self { cell_size, cells }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Indices of every point within one cell of `point` along each axis.
    pub fn candidates(&self, point: &[f64; 3]) -> impl Iterator<Item = usize> + '_ {
        let center = key(point, self.cell_size);
        (-1..=1).flat_map(move |dx| {
            (-1..=1).flat_map(move |dy| {
                (-1..=1).flat_map(move |dz| {
                    self.cells
                        .get(&[center[0] + dx, center[1] + dy, center[2] + dz])
                        .into_iter()
                        .flatten()
                        .copied()
                })
            })
        })
    }
}

fn key(point: &[f64; 3], cell_size: f64) -> [i64; 3] {
    [
        (point[0] / cell_size).floor() as i64,
        (point[1] / cell_size).floor() as i64,
        (point[2] / cell_size).floor() as i64,
    ]
}

/// Gaussian-weighted average of `data` (defined on `sources`) at each target.
///
/// Sources within `radius` contribute `exp(-(sharpness · r / radius)²)`,
/// normalised; targets without any source in range get [`NULL_VALUE`].
pub fn interpolate_onto_points(
    sources: &[[f64; 3]],
    data: &PointData,
    targets: &[[f64; 3]],
    radius: f64,
) -> PointData {
    let hash = SpatialHash::new(sources, radius);
    let radius = hash.cell_size();
    let width = data.width;
    let mut values = Vec::with_capacity(targets.len() * width);
    let mut accumulated = vec![0.0; width];

    for target in targets {
        accumulated.iter_mut().for_each(|v| *v = 0.0);
        let mut total_weight = 0.0;
        for index in hash.candidates(target) {
            let source = &sources[index];
            let distance = ((source[0] - target[0]).powi(2)
                + (source[1] - target[1]).powi(2)
                + (source[2] - target[2]).powi(2))
            .sqrt();
            if distance > radius {
                continue;
            }
            let weight = (-(GAUSSIAN_SHARPNESS * distance / radius).powi(2)).exp();
            total_weight += weight;
            for (acc, value) in accumulated.iter_mut().zip(data.get(index)) {
                *acc += weight * value;
            }
        }
        if total_weight > 0.0 {
            values.extend(accumulated.iter().map(|v| v / total_weight));
        } else {
            values.extend(std::iter::repeat(NULL_VALUE).take(width));
        }
    }

    PointData {
        name: data.name.clone(),
        width,
        values,
    }
}
