//! Laplacian relaxation of surface vertices toward their neighbor centroids.

use crate::surface::Surface;

/// Fraction of the way each vertex moves toward its neighbor centroid per pass.
pub const DEFAULT_RELAXATION: f64 = 0.01;

/// `iterations` passes of Laplacian smoothing with [`DEFAULT_RELAXATION`].
pub fn smooth(surface: &Surface, iterations: usize) -> Surface {
    smooth_with_relaxation(surface, iterations, DEFAULT_RELAXATION)
}

/// Laplacian smoothing with an explicit relaxation factor in `[0, 1]`.
///
/// Only point positions change: point count, triangles and attributes are
/// carried over untouched. Vertices without neighbors stay put.
pub fn smooth_with_relaxation(surface: &Surface, iterations: usize, relaxation: f64) -> Surface {
    let relaxation = relaxation.clamp(0.0, 1.0);
    let mut result = surface.clone();
    if iterations == 0 || relaxation < 1e-12 || surface.is_empty() {
        return result;
    }

    let neighbors = vertex_neighbors(surface);
    for _ in 0..iterations {
        let current = &result.points;
        let next: Vec<[f64; 3]> = current
            .iter()
            .zip(&neighbors)
            .map(|(&point, ring)| {
                if ring.is_empty() {
                    return point;
                }
                let mut target = [0.0; 3];
                for &n in ring {
                    for c in 0..3 {
                        target[c] += current[n as usize][c];
                    }
                }
                let scale = 1.0 / ring.len() as f64;
                [
                    point[0] + relaxation * (target[0] * scale - point[0]),
                    point[1] + relaxation * (target[1] * scale - point[1]),
                    point[2] + relaxation * (target[2] * scale - point[2]),
                ]
            })
            .collect();
        result.points = next;
    }
    result
}

fn vertex_neighbors(surface: &Surface) -> Vec<Vec<u32>> {
    let mut neighbors = vec![Vec::new(); surface.points.len()];
    for (a, b) in surface.edges() {
        neighbors[a as usize].push(b);
        neighbors[b as usize].push(a);
    }
    neighbors
}
