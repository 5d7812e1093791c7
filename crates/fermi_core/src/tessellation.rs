//! Delaunay tetrahedralization of a scattered k-point cloud.
//!
//! Construction is delegated to the `delaunay` crate with its robust kernel,
//! so cospherical inputs (regular Monkhorst-Pack grids are full of them) still
//! give a conforming triangulation. Each vertex carries its input index as
//! vertex data. Duplicate coordinates are inserted once; the later copies stay
//! as unused field vertices.

use delaunay::prelude::{DelaunayTriangulation, RobustKernel, Vertex};
use delaunay::vertex;
use log::{debug, warn};
use nalgebra::Vector3;
use rustc_hash::FxHashMap;

use crate::error::FieldError;

const AFFINE_EPS: f64 = 1e-9;
const DUPLICATE_QUANTUM: f64 = 1e-9;
const FLAT_VOLUME_EPS: f64 = 1e-14;

type KPointTriangulation = DelaunayTriangulation<RobustKernel<f64>, usize, (), 3>;

/// Tetrahedralize `points`, returning positively oriented index quadruples
/// into `points`.
pub fn tetrahedralize(points: &[Vector3<f64>]) -> Result<Vec<[usize; 4]>, FieldError> {
    let n = points.len();
    if n < 4 {
        return Err(FieldError::InsufficientPoints(n));
    }
    if points.iter().any(|p| p.iter().any(|v| !v.is_finite())) {
        return Err(FieldError::NonFiniteInput("k-point coordinates"));
    }

    let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n as f64;
    let radius = points
        .iter()
        .map(|p| (p - centroid).norm())
        .fold(0.0_f64, f64::max);
    if radius <= f64::EPSILON {
        return Err(FieldError::DegenerateGeometry(
            "all points coincide".to_string(),
        ));
    }
    let coords: Vec<Vector3<f64>> = points.iter().map(|p| (p - centroid) / radius).collect();

    let mut order = unique_insertion_order(&coords);
    if order.len() < 4 {
        return Err(FieldError::InsufficientPoints(order.len()));
    }
    let simplex = spanning_simplex(&coords, &order)?;
    seed_with_simplex(&mut order, simplex);

    let vertices: Vec<Vertex<f64, usize, 3>> = order
        .iter()
        .map(|&index| {
            let p = coords[index];
            vertex!([p.x, p.y, p.z], index)
        })
        .collect();
    let dt: KPointTriangulation =
        DelaunayTriangulation::with_kernel(RobustKernel::new(), &vertices)
            .map_err(|e| FieldError::DegenerateGeometry(e.to_string()))?;
    if dt.number_of_vertices() < order.len() {
        warn!(
            "Delaunay construction skipped {} of {} unique k-points",
            order.len() - dt.number_of_vertices(),
            order.len()
        );
    }

    let tds = dt.tds();
    let mut tetrahedra = Vec::with_capacity(dt.number_of_cells());
    for (_, cell) in dt.cells() {
        let mut quad = [0usize; 4];
        for (slot, &key) in quad.iter_mut().zip(cell.vertices()) {
            *slot = tds
                .get_vertex_by_key(key)
                .and_then(|vertex| vertex.data)
                .ok_or_else(|| {
                    FieldError::DegenerateGeometry(
                        "triangulation cell references an unknown vertex".to_string(),
                    )
                })?;
        }
        let volume = signed_volume(&quad, &coords);
        if volume.abs() <= FLAT_VOLUME_EPS {
            continue;
        }
        if volume < 0.0 {
            quad.swap(0, 1);
        }
        tetrahedra.push(quad);
    }
    if tetrahedra.is_empty() {
        return Err(FieldError::DegenerateGeometry(
            "no tetrahedra enclose the point cloud".to_string(),
        ));
    }
    debug!(
        "tetrahedralized {} points ({} unique) into {} tetrahedra",
        n,
        order.len(),
        tetrahedra.len()
    );
    Ok(tetrahedra)
}

/// Signed volume of a tetrahedron, positive for positive orientation.
pub fn signed_volume(vertices: &[usize; 4], coords: &[Vector3<f64>]) -> f64 {
    let a = coords[vertices[0]];
    let b = coords[vertices[1]];
    let c = coords[vertices[2]];
    let d = coords[vertices[3]];
    (b - a).dot(&(c - a).cross(&(d - a))) / 6.0
}

/// Four affinely independent points of `order`, or the rank the cloud lacks.
fn spanning_simplex(coords: &[Vector3<f64>], order: &[usize]) -> Result<[usize; 4], FieldError> {
    let first = order[0];
    let origin = coords[first];
    let (far, far_dist) = farthest(coords, order, |p| (p - origin).norm());
    if far_dist <= AFFINE_EPS {
        return Err(FieldError::DegenerateGeometry(
            "all points coincide".to_string(),
        ));
    }
    let axis = (coords[far] - origin) / far_dist;
    let (off_line, line_dist) = farthest(coords, order, |p| {
        let rel = p - origin;
        (rel - axis * rel.dot(&axis)).norm()
    });
    if line_dist <= AFFINE_EPS {
        return Err(FieldError::DegenerateGeometry("points are collinear".to_string()));
    }
    let normal = axis.cross(&(coords[off_line] - origin)).normalize();
    let (off_plane, plane_dist) = farthest(coords, order, |p| (p - origin).dot(&normal).abs());
    if plane_dist <= AFFINE_EPS {
        return Err(FieldError::DegenerateGeometry("points are coplanar".to_string()));
    }
    Ok([first, far, off_line, off_plane])
}

fn farthest(
    coords: &[Vector3<f64>],
    order: &[usize],
    metric: impl Fn(&Vector3<f64>) -> f64,
) -> (usize, f64) {
    order
        .iter()
        .map(|&i| (i, metric(&coords[i])))
        .fold((order[0], 0.0), |best, cur| if cur.1 > best.1 { cur } else { best })
}

/// Move the four simplex indices to the front; the crate seeds its
/// triangulation with the first four vertices.
fn seed_with_simplex(order: &mut Vec<usize>, simplex: [usize; 4]) {
    order.retain(|index| !simplex.contains(index));
    order.splice(0..0, simplex);
}

fn unique_insertion_order(coords: &[Vector3<f64>]) -> Vec<usize> {
    let mut seen: FxHashMap<[i64; 3], usize> = FxHashMap::default();
    seen.reserve(coords.len());
    let mut order = Vec::with_capacity(coords.len());
    for (index, point) in coords.iter().enumerate() {
        let key = [
            (point.x / DUPLICATE_QUANTUM).round() as i64,
            (point.y / DUPLICATE_QUANTUM).round() as i64,
            (point.z / DUPLICATE_QUANTUM).round() as i64,
        ];
        if seen.insert(key, index).is_none() {
            order.push(index);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    fn cube_corners() -> Vec<Vector3<f64>> {
        let mut points = Vec::new();
        for x in [0.0, 1.0] {
            for y in [0.0, 1.0] {
                for z in [0.0, 1.0] {
                    points.push(Vector3::new(x, y, z));
                }
            }
        }
        points
    }

    /// `n³` fractional grid points spanning the parallelepiped with edges
    /// given by the rows of `basis`.
    fn parallelepiped_grid(basis: [[f64; 3]; 3], n: usize) -> Vec<Vector3<f64>> {
        let rows = basis.map(|b| Vector3::new(b[0], b[1], b[2]));
        let step = 1.0 / (n - 1) as f64;
        let mut points = Vec::with_capacity(n * n * n);
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    points.push(
                        rows[0] * (i as f64 * step)
                            + rows[1] * (j as f64 * step)
                            + rows[2] * (k as f64 * step),
                    );
                }
            }
        }
        points
    }

    fn cell_volume(basis: [[f64; 3]; 3]) -> f64 {
        Matrix3::from_row_slice(&basis.concat()).determinant().abs()
    }

    fn total_volume(tets: &[[usize; 4]], points: &[Vector3<f64>]) -> f64 {
        tets.iter().map(|t| signed_volume(t, points)).sum()
    }

    fn assert_fills(basis: [[f64; 3]; 3], n: usize) {
        let points = parallelepiped_grid(basis, n);
        let tets = tetrahedralize(&points).expect("grid should tetrahedralize");
        assert!(tets.iter().all(|t| signed_volume(t, &points) > 0.0));
        let expected = cell_volume(basis);
        let volume = total_volume(&tets, &points);
        assert!(
            (volume - expected).abs() < 1e-6 * expected.max(1.0),
            "expected {expected}, got {volume} from {} tetrahedra",
            tets.len()
        );
    }

    #[test]
    fn cube_corners_fill_the_unit_volume() {
        let points = cube_corners();
        let tets = tetrahedralize(&points).expect("cube should tetrahedralize");
        assert!(tets.len() >= 5, "expected at least 5 tetrahedra, got {}", tets.len());
        for tet in &tets {
            assert!(signed_volume(tet, &points) > 0.0, "tetrahedron {tet:?} is inverted");
        }
        let volume = total_volume(&tets, &points);
        assert!((volume - 1.0).abs() < 1e-9, "expected unit volume, got {volume}");
    }

    #[test]
    fn regular_grid_covers_its_bounding_box() {
        assert_fills([[1.5, 0.0, 0.0], [0.0, 1.5, 0.0], [0.0, 0.0, 1.5]], 4);
    }

    #[test]
    fn centered_cubic_grid_has_unit_volume() {
        let points: Vec<Vector3<f64>> =
            parallelepiped_grid([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], 6)
                .into_iter()
                .map(|p| p - Vector3::repeat(0.5))
                .collect();
        let tets = tetrahedralize(&points).expect("grid should tetrahedralize");
        let volume = total_volume(&tets, &points);
        assert!((volume - 1.0).abs() < 1e-6, "expected unit volume, got {volume}");
    }

    #[test]
    fn body_centered_cell_volume_matches_the_basis() {
        assert_fills([[-1.0, 1.0, 1.0], [1.0, -1.0, 1.0], [1.0, 1.0, -1.0]], 3);
    }

    #[test]
    fn face_centered_cell_volume_matches_the_basis() {
        assert_fills([[0.0, 1.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 0.0]], 4);
    }

    #[test]
    fn hexagonal_cell_volume_matches_the_basis() {
        let s = 3.0_f64.sqrt() / 2.0;
        assert_fills([[1.0, 0.0, 0.0], [-0.5, s, 0.0], [0.0, 0.0, 0.6]], 5);
    }

    #[test]
    fn non_dyadic_spacing_fills_the_box() {
        assert_fills([[0.7, 0.0, 0.0], [0.0, 1.3, 0.0], [0.0, 0.0, 0.9]], 7);
    }

    #[test]
    fn dense_grid_cell_count_stays_linear() {
        let basis = [[-1.0, 1.0, 1.0], [1.0, -1.0, 1.0], [1.0, 1.0, -1.0]];
        let points = parallelepiped_grid(basis, 8);
        let tets = tetrahedralize(&points).expect("grid should tetrahedralize");
        assert!(tets.len() < 8 * points.len(), "got {} tetrahedra", tets.len());
        let volume = total_volume(&tets, &points);
        assert!((volume - cell_volume(basis)).abs() < 1e-6);
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut points = cube_corners();
        points.push(Vector3::new(1.0, 1.0, 1.0));
        let tets = tetrahedralize(&points).expect("duplicates should not break insertion");
        assert!(tets.iter().all(|t| !t.contains(&8)));
        assert!((total_volume(&tets, &points) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn coplanar_points_are_rejected() {
        let points = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.5, 0.5, 0.0),
        ];
        let err = tetrahedralize(&points).expect_err("coplanar cloud must fail");
        assert!(matches!(err, FieldError::DegenerateGeometry(_)), "{err}");
    }

    #[test]
    fn too_few_points_are_rejected() {
        let points = vec![Vector3::zeros(), Vector3::x(), Vector3::y()];
        assert_eq!(
            tetrahedralize(&points).expect_err("three points"),
            FieldError::InsufficientPoints(3)
        );
    }
}
