//! Triangulated surfaces carrying named per-point attribute arrays.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A named per-point attribute array with `width` components per point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointData {
    pub name: String,
    pub width: usize,
    pub values: Vec<f64>,
}

impl PointData {
    pub fn scalar(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            width: 1,
            values,
        }
    }

    pub fn rgba(name: impl Into<String>, colors: &[[f64; 4]]) -> Self {
        Self {
            name: name.into(),
            width: 4,
            values: colors.iter().flatten().copied().collect(),
        }
    }

    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.values.len() / self.width
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> &[f64] {
        &self.values[index * self.width..(index + 1) * self.width]
    }

    /// Append `(1 - t) * self[a] + t * self[b]` to `out`.
    pub(crate) fn push_lerp(&self, a: usize, b: usize, t: f64, out: &mut Vec<f64>) {
        for c in 0..self.width {
            let va = self.values[a * self.width + c];
            let vb = self.values[b * self.width + c];
            out.push(va + (vb - va) * t);
        }
    }
}

/// A triangle mesh with per-point attributes. Triangles index into `points`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub points: Vec<[f64; 3]>,
    pub triangles: Vec<[u32; 3]>,
    #[serde(default)]
    pub point_data: Vec<PointData>,
}

impl Surface {
    pub fn new(points: Vec<[f64; 3]>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            points,
            triangles,
            point_data: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn point(&self, index: usize) -> Vector3<f64> {
        Vector3::from(self.points[index])
    }

    pub fn attribute(&self, name: &str) -> Option<&PointData> {
        self.point_data.iter().find(|data| data.name == name)
    }

    /// Insert or replace the attribute array with the same name.
    pub fn set_attribute(&mut self, data: PointData) {
        if let Some(existing) = self.point_data.iter_mut().find(|d| d.name == data.name) {
            *existing = data;
        } else {
            self.point_data.push(data);
        }
    }

    /// Total triangle area.
    pub fn area(&self) -> f64 {
        self.triangles
            .iter()
            .map(|tri| {
                let [a, b, c] = self.triangle_points(tri);
                0.5 * (b - a).cross(&(c - a)).norm()
            })
            .sum()
    }

    /// Volume enclosed by the surface by the divergence theorem. Exact for
    /// closed, consistently oriented meshes and an estimate for open ones.
    pub fn enclosed_volume(&self) -> f64 {
        self.triangles
            .iter()
            .map(|tri| {
                let [a, b, c] = self.triangle_points(tri);
                a.dot(&b.cross(&c)) / 6.0
            })
            .sum::<f64>()
            .abs()
    }

    /// Copy translated rigidly by `offset`; topology and attributes unchanged.
    pub fn translated(&self, offset: Vector3<f64>) -> Surface {
        let mut copy = self.clone();
        for point in &mut copy.points {
            point[0] += offset.x;
            point[1] += offset.y;
            point[2] += offset.z;
        }
        copy
    }

    /// Undirected edges, each listed once with the smaller index first.
    pub fn edges(&self) -> Vec<(u32, u32)> {
        let mut edges: Vec<(u32, u32)> = self
            .triangles
            .iter()
            .flat_map(|&[a, b, c]| [(a, b), (b, c), (c, a)])
            .map(|(u, v)| if u < v { (u, v) } else { (v, u) })
            .collect();
        edges.sort_unstable();
        edges.dedup();
        edges
    }

    /// Edges used by exactly one triangle.
    pub fn boundary_edge_count(&self) -> usize {
        let mut edges: Vec<(u32, u32)> = self
            .triangles
            .iter()
            .flat_map(|&[a, b, c]| [(a, b), (b, c), (c, a)])
            .map(|(u, v)| if u < v { (u, v) } else { (v, u) })
            .collect();
        edges.sort_unstable();
        let mut count = 0;
        let mut i = 0;
        while i < edges.len() {
            let mut j = i + 1;
            while j < edges.len() && edges[j] == edges[i] {
                j += 1;
            }
            if j - i == 1 {
                count += 1;
            }
            i = j;
        }
        count
    }

    /// Drop points no triangle references, remapping triangles and attributes.
    pub fn compact(&mut self) {
        let mut used = vec![false; self.points.len()];
        for tri in &self.triangles {
            for &v in tri {
                used[v as usize] = true;
            }
        }
        if used.iter().all(|&u| u) {
            return;
        }
        let mut remap = vec![u32::MAX; self.points.len()];
        let mut order = Vec::with_capacity(self.points.len());
        for (old, _) in used.iter().enumerate().filter(|&(_, &u)| u) {
            remap[old] = order.len() as u32;
            order.push(old);
        }
        self.points = order.iter().map(|&old| self.points[old]).collect();
        for data in &mut self.point_data {
            let width = data.width;
            data.values = order
                .iter()
                .flat_map(|&old| data.values[old * width..(old + 1) * width].iter().copied())
                .collect();
        }
        for tri in &mut self.triangles {
            for v in tri.iter_mut() {
                *v = remap[*v as usize];
            }
        }
    }

    fn triangle_points(&self, tri: &[u32; 3]) -> [Vector3<f64>; 3] {
        [
            self.point(tri[0] as usize),
            self.point(tri[1] as usize),
            self.point(tri[2] as usize),
        ]
    }
}

/// Closed, outward-oriented triangulated box spanning `min..max`.
pub fn box_surface(min: [f64; 3], max: [f64; 3]) -> Surface {
    let mut points = Vec::with_capacity(8);
    for corner in 0..8 {
        points.push([
            if corner & 1 == 0 { min[0] } else { max[0] },
            if corner & 2 == 0 { min[1] } else { max[1] },
            if corner & 4 == 0 { min[2] } else { max[2] },
        ]);
    }
    let quads: [[u32; 4]; 6] = [
        [0, 2, 3, 1],
        [4, 5, 7, 6],
        [0, 1, 5, 4],
        [2, 6, 7, 3],
        [0, 4, 6, 2],
        [1, 3, 7, 5],
    ];
    let triangles = quads
        .iter()
        .flat_map(|&[a, b, c, d]| [[a, b, c], [a, c, d]])
        .collect();
    Surface::new(points, triangles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_surface_is_closed_with_unit_volume() {
        let cube = box_surface([-0.5; 3], [0.5; 3]);
        assert_eq!(cube.points.len(), 8);
        assert_eq!(cube.triangles.len(), 12);
        assert_eq!(cube.boundary_edge_count(), 0);
        assert!((cube.enclosed_volume() - 1.0).abs() < 1e-12);
        assert!((cube.area() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn compact_drops_unreferenced_points_and_their_attributes() {
        let mut surface = Surface::new(
            vec![[9.0, 9.0, 9.0], [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[1, 2, 3]],
        );
        surface.set_attribute(PointData::scalar("energy", vec![-1.0, 0.0, 1.0, 2.0]));
        surface.compact();
        assert_eq!(surface.points.len(), 3);
        assert_eq!(surface.triangles, vec![[0, 1, 2]]);
        let energy = surface.attribute("energy").expect("energy kept");
        assert_eq!(energy.values, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn translation_keeps_attributes() {
        let mut surface = box_surface([0.0; 3], [1.0; 3]);
        surface.set_attribute(PointData::scalar("energy", vec![0.5; 8]));
        let moved = surface.translated(Vector3::new(2.0, 0.0, -1.0));
        assert_eq!(moved.points[0], [2.0, 0.0, -1.0]);
        assert_eq!(moved.point_data, surface.point_data);
    }
}
