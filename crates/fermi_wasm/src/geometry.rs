//! Flat-buffer helpers and standalone isosurface extraction.

use anyhow::{bail, Context, Result};
use fermi_core::field::FieldHandle;
use fermi_core::isosurface::extract;
use fermi_core::smoothing::smooth;
use fermi_core::surface::Surface;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

pub fn points_from_flat(flat: &[f64]) -> Result<Vec<[f64; 3]>> {
    if flat.len() % 3 != 0 {
        bail!("Point buffer length must be a multiple of 3, got {}.", flat.len());
    }
    Ok(flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
}

pub fn flatten_points(points: &[[f64; 3]]) -> Vec<f64> {
    points.iter().flatten().copied().collect()
}

pub fn reciprocal_basis_from_flat(flat: &[f64]) -> Result<[[f64; 3]; 3]> {
    if flat.len() != 9 {
        bail!("Reciprocal basis needs 9 components, got {}.", flat.len());
    }
    let rows = points_from_flat(flat)?;
    Ok([rows[0], rows[1], rows[2]])
}

/// Tetrahedralize `points` and extract the `isovalue` surface of `values`.
pub fn isosurface_from_samples(
    points: &[f64],
    values: &[f64],
    isovalue: f64,
    smoothing_iterations: usize,
) -> Result<Surface> {
    let points = points_from_flat(points)?;
    let mut field = FieldHandle::build(&points).context("Failed to build the interpolation field")?;
    field.set_scalar(values)?;
    Ok(smooth(&extract(&field, isovalue), smoothing_iterations))
}

/// Render-ready arrays: flat positions, flat triangle indices and
/// area-weighted vertex normals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceBuffers {
    pub positions: Vec<f64>,
    pub indices: Vec<u32>,
    pub normals: Vec<f64>,
}

impl SurfaceBuffers {
    pub fn from_surface(surface: &Surface) -> Self {
        let mut normals = vec![[0.0; 3]; surface.points.len()];
        for tri in &surface.triangles {
            let [a, b, c] = tri.map(|i| surface.point(i as usize));
            let n = (b - a).cross(&(c - a));
            for &i in tri {
                let acc = &mut normals[i as usize];
                acc[0] += n.x;
                acc[1] += n.y;
                acc[2] += n.z;
            }
        }
        for n in &mut normals {
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            if len > 0.0 {
                n.iter_mut().for_each(|v| *v /= len);
            }
        }
        Self {
            positions: flatten_points(&surface.points),
            indices: surface.triangles.iter().flatten().copied().collect(),
            normals: flatten_points(&normals),
        }
    }
}

#[wasm_bindgen]
pub fn surface_buffers(surface_val: JsValue) -> Result<JsValue, JsValue> {
    let surface: Surface = from_value(surface_val)
        .map_err(|e| JsValue::from_str(&format!("Invalid surface: {e}")))?;
    to_value(&SurfaceBuffers::from_surface(&surface))
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize buffers: {e}")))
}

#[wasm_bindgen]
pub fn extract_isosurface(
    points: Vec<f64>,
    values: Vec<f64>,
    isovalue: f64,
    smoothing_iterations: u32,
) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let surface = isosurface_from_samples(&points, &values, isovalue, smoothing_iterations as usize)
        .map_err(|e| JsValue::from_str(&format!("Isosurface extraction failed: {e:#}")))?;
    to_value(&surface).map_err(|e| JsValue::from_str(&format!("Failed to serialize surface: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_buffers_split_into_points() {
        let points = points_from_flat(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).expect("points");
        assert_eq!(points, vec![[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]]);
        assert_eq!(flatten_points(&points), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(points_from_flat(&[0.0, 1.0]).is_err());
        assert!(reciprocal_basis_from_flat(&[1.0; 6]).is_err());
    }

    #[test]
    fn planar_field_gives_a_flat_surface() {
        let mut points = Vec::new();
        let mut values = Vec::new();
        for i in 0..3 {
            for j in 0..3 {
                for k in 0..3 {
                    let p = [i as f64 * 0.5, j as f64 * 0.5, k as f64 * 0.5];
                    values.push(p[2]);
                    points.extend(p);
                }
            }
        }
        let surface = isosurface_from_samples(&points, &values, 0.25, 0).expect("surface");
        assert!(!surface.is_empty());
        assert!(surface.points.iter().all(|p| (p[2] - 0.25).abs() < 1e-9));
        assert!((surface.area() - 1.0).abs() < 1e-9);

        assert!(isosurface_from_samples(&points, &values[1..], 0.25, 0).is_err());

        let buffers = SurfaceBuffers::from_surface(&surface);
        assert_eq!(buffers.positions.len(), surface.points.len() * 3);
        assert_eq!(buffers.indices.len(), surface.triangles.len() * 3);
        for normal in buffers.normals.chunks_exact(3) {
            assert!((normal[2].abs() - 1.0).abs() < 1e-9);
        }
    }
}
