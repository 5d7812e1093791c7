//! A loaded band dataset and zone, analysed on request.

use anyhow::{bail, Result};
use fermi_core::bands::BandDataset;
use fermi_core::pipeline::{analyze, AnalysisReport};
use fermi_core::settings::AnalysisSettings;
use fermi_core::zone::Polyhedron;
use js_sys::Float64Array;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

use crate::geometry::{flatten_points, reciprocal_basis_from_flat};

#[wasm_bindgen]
pub struct WasmFermiSession {
    data: BandDataset,
    zone: Polyhedron,
}

impl WasmFermiSession {
    pub fn from_parts(data: BandDataset, zone: Polyhedron) -> Result<Self> {
        data.validate()?;
        zone.validate()?;
        Ok(Self { data, zone })
    }

    pub fn run(&self, settings: &AnalysisSettings) -> Result<AnalysisReport> {
        analyze(&self.data, &self.zone, settings)
    }

    pub fn update_fermi_energy(&mut self, fermi_energy: f64) -> Result<()> {
        if !fermi_energy.is_finite() {
            bail!("Fermi energy must be finite.");
        }
        self.data.fermi_energy = fermi_energy;
        Ok(())
    }
}

fn js_error(context: &str, err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{context}: {err}"))
}

#[wasm_bindgen]
impl WasmFermiSession {
    #[wasm_bindgen(constructor)]
    pub fn new(data_val: JsValue, zone_val: JsValue) -> Result<WasmFermiSession, JsValue> {
        console_error_panic_hook::set_once();

        let data: BandDataset =
            from_value(data_val).map_err(|e| js_error("Invalid band data", e))?;
        let zone: Polyhedron = from_value(zone_val).map_err(|e| js_error("Invalid zone", e))?;
        Self::from_parts(data, zone).map_err(|e| js_error("Invalid session", format!("{e:#}")))
    }

    /// Session over the primitive reciprocal cell; `basis` holds `b1, b2, b3` row by row.
    pub fn with_primitive_cell(
        data_val: JsValue,
        basis: Vec<f64>,
    ) -> Result<WasmFermiSession, JsValue> {
        console_error_panic_hook::set_once();

        let data: BandDataset =
            from_value(data_val).map_err(|e| js_error("Invalid band data", e))?;
        let basis = reciprocal_basis_from_flat(&basis)
            .map_err(|e| js_error("Invalid reciprocal basis", e))?;
        Self::from_parts(data, Polyhedron::parallelepiped(basis))
            .map_err(|e| js_error("Invalid session", format!("{e:#}")))
    }

    pub fn kpoint_count(&self) -> usize {
        self.data.kpoints.len()
    }

    pub fn set_fermi_energy(&mut self, fermi_energy: f64) -> Result<(), JsValue> {
        self.update_fermi_energy(fermi_energy)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    pub fn band_summaries(&self, isovalue_offset: f64) -> Result<JsValue, JsValue> {
        to_value(&self.data.crossing_summaries(isovalue_offset))
            .map_err(|e| js_error("Failed to serialize band summaries", e))
    }

    pub fn analyze(&self, settings_val: JsValue) -> Result<JsValue, JsValue> {
        let settings: AnalysisSettings = if settings_val.is_undefined() || settings_val.is_null() {
            AnalysisSettings::default()
        } else {
            from_value(settings_val).map_err(|e| js_error("Invalid analysis settings", e))?
        };
        let report = self
            .run(&settings)
            .map_err(|e| js_error("Analysis failed", format!("{e:#}")))?;
        to_value(&report).map_err(|e| js_error("Failed to serialize report", e))
    }

    /// Triangulated zone boundary for display.
    pub fn zone_mesh(&self) -> Result<JsValue, JsValue> {
        to_value(&self.zone.boundary_mesh()).map_err(|e| js_error("Failed to serialize zone", e))
    }

    pub fn zone_vertices(&self) -> Float64Array {
        Float64Array::from(flatten_points(&self.zone.vertices).as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn cubic_dataset() -> BandDataset {
        let n = 6;
        let step = 1.0 / (n - 1) as f64;
        let mut kpoints = Vec::new();
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    kpoints.push([step * i as f64, step * j as f64, step * k as f64]);
                }
            }
        }
        let energies = kpoints
            .iter()
            .map(|k| {
                let d = [k[0] - 0.5, k[1] - 0.5, k[2] - 0.5];
                d[0] * d[0] + d[1] * d[1] + d[2] * d[2] - 0.09
            })
            .collect();
        BandDataset {
            kpoints,
            energies: vec![vec![energies]],
            fermi_energy: 0.0,
            grid: [6, 6, 6],
            projections: None,
        }
    }

    fn cubic_zone() -> Polyhedron {
        Polyhedron::parallelepiped([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    #[test]
    fn session_runs_the_pipeline() {
        let session = WasmFermiSession::from_parts(cubic_dataset(), cubic_zone()).expect("session");
        assert_eq!(session.kpoint_count(), 216);
        let settings = AnalysisSettings {
            smoothing_iterations: 0,
            ..AnalysisSettings::default()
        };
        let report = session.run(&settings).expect("report");
        assert_eq!(report.records.len(), 1);
        assert!(!report.records[0].surface.is_empty());
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let mut data = cubic_dataset();
        data.grid = [0, 6, 6];
        assert!(WasmFermiSession::from_parts(data, cubic_zone()).is_err());

        let mut session =
            WasmFermiSession::from_parts(cubic_dataset(), cubic_zone()).expect("session");
        assert!(session.update_fermi_energy(f64::INFINITY).is_err());
        session.update_fermi_energy(5.0).expect("finite level");
        let report = session.run(&AnalysisSettings::default()).expect("report");
        assert!(report.records.is_empty());
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_value_tests {
    use super::tests::cubic_dataset;
    use super::WasmFermiSession;
    use fermi_core::pipeline::AnalysisReport;
    use serde_wasm_bindgen::{from_value, to_value};
    use wasm_bindgen::JsValue;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn analyze_round_trips_through_js_values() {
        let data = to_value(&cubic_dataset()).expect("data");
        let basis = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let session = WasmFermiSession::with_primitive_cell(data, basis).expect("session");
        let report: AnalysisReport =
            from_value(session.analyze(JsValue::UNDEFINED).expect("analyze")).expect("report");
        assert_eq!(report.records.len(), 1);
        assert_eq!(session.zone_vertices().length(), 24);
    }

    #[wasm_bindgen_test]
    fn malformed_basis_is_reported() {
        let data = to_value(&cubic_dataset()).expect("data");
        let result = WasmFermiSession::with_primitive_cell(data, vec![1.0, 0.0]);
        let message = result
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default();
        assert!(message.contains("Invalid reciprocal basis"));
    }
}
