//! Browser bindings for `fermi_core`.
//!
//! Inputs and outputs cross the boundary as plain JS objects through
//! `serde-wasm-bindgen`; bulk coordinate buffers use `Float64Array`.

pub mod geometry;
pub mod session;

pub use session::WasmFermiSession;
