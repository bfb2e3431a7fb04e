//! Host-facing surface of the extension call bridge.

pub mod api;
pub mod envelope;
pub mod exports;
