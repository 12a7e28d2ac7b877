//! Measurement data handling: rows, snapshots, the recorder, and the run
//! manifest sidecar.

pub mod manifest;
pub mod recorder;
pub mod row;

pub use manifest::RunManifest;
pub use recorder::{RowRecorder, RunPaths};
pub use row::{DataSnapshot, Row, RowValues};
