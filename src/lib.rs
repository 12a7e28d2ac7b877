//! # benchrun
//!
//! A laboratory experiment execution engine. A researcher defines an
//! experiment as a type with declarative parameter fields and three lifecycle
//! phases (`setup → steps → cleanup`); the engine runs it on a dedicated
//! worker task, turns every yielded measurement into a durable, timestamped
//! CSV row with a JSON manifest sidecar, and exposes non-blocking snapshot
//! and log views to a polling presentation layer. A run can be cancelled
//! cleanly at any suspension point, including while it is waiting on a timer
//! or an instrument, and `cleanup` runs exactly once on every exit path.
//!
//! ## Crate Structure
//!
//! - **`config`**: settings loading (Figment: defaults, `benchrun.toml`,
//!   environment variables).
//! - **`field`**: declarative parameter descriptors, values, and eager
//!   validation at run start.
//! - **`experiment`**: the `Experiment` trait, the run context, the state
//!   machine, and the `RunEngine`/`RunHandle` pair.
//! - **`data`**: measurement rows, structurally-shared snapshots, the
//!   `RowRecorder` (CSV sink + manifest sidecar), and the sync mark.
//! - **`logbus`**: the bounded structured log channel shared between a run
//!   and the presentation layer.
//! - **`visual`**: the `Visualizer` trait and the tick-driven
//!   `PlotCoordinator` with skip-on-busy backpressure.
//! - **`instrument`**: the opaque synchronous instrument boundary and a mock
//!   implementation for tests.
//! - **`telemetry`**: `tracing` subscriber setup for binaries and tests.
//! - **`error`**: the `RunError` taxonomy.

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod field;
pub mod instrument;
pub mod logbus;
pub mod telemetry;
pub mod visual;

pub use config::Settings;
pub use data::{DataSnapshot, Row, RowValues};
pub use error::{RunError, RunResult};
pub use experiment::{Experiment, RunContext, RunEngine, RunHandle, RunOutcome, RunState, StepStream};
pub use field::{FieldDescriptor, FieldValue, ResolvedParams};
pub use logbus::{Level, LogFilter, LogRecord, LogSource};
pub use visual::{PlotCoordinator, RunView, Visualizer};
