//! Experiment definition and execution.
//!
//! - [`protocol`]: the [`Experiment`] trait users implement.
//! - [`context`]: the per-run [`RunContext`] handed to lifecycle code.
//! - [`state`]: the run state machine.
//! - [`engine`]: the [`RunEngine`] that validates, spawns, and drives runs,
//!   and the [`RunHandle`] the presentation layer polls.

pub mod context;
pub mod engine;
pub mod protocol;
pub mod state;

pub use context::RunContext;
pub use engine::{RunEngine, RunHandle};
pub use protocol::{Experiment, StepStream};
pub use state::{Phase, RunOutcome, RunState};
