//! Run lifecycle states and outcomes.
//!
//! This module defines the state machine driven by the run engine. State
//! transitions are published on a watch channel so the presentation layer can
//! poll them without ever calling into lifecycle code.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one experiment run.
///
/// # State Machine
///
/// ```text
/// Idle ──start──> SettingUp ──setup ok──> Running ──steps done──> Completing
///                     │                     │    │
///                     │setup failed    stop │    │steps failed
///                     ▼                     ▼    ▼
///                 Erroring             Cancelling Erroring
///                     │                     │    │
///                     └───────────┬─────────┴────┘
///                                 ▼
///                            CleaningUp ──> Finished | Errored
/// ```
///
/// `CleaningUp` is entered exactly once per run, on every exit path. A run
/// ends in `Errored` when any phase failed (including `cleanup` itself);
/// otherwise — including after a user stop — it ends in `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// No run has started yet.
    Idle,
    /// The experiment's `setup` phase is executing.
    SettingUp,
    /// The experiment's `steps` stream is being driven.
    Running,
    /// `steps` exhausted normally; about to clean up.
    Completing,
    /// A stop request was observed; about to clean up.
    Cancelling,
    /// A phase failed; about to clean up.
    Erroring,
    /// The experiment's `cleanup` phase is executing.
    CleaningUp,
    /// Terminal: the run completed or was cancelled without error.
    Finished,
    /// Terminal: the run failed; the error is available on the handle.
    Errored,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::SettingUp => "setting_up",
            RunState::Running => "running",
            RunState::Completing => "completing",
            RunState::Cancelling => "cancelling",
            RunState::Erroring => "erroring",
            RunState::CleaningUp => "cleaning_up",
            RunState::Finished => "finished",
            RunState::Errored => "errored",
        };
        write!(f, "{name}")
    }
}

impl RunState {
    /// Check whether the run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Finished | RunState::Errored)
    }

    /// Check whether lifecycle code may still be executing.
    pub fn is_active(&self) -> bool {
        !matches!(self, RunState::Idle) && !self.is_terminal()
    }

    /// Check whether a stop request can still have an effect.
    pub fn can_stop(&self) -> bool {
        matches!(self, RunState::SettingUp | RunState::Running)
    }
}

/// Why `cleanup` is being invoked.
///
/// Passed to the experiment's `cleanup` phase so it can distinguish a normal
/// completion from a user stop or a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// `steps` ran to exhaustion.
    Completed,
    /// A stop request ended the run.
    Cancelled,
    /// `setup` or `steps` failed, or a row could not be recorded.
    Failed,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
            RunOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle phase names, used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The `setup` phase.
    Setup,
    /// The `steps` phase.
    Steps,
    /// The `cleanup` phase.
    Cleanup,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Setup => write!(f, "setup"),
            Phase::Steps => write!(f, "steps"),
            Phase::Cleanup => write!(f, "cleanup"),
        }
    }
}
