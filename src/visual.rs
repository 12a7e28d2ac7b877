//! Snapshot/plot coordination.
//!
//! The coordinator decouples measurement acquisition from rendering: on each
//! externally-driven `tick` it hands the current [`DataSnapshot`] to every
//! registered visualizer on a blocking task, never on the run's worker task
//! and never on the caller's thread. A visualizer still busy with a previous
//! update is skipped for that tick — backpressure by drop, not by block — so
//! one slow renderer can neither delay acquisition nor starve the others.

use crate::data::row::DataSnapshot;
use crate::experiment::state::RunState;
use crate::field::ResolvedParams;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Read-only view of the current run, passed to visualizers for
/// context-dependent rendering. Scoped to one run; never a global.
#[derive(Debug, Clone)]
pub struct RunView {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Experiment name.
    pub experiment: String,
    /// Lifecycle state at tick time.
    pub state: RunState,
    /// Resolved parameter values.
    pub params: ResolvedParams,
    /// Whether this is a debug run.
    pub debug: bool,
}

impl RunView {
    /// Whether lifecycle code may still be producing rows.
    pub fn is_running(&self) -> bool {
        self.state.is_active()
    }

    /// Whether the run has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// A consumer of periodic data snapshots.
///
/// `setup` runs once, before the first `update`; both run off the
/// acquisition task, so a slow implementation only affects its own refresh
/// rate.
pub trait Visualizer: Send + 'static {
    /// Display name, used in skip diagnostics.
    fn name(&self) -> &str;

    /// One-time initialization when the visualizer is activated.
    fn setup(&mut self) {}

    /// Render the given snapshot.
    fn update(&mut self, snapshot: &DataSnapshot, run: &RunView);
}

struct VisCell {
    visualizer: Box<dyn Visualizer>,
    ready: bool,
}

struct Slot {
    name: String,
    busy: Arc<AtomicBool>,
    cell: Arc<Mutex<VisCell>>,
}

/// Fans periodic snapshots out to registered visualizers.
///
/// `tick` is expected to be driven on a fixed cadence by the presentation
/// layer (e.g. a GUI timer); it is never called by the producing side.
#[derive(Default)]
pub struct PlotCoordinator {
    slots: Vec<Slot>,
}

impl PlotCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a visualizer. Its `setup` runs before its first update.
    pub fn register(&mut self, visualizer: Box<dyn Visualizer>) {
        self.slots.push(Slot {
            name: visualizer.name().to_string(),
            busy: Arc::new(AtomicBool::new(false)),
            cell: Arc::new(Mutex::new(VisCell {
                visualizer,
                ready: false,
            })),
        });
    }

    /// Number of registered visualizers.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no visualizer is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Dispatch one update round.
    ///
    /// Each idle visualizer receives `snapshot` on a blocking task; busy ones
    /// are skipped rather than queued. Returns how many updates were
    /// dispatched. Must be called from within a Tokio runtime.
    pub fn tick(&self, snapshot: &DataSnapshot, run: &RunView) -> usize {
        let mut dispatched = 0;

        for slot in &self.slots {
            if slot.busy.swap(true, Ordering::AcqRel) {
                debug!(visualizer = %slot.name, "skipping tick: previous update still in progress");
                continue;
            }

            let cell = slot.cell.clone();
            let busy = slot.busy.clone();
            let snapshot = snapshot.clone();
            let run = run.clone();
            tokio::task::spawn_blocking(move || {
                let mut cell = cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if !cell.ready {
                    cell.visualizer.setup();
                    cell.ready = true;
                }
                cell.visualizer.update(&snapshot, &run);
                drop(cell);
                busy.store(false, Ordering::Release);
            });
            dispatched += 1;
        }

        dispatched
    }
}
