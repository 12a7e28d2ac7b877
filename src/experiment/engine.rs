//! The run engine: validates, spawns, and drives experiment runs.
//!
//! The engine owns the lifecycle state machine and the ordering guarantees of
//! the data pipeline:
//!
//! - `start` validates parameter values against the experiment's field
//!   descriptors and returns a [`RunHandle`] only after validation passed —
//!   a rejected start has no side effect at all.
//! - The lifecycle executes on a dedicated Tokio task. Each row the `steps`
//!   stream yields is recorded (published to the snapshot and flushed to the
//!   sink) before the stream is polled again, so rows are durable in
//!   emission order.
//! - A stop request is observed at every suspension point: the engine races
//!   each step poll against the cancellation signal, so even a stream
//!   suspended in a long delay unblocks promptly. Cancellation is
//!   cooperative — synchronous sections without an `.await` run to their
//!   next suspension before the request takes effect.
//! - `cleanup` runs exactly once per run, on every exit path, and a failure
//!   inside it never masks an earlier error.
//!
//! # Architecture
//!
//! ```text
//! presentation ──start/stop/sync──> RunEngine ──spawn──> worker task
//!      ▲                                                    │
//!      │ poll state / snapshot / logs                       ▼
//!      └───────── RunHandle ◄── watch + Arc ── Experiment steps stream
//!                                                │
//!                                                ▼
//!                                           RowRecorder ──> CSV + manifest
//! ```

use crate::config::Settings;
use crate::data::manifest::RunManifest;
use crate::data::recorder::{RowRecorder, RunPaths};
use crate::data::row::DataSnapshot;
use crate::error::{RunError, RunResult};
use crate::experiment::context::RunContext;
use crate::experiment::protocol::Experiment;
use crate::experiment::state::{Phase, RunOutcome, RunState};
use crate::field::{self, FieldValue, ResolvedParams};
use crate::logbus::{Level, LogChannel, LogFilter, LogRecord, LogSource, RunLogger};
use crate::visual::RunView;
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

const RESERVED_COLUMNS: [&str; 3] = ["t", "time", "sync_t"];

/// Starts experiment runs. One engine can start any number of runs in
/// sequence; each run gets its own worker task, recorder, and log channel.
pub struct RunEngine {
    settings: Arc<Settings>,
}

impl RunEngine {
    /// Create an engine with the given settings.
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Validate and start a run.
    ///
    /// On success the lifecycle begins executing on a dedicated worker task
    /// and the returned handle can be used to poll state, request a stop or
    /// a sync mark, and read snapshots and logs. With `debug` set the full
    /// lifecycle executes but no file is written. Must be called from within
    /// a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Validation`] — before any side effect — when a
    /// supplied value fails its field descriptor, or when the declared
    /// column set collides with the reserved derived columns or itself.
    pub fn start(
        &self,
        experiment: Box<dyn Experiment>,
        values: HashMap<String, FieldValue>,
        debug: bool,
    ) -> RunResult<RunHandle> {
        let name = experiment.name().to_string();
        let columns = experiment.columns();
        validate_columns(&columns)?;
        let params = field::resolve(&experiment.fields(), &values)?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let logs = Arc::new(LogChannel::new(self.settings.logging.history_capacity));
        let recorder = Arc::new(RowRecorder::new(columns.clone(), started, debug));
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let error_slot: Arc<OnceLock<Arc<RunError>>> = Arc::new(OnceLock::new());

        let ctx = RunContext::new(
            run_id,
            name.clone(),
            params.clone(),
            started,
            debug,
            logs.clone(),
            cancel_rx.clone(),
        );
        let manifest = RunManifest::new(run_id, name.clone(), &params, columns, Utc::now(), debug);

        let worker = Worker {
            experiment,
            ctx,
            recorder: recorder.clone(),
            logs: logs.clone(),
            flog: RunLogger::new(logs.clone(), LogSource::Framework),
            settings: self.settings.clone(),
            manifest,
            state_tx,
            cancel_rx,
            error_slot: error_slot.clone(),
        };
        let join = tokio::spawn(worker.drive());

        Ok(RunHandle {
            run_id,
            name,
            debug,
            params,
            state_rx,
            cancel_tx,
            recorder,
            logs,
            error_slot,
            error_seen: AtomicBool::new(false),
            join: Mutex::new(Some(join)),
        })
    }
}

fn validate_columns(columns: &[String]) -> RunResult<()> {
    for (index, column) in columns.iter().enumerate() {
        if RESERVED_COLUMNS.contains(&column.as_str()) {
            return Err(RunError::Validation {
                field: column.clone(),
                reason: "column name is reserved for a derived column".into(),
            });
        }
        if columns[..index].contains(column) {
            return Err(RunError::Validation {
                field: column.clone(),
                reason: "column declared twice".into(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// Worker
// =============================================================================

enum StepsExit {
    Completed,
    Cancelled,
    Failed(RunError),
}

struct Worker {
    experiment: Box<dyn Experiment>,
    ctx: RunContext,
    recorder: Arc<RowRecorder>,
    logs: Arc<LogChannel>,
    flog: RunLogger,
    settings: Arc<Settings>,
    manifest: RunManifest,
    state_tx: watch::Sender<RunState>,
    cancel_rx: watch::Receiver<bool>,
    error_slot: Arc<OnceLock<Arc<RunError>>>,
}

impl Worker {
    fn transition(&self, state: RunState) {
        let _ = self.state_tx.send(state);
        self.flog.info(format!("run state: {state}"));
    }

    /// Log a typed engine error with its debug rendering as the trace.
    fn log_run_error(&self, what: &str, error: &RunError) {
        self.logs.emit(
            Level::Error,
            LogSource::Framework,
            format!("{what}: {error}\n{error:?}"),
        );
    }

    async fn drive(mut self) {
        self.transition(RunState::SettingUp);
        self.flog.info(format!(
            "starting run {} of '{}'{}",
            self.manifest.run_id,
            self.manifest.experiment,
            if self.manifest.debug { " (debug)" } else { "" }
        ));

        let mut error: Option<RunError> = None;
        let mut cancelled_early = false;

        if let Err(e) = self.recorder.open(&self.settings.storage, &mut self.manifest) {
            self.log_run_error("failed to open data sink", &e);
            error = Some(e);
        }

        if error.is_none() {
            match self.experiment.setup(&self.ctx).await {
                Ok(()) => {}
                Err(e) if is_cancellation(&e) => cancelled_early = true,
                Err(e) => {
                    self.logs.emit_with_trace(
                        Level::Error,
                        LogSource::Framework,
                        "setup phase failed",
                        &e,
                    );
                    error = Some(RunError::Lifecycle {
                        phase: Phase::Setup,
                        source: e,
                    });
                }
            }
        }

        let outcome = if error.is_some() {
            self.transition(RunState::Erroring);
            RunOutcome::Failed
        } else if cancelled_early || *self.cancel_rx.borrow() {
            self.transition(RunState::Cancelling);
            RunOutcome::Cancelled
        } else {
            self.transition(RunState::Running);
            match self.run_steps().await {
                StepsExit::Completed => {
                    self.transition(RunState::Completing);
                    RunOutcome::Completed
                }
                StepsExit::Cancelled => {
                    self.transition(RunState::Cancelling);
                    RunOutcome::Cancelled
                }
                StepsExit::Failed(e) => {
                    error = Some(e);
                    self.transition(RunState::Erroring);
                    RunOutcome::Failed
                }
            }
        };

        self.transition(RunState::CleaningUp);
        if let Err(e) = self.experiment.cleanup(&self.ctx, outcome).await {
            self.logs.emit_with_trace(
                Level::Error,
                LogSource::Framework,
                "cleanup phase failed",
                &e,
            );
            // A cleanup failure ends the run as errored, but never displaces
            // an earlier error in user-facing reporting.
            if error.is_none() {
                error = Some(RunError::Lifecycle {
                    phase: Phase::Cleanup,
                    source: e,
                });
            }
        }

        // The sink is released on every terminal path; leaking a file handle
        // across repeated runs is treated as a correctness bug.
        if let Err(e) = self.recorder.close() {
            self.log_run_error("failed to release data sink", &e);
            if error.is_none() {
                error = Some(e);
            }
        }

        let terminal = match error {
            Some(e) => {
                let _ = self.error_slot.set(Arc::new(e));
                RunState::Errored
            }
            None => RunState::Finished,
        };
        self.flog.info(format!("run {}: {outcome}", self.manifest.run_id));
        self.transition(terminal);
    }

    /// Drive the steps stream, recording each row before the next poll.
    ///
    /// Every poll races against the cancellation signal, so a stop request
    /// unblocks the stream even while it is suspended in a wait.
    async fn run_steps(&mut self) -> StepsExit {
        let mut cancel = self.cancel_rx.clone();
        let mut stream = self.experiment.steps(self.ctx.clone());

        loop {
            tokio::select! {
                biased;
                _ = cancel.wait_for(|stop| *stop) => {
                    self.flog.info("stop request observed while steps were suspended");
                    return StepsExit::Cancelled;
                }
                item = stream.next() => match item {
                    None => return StepsExit::Completed,
                    Some(Ok(values)) => {
                        if let Err(e) = self.recorder.append(values) {
                            self.logs.emit(
                                Level::Error,
                                LogSource::Framework,
                                format!("failed to record row: {e}\n{e:?}"),
                            );
                            return StepsExit::Failed(e);
                        }
                    }
                    Some(Err(e)) if is_cancellation(&e) => {
                        self.flog.info("steps observed the stop request");
                        return StepsExit::Cancelled;
                    }
                    Some(Err(e)) => {
                        self.logs.emit_with_trace(
                            Level::Error,
                            LogSource::Framework,
                            "steps phase failed",
                            &e,
                        );
                        return StepsExit::Failed(RunError::Lifecycle {
                            phase: Phase::Steps,
                            source: e,
                        });
                    }
                },
            }
        }
    }
}

fn is_cancellation(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<RunError>()
        .is_some_and(RunError::is_cancelled)
}

// =============================================================================
// Run handle
// =============================================================================

/// Handle to one running (or finished) experiment.
///
/// All methods are safe to call from the presentation side at any time; none
/// of them ever calls into lifecycle code or blocks on the worker task.
pub struct RunHandle {
    run_id: Uuid,
    name: String,
    debug: bool,
    params: ResolvedParams,
    state_rx: watch::Receiver<RunState>,
    cancel_tx: watch::Sender<bool>,
    recorder: Arc<RowRecorder>,
    logs: Arc<LogChannel>,
    error_slot: Arc<OnceLock<Arc<RunError>>>,
    error_seen: AtomicBool,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("name", &self.name)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl RunHandle {
    /// Unique identifier of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Experiment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is a debug run.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// The resolved parameter values for this run.
    pub fn params(&self) -> &ResolvedParams {
        &self.params
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    /// Whether the run has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// A watch receiver for state changes, for callers that prefer awaiting
    /// `changed()` over polling.
    pub fn state_receiver(&self) -> watch::Receiver<RunState> {
        self.state_rx.clone()
    }

    /// Request cancellation. Cooperative: the run proceeds to `cleanup` at
    /// its next suspension point. Safe to call repeatedly or after the run
    /// finished.
    pub fn request_stop(&self) {
        debug!(run_id = %self.run_id, "stop requested");
        let _ = self.cancel_tx.send(true);
    }

    /// Overwrite the sync mark with "now" (last call wins). Affects the
    /// `sync_t` column of rows recorded from here on.
    pub fn request_sync(&self) {
        self.recorder.mark_sync();
    }

    /// A consistent snapshot of all rows recorded so far.
    pub fn snapshot(&self) -> DataSnapshot {
        self.recorder.snapshot()
    }

    /// The retained log history passing `filter`. Non-destructive.
    pub fn poll_logs(&self, filter: &LogFilter) -> Vec<LogRecord> {
        self.logs.history(filter)
    }

    /// Log records with sequence numbers greater than `after`.
    pub fn poll_logs_since(&self, after: u64, filter: &LogFilter) -> Vec<LogRecord> {
        self.logs.since(after, filter)
    }

    /// The run's terminal error, if it ended in `Errored`.
    pub fn error(&self) -> Option<Arc<RunError>> {
        self.error_slot.get().cloned()
    }

    /// Take the one-shot error notification.
    ///
    /// Returns the terminal error exactly once after the run transitions to
    /// `Errored`; every later call returns `None`. This is what a GUI uses
    /// to show a single error dialog per failed run — the full trace stays
    /// available in the log history regardless.
    pub fn take_error_notice(&self) -> Option<Arc<RunError>> {
        if self.state() == RunState::Errored && !self.error_seen.swap(true, Ordering::SeqCst) {
            self.error_slot.get().cloned()
        } else {
            None
        }
    }

    /// Read-only view of this run for visualizers.
    pub fn run_view(&self) -> RunView {
        RunView {
            run_id: self.run_id,
            experiment: self.name.clone(),
            state: self.state(),
            params: self.params.clone(),
            debug: self.debug,
        }
    }

    /// Output file locations, once the sink has been opened. `None` for
    /// debug runs.
    pub fn paths(&self) -> Option<RunPaths> {
        self.recorder.paths().cloned()
    }

    /// Wait for the worker task to finish and return the terminal state.
    /// Intended for tests and embedding; a GUI polls instead.
    pub async fn wait(&self) -> RunState {
        let join = self
            .join
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(join) = join {
            let _ = join.await;
        }
        self.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::protocol::StepStream;
    use async_trait::async_trait;
    use futures::stream;

    struct Empty;

    #[async_trait]
    impl Experiment for Empty {
        fn name(&self) -> &str {
            "empty"
        }

        fn columns(&self) -> Vec<String> {
            vec!["v".to_string()]
        }

        fn steps(&mut self, _ctx: RunContext) -> StepStream<'_> {
            Box::pin(stream::empty())
        }
    }

    fn engine() -> RunEngine {
        RunEngine::new(Arc::new(Settings::default()))
    }

    #[tokio::test]
    async fn empty_run_finishes_cleanly() {
        let handle = engine().start(Box::new(Empty), HashMap::new(), true).unwrap();
        assert_eq!(handle.wait().await, RunState::Finished);
        assert!(handle.snapshot().is_empty());
        assert!(handle.error().is_none());
    }

    #[tokio::test]
    async fn reserved_column_rejected_before_start() {
        struct Reserved;

        #[async_trait]
        impl Experiment for Reserved {
            fn name(&self) -> &str {
                "reserved"
            }

            fn columns(&self) -> Vec<String> {
                vec!["t".to_string()]
            }

            fn steps(&mut self, _ctx: RunContext) -> StepStream<'_> {
                Box::pin(stream::empty())
            }
        }

        let err = engine()
            .start(Box::new(Reserved), HashMap::new(), true)
            .unwrap_err();
        assert!(matches!(err, RunError::Validation { field, .. } if field == "t"));
    }

    #[tokio::test]
    async fn duplicate_column_rejected_before_start() {
        struct Twice;

        #[async_trait]
        impl Experiment for Twice {
            fn name(&self) -> &str {
                "twice"
            }

            fn columns(&self) -> Vec<String> {
                vec!["v".to_string(), "v".to_string()]
            }

            fn steps(&mut self, _ctx: RunContext) -> StepStream<'_> {
                Box::pin(stream::empty())
            }
        }

        assert!(engine().start(Box::new(Twice), HashMap::new(), true).is_err());
    }
}
