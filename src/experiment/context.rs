//! Per-run context handed to lifecycle code.
//!
//! The context is a cheap clone of shared run state: resolved parameters,
//! the experiment logger, the monotonic run clock, and the cancellation
//! signal. It is scoped to one run — never a process-wide singleton — so
//! lifecycle code and visualizers only ever see the run they belong to.

use crate::error::{RunError, RunResult};
use crate::field::ResolvedParams;
use crate::logbus::{LogChannel, LogSource, RunLogger};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

struct ContextInner {
    run_id: Uuid,
    name: String,
    params: ResolvedParams,
    started: Instant,
    debug: bool,
    logger: RunLogger,
    cancel: watch::Receiver<bool>,
}

/// Read-only handle into one run, cloneable into lifecycle code and streams.
#[derive(Clone)]
pub struct RunContext {
    inner: Arc<ContextInner>,
}

impl RunContext {
    pub(crate) fn new(
        run_id: Uuid,
        name: String,
        params: ResolvedParams,
        started: Instant,
        debug: bool,
        logs: Arc<LogChannel>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                run_id,
                name,
                params,
                started,
                debug,
                logger: RunLogger::new(logs, LogSource::Experiment),
                cancel,
            }),
        }
    }

    /// Unique identifier of this run.
    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    /// Experiment name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The resolved parameter values for this run.
    pub fn params(&self) -> &ResolvedParams {
        &self.inner.params
    }

    /// Whether this is a debug run (no durable persistence).
    pub fn is_debug(&self) -> bool {
        self.inner.debug
    }

    /// Seconds elapsed since the run started (monotonic clock; the same
    /// clock that produces the `t` column).
    pub fn elapsed(&self) -> f64 {
        self.inner.started.elapsed().as_secs_f64()
    }

    /// The experiment-side logger for this run.
    pub fn logger(&self) -> RunLogger {
        self.inner.logger.clone()
    }

    /// Whether a stop has been requested. Prefer [`checkpoint`](Self::checkpoint)
    /// inside loops.
    pub fn is_cancel_requested(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    /// Cancellation point for synchronous sections.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Cancelled`] once a stop has been requested, so a
    /// `ctx.checkpoint()?` at the top of a loop converts the request into a
    /// controlled exit.
    pub fn checkpoint(&self) -> RunResult<()> {
        if self.is_cancel_requested() {
            Err(RunError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cancellable sleep. Use this instead of a bare timer sleep: the delay
    /// ends as soon as a stop is requested, not when the timer fires.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Cancelled`] if a stop was requested before or
    /// during the delay.
    pub async fn sleep(&self, duration: Duration) -> RunResult<()> {
        let mut cancel = self.inner.cancel.clone();
        tokio::select! {
            biased;
            // A closed channel means the engine is gone; treat as cancelled.
            _ = cancel.wait_for(|stop| *stop) => Err(RunError::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
