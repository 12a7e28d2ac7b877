//! The experiment trait and step stream types.
//!
//! An experiment is defined by implementing [`Experiment`]: declare a name,
//! the measurement columns, and the parameter fields, then provide the three
//! lifecycle phases. `steps` is expressed as an async stream of rows — each
//! yielded mapping becomes one recorded measurement, and every `.await`
//! inside the stream is a point where a stop request can take effect.
//!
//! # Example
//!
//! ```rust,ignore
//! use benchrun::experiment::{Experiment, RunContext, StepStream};
//! use benchrun::field::FieldDescriptor;
//! use futures::{stream, StreamExt};
//! use std::time::Duration;
//!
//! struct ResistanceSweep;
//!
//! #[async_trait::async_trait]
//! impl Experiment for ResistanceSweep {
//!     fn name(&self) -> &str {
//!         "r-continuous"
//!     }
//!
//!     fn columns(&self) -> Vec<String> {
//!         vec!["R".to_string()]
//!     }
//!
//!     fn fields(&self) -> Vec<FieldDescriptor> {
//!         vec![FieldDescriptor::float("interval", 1.0).with_range(0.01, 60.0)]
//!     }
//!
//!     fn steps(&mut self, ctx: RunContext) -> StepStream<'_> {
//!         let interval = ctx.params().f64("interval").unwrap_or(1.0);
//!         stream::unfold(ctx, move |ctx| async move {
//!             if let Err(e) = ctx.sleep(Duration::from_secs_f64(interval)).await {
//!                 return Some((Err(e.into()), ctx));
//!             }
//!             let mut row = std::collections::HashMap::new();
//!             row.insert("R".to_string(), serde_json::json!(998.7));
//!             Some((Ok(row), ctx))
//!         })
//!         .boxed()
//!     }
//! }
//! ```

use crate::data::row::RowValues;
use crate::experiment::context::RunContext;
use crate::experiment::state::RunOutcome;
use crate::field::FieldDescriptor;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Type alias for step streams.
///
/// Each `Ok` item is one measurement row; an `Err` item ends the run. Yielding
/// [`RunError::Cancelled`](crate::error::RunError::Cancelled) (as produced by
/// the cancellable context methods) is the controlled way for lifecycle code
/// to exit after a stop request and is not treated as a failure.
pub type StepStream<'a> = BoxStream<'a, Result<RowValues>>;

/// A user-defined experiment: declarative parameters plus the
/// `setup → steps → cleanup` lifecycle.
///
/// The three phases execute strictly in sequence on one dedicated worker
/// task; none of them ever runs on the presentation side. `cleanup` is
/// invoked exactly once per run — after completion, cancellation, or failure
/// alike — with the [`RunOutcome`] describing which of those it was.
#[async_trait]
pub trait Experiment: Send + 'static {
    /// Experiment name; also the base of the output file names.
    fn name(&self) -> &str;

    /// Declared measurement columns. A row emitting any other column is a
    /// schema error; a row omitting one records that cell as empty.
    fn columns(&self) -> Vec<String>;

    /// Declarative parameter fields, resolved and validated at run start.
    fn fields(&self) -> Vec<FieldDescriptor> {
        Vec::new()
    }

    /// Prepare instruments and state. Runs before any row can be emitted.
    async fn setup(&mut self, _ctx: &RunContext) -> Result<()> {
        Ok(())
    }

    /// Produce the measurement rows.
    ///
    /// Use [`RunContext::sleep`] instead of bare timer sleeps so delays end
    /// promptly on a stop request; long synchronous sections without an
    /// `.await` cannot observe cancellation until they return.
    fn steps(&mut self, ctx: RunContext) -> StepStream<'_>;

    /// Release instruments and state. Always runs, exactly once.
    ///
    /// Errors raised here are logged; they only become the run's reported
    /// error when no earlier phase failed.
    async fn cleanup(&mut self, _ctx: &RunContext, _outcome: RunOutcome) -> Result<()> {
        Ok(())
    }
}
