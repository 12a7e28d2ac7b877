//! The instrument capability boundary.
//!
//! Lifecycle code drives bench hardware through the [`Instrument`] trait:
//! opaque, synchronous operations (connect, identify, write, query, close).
//! The engine treats these calls as suspension-free; a driver that wants to
//! be cancellable should keep individual operations short and let the
//! lifecycle code interleave [`RunContext::sleep`](crate::experiment::RunContext::sleep)
//! or [`RunContext::checkpoint`](crate::experiment::RunContext::checkpoint)
//! between them.
//!
//! Concrete drivers live outside this crate; [`mock::MockMultimeter`] is
//! provided for tests and dry-run experiments.

pub mod mock;

use anyhow::Result;

/// An opaque synchronous instrument connection.
pub trait Instrument: Send {
    /// Open the connection.
    fn connect(&mut self) -> Result<()>;

    /// Return the instrument identification string (e.g. the `*IDN?` reply).
    fn identify(&mut self) -> Result<String>;

    /// Send a command that produces no reply.
    fn write(&mut self, command: &str) -> Result<()>;

    /// Send a command and read its reply.
    fn query(&mut self, command: &str) -> Result<String>;

    /// Release the connection. Drivers should make this idempotent so
    /// `cleanup` can call it unconditionally.
    fn close(&mut self) -> Result<()>;
}
