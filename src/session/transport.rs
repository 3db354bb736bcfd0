//! Byte-stream transport abstraction.
//!
//! The engine talks to an interactive shell through this trait so the
//! protocol and recovery logic can be exercised against scripted fakes.
//! The production implementation is [`crate::session::ssh::Ssh2Transport`].

use std::time::Duration;

use crate::errors::ExecError;

pub trait Transport: Send {
    /// Establish the channel. Idempotent reconnects are allowed; any prior
    /// channel state is discarded.
    fn connect(&mut self) -> Result<(), ExecError>;

    /// Write all of `data` to the shell's stdin.
    fn send(&mut self, data: &[u8]) -> Result<(), ExecError>;

    /// Read up to `max_bytes`, polling until `timeout` elapses. An empty
    /// vector means no data arrived in the window, not end of stream.
    fn recv(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, ExecError>;

    /// Tear down the channel. Must be safe to call repeatedly.
    fn close(&mut self);

    fn is_active(&self) -> bool;
}
