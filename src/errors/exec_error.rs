use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// `Execute` itself never returns these to the caller: transport failures
/// and decode timeouts are folded into `ExecutionResult` diagnostic fields
/// so that batch execution can continue past individual failures. The
/// error type surfaces from `connect` and from `Transport` implementations.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("shell session is not connected")]
    NotConnected,

    /// Missing credential material at connect time. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O failure during send/recv. Local to one call; the session stays
    /// connected for the next call.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The overall deadline elapsed before the decode state machine
    /// reached `Done`. Always resolved through recovery into a terminal
    /// status before a result is returned.
    #[error("deadline elapsed before the end marker was observed")]
    DecodeTimeout,
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Transport(err.to_string())
    }
}

impl From<ssh2::Error> for ExecError {
    fn from(err: ssh2::Error) -> Self {
        ExecError::Transport(err.to_string())
    }
}
