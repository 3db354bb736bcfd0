//! Marker-framed command execution over a persistent interactive remote
//! shell. One [`ShellExecutor`] owns one shell channel; commands are
//! wrapped in unique correlation markers, decoded by a state machine, and
//! guarded by sudo rewriting, heredoc repair and stall recovery.

pub mod constants;
pub mod errors;
pub mod protocol;
pub mod services;
pub mod session;

pub use errors::ExecError;
pub use session::executor::ShellExecutor;
pub use session::recovery::RecoveryProfile;
pub use session::result::{
    CommandAnalysis, ConnectionInfo, ExecStatus, ExecutionRequest, ExecutionResult, SessionConfig,
};
pub use session::transport::Transport;
