//! Request, result and configuration types for the execution engine.

use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::constants::{network, timeouts};
use crate::protocol::heredoc::HeredocReport;
use crate::session::recovery::RecoveryProfile;

/// Terminal status of one command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    /// End marker and exit-code line decoded within the deadline.
    Success,
    /// Deadline elapsed and recovery could not confirm a responsive shell.
    Timeout,
    /// The invocation never started, or the transport failed mid-call.
    Error,
    /// Deadline elapsed but recovery restored a responsive shell. The
    /// decoded output is partial and must not be trusted.
    Recovered,
}

/// One command to run, with optional per-call overrides.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub command: String,
    /// Falls back to the session default when unset.
    pub timeout: Option<Duration>,
    /// Prefixed as `cd '<dir>' && ` so the change is scoped to this call.
    pub working_directory: Option<String>,
    /// Overrides the session-level sudo password for this call only.
    pub sudo_password: Option<String>,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: None,
            working_directory: None,
            sudo_password: None,
        }
    }
}

/// Outcome of one invocation. Failures are folded into `status` and the
/// diagnostic fields rather than surfaced as errors, so sequence execution
/// can decide per command whether to continue.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    /// Engine breadcrumbs (recovery notes), never remote stderr; the PTY
    /// merges remote stderr into stdout.
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub status: ExecStatus,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_elapsed")]
    pub elapsed: Duration,
    pub original_command: String,
    /// Set when sudo rewriting or heredoc repair changed the command that
    /// was sent. A working-directory prefix alone does not count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_command: Option<String>,
    pub sudo_rewritten: bool,
    pub session_recovered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heredoc: Option<HeredocReport>,
}

fn serialize_elapsed<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

impl ExecutionResult {
    pub(crate) fn failure(command: &str, message: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.to_string(),
            exit_code: None,
            status: ExecStatus::Error,
            elapsed: Duration::ZERO,
            original_command: command.to_string(),
            rewritten_command: None,
            sudo_rewritten: false,
            session_recovered: false,
            heredoc: None,
        }
    }
}

/// Connection and behavior settings for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    /// PEM-encoded private key material, not a path.
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
    pub connect_timeout: Duration,
    /// Settle time before the login banner is drained off a fresh shell.
    pub banner_settle: Duration,
    pub default_command_timeout: Duration,
    /// Used for `sudo -S` rewriting. Defaults to the login password.
    pub sudo_password: Option<String>,
    pub auto_sudo_fix: bool,
    pub session_recovery: bool,
    pub recovery: RecoveryProfile,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: network::SSH_DEFAULT_PORT,
            username: username.into(),
            password: None,
            private_key: None,
            passphrase: None,
            connect_timeout: Duration::from_millis(network::TIMEOUT_CONNECT_MS),
            banner_settle: Duration::from_millis(timeouts::BANNER_SETTLE_MS),
            default_command_timeout: Duration::from_millis(timeouts::DEFAULT_COMMAND_MS),
            sudo_password: None,
            auto_sudo_fix: true,
            session_recovery: true,
            recovery: RecoveryProfile::default(),
        }
    }

    /// Password handed to the sudo rewriter. The login password is the
    /// sudo password on typical hosts, so it serves as the fallback.
    pub fn effective_sudo_password(&self) -> Option<&str> {
        self.sudo_password.as_deref().or(self.password.as_deref())
    }
}

/// Sanitized session snapshot. Carries no credential material.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub connected: bool,
    pub auto_sudo_fix: bool,
    pub session_recovery: bool,
    /// True when a sudo password is available for `-S` rewriting.
    pub sudo_configured: bool,
}

/// Pure what-if analysis of a command, with no session required.
#[derive(Debug, Clone, Serialize)]
pub struct CommandAnalysis {
    pub command: String,
    pub privilege_escalation: bool,
    /// Preview of the `-S` form with the password masked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_with_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_without_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heredoc: Option<HeredocReport>,
}
