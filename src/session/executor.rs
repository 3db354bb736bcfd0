//! Persistent interactive shell executor.
//!
//! One shell channel per executor; state built up on it (environment,
//! working directory via prefixes, background jobs) persists across calls.
//! All channel access goes through a single mutex, so concurrent `execute`
//! calls serialize rather than interleave bytes on the stream. Blocking
//! transport work runs on the blocking pool; the public surface is async.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::{buffers, timeouts};
use crate::errors::ExecError;
use crate::protocol::heredoc;
use crate::protocol::marker::{frame_command, CorrelationMarker, MarkerDecoder};
use crate::protocol::sudo;
use crate::services::logger::Logger;
use crate::session::recovery;
use crate::session::result::{
    CommandAnalysis, ConnectionInfo, ExecStatus, ExecutionRequest, ExecutionResult, SessionConfig,
};
use crate::session::ssh::Ssh2Transport;
use crate::session::transport::Transport;

struct SessionInner {
    transport: Box<dyn Transport>,
    connected: bool,
}

pub struct ShellExecutor {
    config: SessionConfig,
    logger: Logger,
    inner: Arc<Mutex<SessionInner>>,
}

impl ShellExecutor {
    pub fn new(config: SessionConfig) -> Self {
        let transport = Box::new(Ssh2Transport::new(&config));
        Self::with_transport(config, transport)
    }

    /// Build an executor over an arbitrary transport. This is how tests
    /// drive the engine against scripted shells.
    pub fn with_transport(config: SessionConfig, transport: Box<dyn Transport>) -> Self {
        let logger = Logger::new(&format!("session:{}", config.host));
        Self {
            config,
            logger,
            inner: Arc::new(Mutex::new(SessionInner {
                transport,
                connected: false,
            })),
        }
    }

    fn lock(inner: &Mutex<SessionInner>) -> MutexGuard<'_, SessionInner> {
        inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open the shell channel, wait for the login banner and drain it so
    /// the first command decodes against a quiet stream.
    pub async fn connect(&self) -> Result<(), ExecError> {
        if self.config.password.is_none() && self.config.private_key.is_none() {
            return Err(ExecError::Configuration(
                "either password or private_key is required".to_string(),
            ));
        }

        let inner = Arc::clone(&self.inner);
        let settle = self.config.banner_settle;
        let logger = self.logger.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = Self::lock(&inner);
            guard.transport.connect()?;
            thread::sleep(settle);
            recovery::drain(guard.transport.as_mut());
            guard.connected = true;
            logger.info("shell session established", None);
            Ok(())
        })
        .await
        .map_err(|_| ExecError::Transport("connect task failed".to_string()))?
    }

    /// Safe to call repeatedly or when never connected.
    pub async fn disconnect(&self) {
        let inner = Arc::clone(&self.inner);
        let logger = self.logger.clone();
        let _ = tokio::task::spawn_blocking(move || {
            let mut guard = Self::lock(&inner);
            if guard.connected {
                logger.info("shell session closed", None);
            }
            guard.transport.close();
            guard.connected = false;
        })
        .await;
    }

    /// Round-trip liveness check through the full marker protocol.
    pub async fn is_alive(&self) -> bool {
        {
            let guard = Self::lock(&self.inner);
            if !guard.connected {
                return false;
            }
        }
        let mut request = ExecutionRequest::new("echo connection_check");
        request.timeout = Some(Duration::from_millis(timeouts::ALIVE_PROBE_MS));
        let result = self.execute(request).await;
        matches!(result.status, ExecStatus::Success | ExecStatus::Recovered)
    }

    /// Run one command. Failures never surface as `Err`; they are folded
    /// into the result's status and diagnostic fields.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let inner = Arc::clone(&self.inner);
        let config = self.config.clone();
        let logger = self.logger.clone();
        let command = request.command.clone();
        tokio::task::spawn_blocking(move || execute_blocking(&config, &logger, &inner, &request))
            .await
            .unwrap_or_else(|_| ExecutionResult::failure(&command, "execution task failed"))
    }

    /// Run requests in order, carrying the working directory across calls.
    /// A `cd` command updates the tracked directory; later requests inherit
    /// it so the change survives even though each invocation is framed
    /// independently. A request-supplied `working_directory` wins over the
    /// tracked one; per-request timeouts and sudo passwords apply as in
    /// [`execute`](Self::execute).
    pub async fn execute_sequence(
        &self,
        requests: &[ExecutionRequest],
        stop_on_error: bool,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(requests.len());
        let mut cwd: Option<String> = None;
        for request in requests {
            let mut request = request.clone();
            if request.working_directory.is_none() {
                request.working_directory = cwd.clone();
            }
            let command = request.command.clone();
            let result = self.execute(request).await;
            let ok = matches!(result.status, ExecStatus::Success | ExecStatus::Recovered);
            results.push(result);
            if !ok {
                if stop_on_error {
                    break;
                }
                // A failed cd must not poison the tracked directory.
                continue;
            }
            track_cwd(&mut cwd, &command);
        }
        results
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        let guard = Self::lock(&self.inner);
        ConnectionInfo {
            host: self.config.host.clone(),
            port: self.config.port,
            username: self.config.username.clone(),
            connected: guard.connected && guard.transport.is_active(),
            auto_sudo_fix: self.config.auto_sudo_fix,
            session_recovery: self.config.session_recovery,
            sudo_configured: self.config.effective_sudo_password().is_some(),
        }
    }

    /// Pure analysis of what execution would do to a command. No session
    /// or connection required; passwords in previews are masked.
    pub fn analyze_command(command: &str) -> CommandAnalysis {
        let privilege_escalation = sudo::detect(command);
        let (rewrite_with_password, rewrite_without_password) = if privilege_escalation {
            let (with_pw, changed_pw) = sudo::rewrite(command, Some("***"));
            let (without_pw, changed) = sudo::rewrite(command, None);
            (changed_pw.then_some(with_pw), changed.then_some(without_pw))
        } else {
            (None, None)
        };
        CommandAnalysis {
            command: command.to_string(),
            privilege_escalation,
            rewrite_with_password,
            rewrite_without_password,
            heredoc: heredoc::analyze(command, true),
        }
    }
}

fn track_cwd(cwd: &mut Option<String>, command: &str) {
    let trimmed = command.trim();
    let Some(rest) = trimmed.strip_prefix("cd ") else {
        return;
    };
    let target = rest.trim().trim_matches(|c| c == '\'' || c == '"');
    if target.is_empty() {
        return;
    }
    if target.starts_with('/') {
        *cwd = Some(target.to_string());
    } else {
        *cwd = Some(match cwd.as_deref() {
            Some(base) => format!("{}/{}", base, target),
            None => target.to_string(),
        });
    }
}

/// Per-request timeout, else the session default. Sudo-rewritten commands
/// are clamped: non-interactive sudo fails fast, so a long deadline only
/// delays the verdict.
fn effective_timeout(requested: Option<Duration>, default: Duration, sudo_rewritten: bool) -> Duration {
    let timeout = requested.unwrap_or(default);
    if sudo_rewritten {
        timeout.min(Duration::from_millis(timeouts::SUDO_CLAMP_MS))
    } else {
        timeout
    }
}

fn execute_blocking(
    config: &SessionConfig,
    logger: &Logger,
    inner: &Mutex<SessionInner>,
    request: &ExecutionRequest,
) -> ExecutionResult {
    let started_at = Instant::now();
    let original = request.command.as_str();
    let mut guard = ShellExecutor::lock(inner);
    if !guard.connected {
        return ExecutionResult::failure(original, "shell session is not connected");
    }

    // The directory prefix is bookkeeping, not a rewrite; `rewritten_command`
    // compares against this baseline.
    let baseline = match request.working_directory.as_deref() {
        Some(dir) => format!("cd '{}' && {}", dir, original),
        None => original.to_string(),
    };
    let mut command = baseline.clone();

    // Heredoc bodies must pass through untouched, so heredoc commands are
    // repaired but never sudo-rewritten.
    let heredoc_report = heredoc::analyze(&command, true);
    let mut sudo_rewritten = false;
    if let Some(report) = &heredoc_report {
        if report.changed {
            command = report.fixed_command.clone();
        }
    } else if config.auto_sudo_fix && sudo::detect(&command) {
        let password = request
            .sudo_password
            .as_deref()
            .or_else(|| config.effective_sudo_password());
        let (rewritten, changed) = sudo::rewrite(&command, password);
        if changed {
            command = rewritten;
            sudo_rewritten = true;
        }
    }
    let timeout = effective_timeout(
        request.timeout,
        config.default_command_timeout,
        sudo_rewritten,
    );

    logger.debug(
        "executing command",
        Some(&serde_json::json!({
            "length": command.len(),
            "timeout_ms": timeout.as_millis() as u64,
            "sudo_rewritten": sudo_rewritten,
            "heredoc": heredoc_report.is_some(),
        })),
    );

    let mut result = ExecutionResult {
        stdout: String::new(),
        stderr: String::new(),
        exit_code: None,
        status: ExecStatus::Error,
        elapsed: Duration::ZERO,
        original_command: original.to_string(),
        rewritten_command: (command != baseline).then(|| command.clone()),
        sudo_rewritten,
        session_recovered: false,
        heredoc: heredoc_report,
    };

    // Stale output from earlier activity must not leak into this decode.
    recovery::drain(guard.transport.as_mut());

    let marker = CorrelationMarker::fresh();
    let framed = frame_command(&command, &marker);
    if let Err(err) = guard.transport.send(framed.as_bytes()) {
        result.stderr = err.to_string();
        result.elapsed = started_at.elapsed();
        return result;
    }

    let mut decoder = MarkerDecoder::new(marker);
    let deadline = started_at + timeout;
    let poll = Duration::from_millis(timeouts::RECV_POLL_MS);
    while Instant::now() < deadline {
        match guard.transport.recv(buffers::RECV_CHUNK_BYTES, poll) {
            Ok(chunk) if chunk.is_empty() => thread::sleep(Duration::from_millis(10)),
            Ok(chunk) => {
                decoder.feed(&String::from_utf8_lossy(&chunk));
                if decoder.is_done() {
                    break;
                }
            }
            Err(err) => {
                result.stderr = err.to_string();
                result.elapsed = started_at.elapsed();
                return result;
            }
        }
    }

    if decoder.is_done() {
        let output = decoder.into_output();
        result.stdout = output.stdout;
        result.exit_code = output.exit_code;
        result.status = ExecStatus::Success;
        result.elapsed = started_at.elapsed();
        return result;
    }

    if !decoder.started() {
        result.stderr = "command start marker never observed".to_string();
        result.elapsed = started_at.elapsed();
        return result;
    }

    // Deadline elapsed mid-command. Partial output is kept for diagnosis
    // but the status tells the caller not to trust it.
    logger.warn(
        "command deadline elapsed",
        Some(&serde_json::json!({ "timeout_ms": timeout.as_millis() as u64 })),
    );
    result.status = ExecStatus::Timeout;
    result.stderr = format!("command timed out after {} ms", timeout.as_millis());
    let output = decoder.into_output();
    result.stdout = output.stdout;
    result.exit_code = output.exit_code;

    if config.session_recovery {
        let recovery_logger = logger.child("recovery");
        if recovery::run(guard.transport.as_mut(), &config.recovery, &recovery_logger) {
            result.status = ExecStatus::Recovered;
            result.session_recovered = true;
            result.stderr.push_str("\n[session recovery succeeded]");
        } else {
            result.stderr.push_str("\n[session recovery failed]");
            thread::sleep(config.recovery.reconnect_delay);
            guard.transport.close();
            match guard.transport.connect() {
                Ok(()) => {
                    recovery::drain(guard.transport.as_mut());
                    result.stderr.push_str("\n[forced reconnect succeeded]");
                }
                Err(_) => {
                    guard.connected = false;
                    result
                        .stderr
                        .push_str("\n[forced reconnect failed: disconnected]");
                }
            }
        }
    }

    result.elapsed = started_at.elapsed();
    result
}

#[cfg(test)]
mod tests {
    use super::{effective_timeout, track_cwd};
    use crate::constants::timeouts;
    use std::time::Duration;

    #[test]
    fn absolute_cd_replaces_tracked_directory() {
        let mut cwd = Some("/home/user".to_string());
        track_cwd(&mut cwd, "cd /var/log");
        assert_eq!(cwd.as_deref(), Some("/var/log"));
    }

    #[test]
    fn relative_cd_appends_to_tracked_directory() {
        let mut cwd = Some("/var".to_string());
        track_cwd(&mut cwd, "cd log");
        assert_eq!(cwd.as_deref(), Some("/var/log"));
    }

    #[test]
    fn quoted_cd_targets_are_unwrapped() {
        let mut cwd = None;
        track_cwd(&mut cwd, "cd '/opt/app'");
        assert_eq!(cwd.as_deref(), Some("/opt/app"));
    }

    #[test]
    fn timeout_falls_back_to_the_session_default() {
        let default = Duration::from_secs(300);
        assert_eq!(effective_timeout(None, default, false), default);
        assert_eq!(
            effective_timeout(Some(Duration::from_secs(5)), default, false),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn sudo_rewritten_timeouts_are_clamped() {
        let clamp = Duration::from_millis(timeouts::SUDO_CLAMP_MS);
        assert_eq!(
            effective_timeout(Some(Duration::from_secs(600)), Duration::from_secs(300), true),
            clamp
        );
        assert_eq!(effective_timeout(None, Duration::from_secs(300), true), clamp);
        // A caller asking for less than the ceiling keeps their deadline.
        assert_eq!(
            effective_timeout(Some(Duration::from_secs(5)), Duration::from_secs(300), true),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn non_cd_commands_leave_directory_alone() {
        let mut cwd = Some("/tmp".to_string());
        track_cwd(&mut cwd, "ls -la");
        assert_eq!(cwd.as_deref(), Some("/tmp"));
        track_cwd(&mut cwd, "cdparanoia --help");
        assert_eq!(cwd.as_deref(), Some("/tmp"));
    }
}
