//! Session recovery state machine.
//!
//! When a command overruns its deadline the shell may still be running it,
//! sitting in a pager, or wedged. Recovery interrupts whatever is in the
//! foreground, drains the leftover stream, and probes for a responsive
//! prompt. The interrupt burst is intentionally broad: Ctrl-C for normal
//! processes, ESC and `q` for pagers and editors, bare newlines to flush a
//! half-typed line.

use std::thread;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::constants::{buffers, recovery, timeouts};
use crate::errors::ExecError;
use crate::services::logger::Logger;
use crate::session::transport::Transport;

/// Interrupt burst sent at the start of every round, in order.
pub const INTERRUPT_SEQUENCE: [&str; 5] = ["\x03", "\x1b", "\n", "\x03\n", "q\n"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Stable,
    Interrupting,
    Draining,
    Probing,
    Failed,
}

/// Tunable pacing for recovery. Production uses the defaults; tests shrink
/// the pauses to keep runs fast.
#[derive(Debug, Clone)]
pub struct RecoveryProfile {
    pub interrupt_pause: Duration,
    pub round_pause: Duration,
    pub probe_window: Duration,
    pub reconnect_delay: Duration,
    /// Rounds after the first, so total attempts is `1 + extra_rounds`.
    pub extra_rounds: usize,
}

impl Default for RecoveryProfile {
    fn default() -> Self {
        Self {
            interrupt_pause: Duration::from_millis(recovery::INTERRUPT_PAUSE_MS),
            round_pause: Duration::from_millis(recovery::ROUND_PAUSE_MS),
            probe_window: Duration::from_millis(recovery::PROBE_WINDOW_MS),
            reconnect_delay: Duration::from_millis(recovery::RECONNECT_DELAY_MS),
            extra_rounds: recovery::EXTRA_ROUNDS,
        }
    }
}

/// Drive the recovery machine until the shell answers a probe or the round
/// budget is spent. Returns true when the session is usable again.
pub fn run(transport: &mut dyn Transport, profile: &RecoveryProfile, logger: &Logger) -> bool {
    let mut state = RecoveryState::Interrupting;
    let mut round = 0usize;
    let total_rounds = 1 + profile.extra_rounds;

    loop {
        match state {
            RecoveryState::Interrupting => {
                logger.debug(
                    "sending interrupt burst",
                    Some(&serde_json::json!({ "round": round + 1 })),
                );
                if interrupt(transport, profile).is_err() {
                    state = RecoveryState::Failed;
                } else {
                    state = RecoveryState::Draining;
                }
            }
            RecoveryState::Draining => {
                drain(transport);
                state = RecoveryState::Probing;
            }
            RecoveryState::Probing => {
                if probe(transport, profile.probe_window) {
                    state = RecoveryState::Stable;
                } else {
                    round += 1;
                    if round >= total_rounds {
                        state = RecoveryState::Failed;
                    } else {
                        thread::sleep(profile.round_pause);
                        state = RecoveryState::Interrupting;
                    }
                }
            }
            RecoveryState::Stable => {
                logger.info(
                    "session recovered",
                    Some(&serde_json::json!({ "rounds": round + 1 })),
                );
                return true;
            }
            RecoveryState::Failed => {
                logger.warn(
                    "session recovery failed",
                    Some(&serde_json::json!({ "rounds": round })),
                );
                return false;
            }
        }
    }
}

fn interrupt(transport: &mut dyn Transport, profile: &RecoveryProfile) -> Result<(), ExecError> {
    for signal in INTERRUPT_SEQUENCE {
        transport.send(signal.as_bytes())?;
        thread::sleep(profile.interrupt_pause);
    }
    Ok(())
}

/// Discard whatever the interrupted command left in the stream.
pub fn drain(transport: &mut dyn Transport) {
    let window = Duration::from_millis(timeouts::RECV_POLL_MS);
    for _ in 0..32 {
        match transport.recv(buffers::PROBE_CHUNK_BYTES, window) {
            Ok(chunk) if chunk.is_empty() => return,
            Ok(_) => continue,
            Err(_) => return,
        }
    }
}

/// Send a unique probe and wait for it to come back as a standalone line.
/// The PTY echoes the `echo '...'` command itself too; the quotes in that
/// echo keep it from matching the bare token.
fn probe(transport: &mut dyn Transport, window: Duration) -> bool {
    let id = Uuid::new_v4().simple().to_string();
    let token = format!("RECOVERY_PROBE_{}", &id[..8]);
    if transport
        .send(format!("echo '{}'\n", token).as_bytes())
        .is_err()
    {
        return false;
    }

    let deadline = Instant::now() + window;
    let mut seen = String::new();
    while Instant::now() < deadline {
        let chunk = match transport.recv(
            buffers::PROBE_CHUNK_BYTES,
            Duration::from_millis(timeouts::RECV_POLL_MS),
        ) {
            Ok(chunk) => chunk,
            Err(_) => return false,
        };
        if !chunk.is_empty() {
            seen.push_str(&String::from_utf8_lossy(&chunk));
            if seen.lines().any(|line| line.trim() == token) {
                return true;
            }
        }
    }
    false
}
