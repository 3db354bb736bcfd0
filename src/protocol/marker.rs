//! Marker protocol codec.
//!
//! The interactive shell stream carries no framing, so every invocation is
//! wrapped in a pair of high-entropy markers plus an exit-code line. The
//! decoder is an explicit four-state machine; each transition is driven by
//! one complete line of output. If a command happens to print a line that
//! matches a marker the decode mis-terminates; with 128 bits of entropy per
//! marker that risk is accepted rather than defended against.

use uuid::Uuid;

const MARKER_BASE: &str = "SSH_CMD_MARKER";
const EXIT_CODE_PREFIX: &str = "EXIT_CODE:";

/// Unique per-invocation token pair. Never reused across calls.
#[derive(Debug, Clone)]
pub struct CorrelationMarker {
    pub start: String,
    pub end: String,
}

impl CorrelationMarker {
    pub fn fresh() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            start: format!("{}_START_{}", MARKER_BASE, id),
            end: format!("{}_END_{}", MARKER_BASE, id),
        }
    }
}

/// Wraps a command so its output window and exit status can be recovered
/// from the raw stream. The result is newline-terminated and sent as one
/// line; embedded newlines (heredoc bodies) are preserved.
pub fn frame_command(command: &str, marker: &CorrelationMarker) -> String {
    format!(
        "echo '{start}' && ({command}); exit_code=$?; echo '{end}'; echo '{prefix}'$exit_code\n",
        start = marker.start,
        command = command,
        end = marker.end,
        prefix = EXIT_CODE_PREFIX,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    WaitStart,
    Collecting,
    WaitExitCode,
    Done,
}

/// Incremental decoder for one framed invocation.
///
/// Chunks are buffered and split on newlines; a trailing partial line is
/// carried over to the next `feed`. Lines are matched by containment, not
/// equality, because the shell echoes the sent command line back (that echo
/// contains both markers on one line and must only arm the start state).
#[derive(Debug)]
pub struct MarkerDecoder {
    marker: CorrelationMarker,
    state: DecodeState,
    stdout_lines: Vec<String>,
    exit_code: Option<i32>,
    carry: String,
}

impl MarkerDecoder {
    pub fn new(marker: CorrelationMarker) -> Self {
        Self {
            marker,
            state: DecodeState::WaitStart,
            stdout_lines: Vec::new(),
            exit_code: None,
            carry: String::new(),
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// True once the start marker has been observed.
    pub fn started(&self) -> bool {
        self.state != DecodeState::WaitStart
    }

    pub fn is_done(&self) -> bool {
        self.state == DecodeState::Done
    }

    /// Feed a raw chunk from the transport.
    pub fn feed(&mut self, chunk: &str) {
        self.carry.push_str(chunk);
        while let Some(pos) = self.carry.find('\n') {
            let line: String = self.carry.drain(..=pos).collect();
            self.feed_line(line.trim());
            if self.is_done() {
                // Anything past DONE belongs to the next prompt, not to us.
                self.carry.clear();
                return;
            }
        }
    }

    /// One transition of the state machine. `line` must be a single
    /// whitespace-trimmed line.
    pub fn feed_line(&mut self, line: &str) {
        match self.state {
            DecodeState::WaitStart => {
                if line.contains(&self.marker.start) {
                    self.state = DecodeState::Collecting;
                }
                // Stale banners and prompt noise are discarded.
            }
            DecodeState::Collecting => {
                if line.contains(&self.marker.start) {
                    // Residual echo of our own command line.
                } else if line.contains(&self.marker.end) {
                    self.state = DecodeState::WaitExitCode;
                } else if !line.is_empty() {
                    self.stdout_lines.push(line.to_string());
                }
            }
            DecodeState::WaitExitCode => {
                if let Some(rest) = line.strip_prefix(EXIT_CODE_PREFIX) {
                    // Parse failure leaves the exit code unset.
                    self.exit_code = rest.trim().parse::<i32>().ok();
                    self.state = DecodeState::Done;
                }
            }
            DecodeState::Done => {}
        }
    }

    pub fn into_output(self) -> DecodedOutput {
        DecodedOutput {
            stdout: self.stdout_lines.join("\n"),
            exit_code: self.exit_code,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodedOutput {
    pub stdout: String,
    pub exit_code: Option<i32>,
}
