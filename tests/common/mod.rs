//! Scripted in-memory shell transport for engine tests.
//!
//! Parses each framed command it receives, queues back a start-marker line
//! and, unless told to stall, a canned body plus end-marker and exit-code
//! lines. Recovery probes are answered when `probe_responsive` is set.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use markshell::errors::ExecError;
use markshell::Transport;

#[derive(Debug, Clone)]
pub struct CannedReply {
    pub body: Vec<String>,
    pub exit_code: i32,
}

impl CannedReply {
    pub fn new(body: &[&str], exit_code: i32) -> Self {
        Self {
            body: body.iter().map(|s| s.to_string()).collect(),
            exit_code,
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptState {
    pub canned: VecDeque<CannedReply>,
    /// Emit only the start marker for framed commands, then go silent.
    pub stall_after_start: bool,
    /// Answer recovery probes by echoing the token back.
    pub probe_responsive: bool,
    /// Fail every connect after the first, to exercise forced reconnects.
    pub fail_reconnect: bool,
    /// Report a closed channel once the queued bytes run out.
    pub fail_when_drained: bool,
    pub pending: VecDeque<u8>,
    pub sent: Vec<String>,
    pub active: bool,
    pub connects: usize,
}

#[derive(Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    pub fn state(&self) -> Arc<Mutex<ScriptState>> {
        Arc::clone(&self.state)
    }

    pub fn push_reply(&self, reply: CannedReply) {
        self.state.lock().unwrap().canned.push_back(reply);
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_frames(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|s| s.contains("SSH_CMD_MARKER_START_"))
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }
}

fn marker_id(text: &str) -> Option<String> {
    let start = text.find("SSH_CMD_MARKER_START_")? + "SSH_CMD_MARKER_START_".len();
    let id: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    (!id.is_empty()).then_some(id)
}

fn quoted_token(text: &str) -> Option<&str> {
    let open = text.find('\'')?;
    let rest = &text[open + 1..];
    let close = rest.find('\'')?;
    Some(&rest[..close])
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> Result<(), ExecError> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if state.fail_reconnect && state.connects > 1 {
            return Err(ExecError::Transport("connection refused".to_string()));
        }
        state.active = true;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), ExecError> {
        let text = String::from_utf8_lossy(data).to_string();
        let mut state = self.state.lock().unwrap();

        if text.contains("RECOVERY_PROBE_") {
            if state.probe_responsive {
                if let Some(token) = quoted_token(&text) {
                    let line = format!("{}\n", token);
                    state.pending.extend(line.as_bytes());
                }
            }
        } else if let Some(id) = marker_id(&text) {
            let mut lines = vec![format!("SSH_CMD_MARKER_START_{}", id)];
            if !state.stall_after_start {
                let reply = state
                    .canned
                    .pop_front()
                    .unwrap_or_else(|| CannedReply::new(&[], 0));
                lines.extend(reply.body.iter().cloned());
                lines.push(format!("SSH_CMD_MARKER_END_{}", id));
                lines.push(format!("EXIT_CODE:{}", reply.exit_code));
            }
            for line in lines {
                state.pending.extend(line.as_bytes());
                state.pending.push_back(b'\n');
            }
        }

        state.sent.push(text);
        Ok(())
    }

    fn recv(&mut self, max_bytes: usize, _timeout: Duration) -> Result<Vec<u8>, ExecError> {
        let mut state = self.state.lock().unwrap();
        if state.pending.is_empty() && state.fail_when_drained {
            return Err(ExecError::Transport(
                "shell channel closed by peer".to_string(),
            ));
        }
        let take = max_bytes.min(state.pending.len());
        Ok(state.pending.drain(..take).collect())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().active = false;
    }

    fn is_active(&self) -> bool {
        self.state.lock().unwrap().active
    }
}
