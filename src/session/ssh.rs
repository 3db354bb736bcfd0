//! ssh2-backed interactive shell transport.
//!
//! One PTY-backed shell channel per session. The channel is switched to
//! non-blocking mode after setup so `recv` can poll with a deadline instead
//! of parking on a read.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use ssh2::{Channel, Session};

use crate::constants::network;
use crate::errors::ExecError;
use crate::session::result::SessionConfig;
use crate::session::transport::Transport;

const BLOCK_RETRY: Duration = Duration::from_millis(10);

pub struct Ssh2Transport {
    host: String,
    port: u16,
    username: String,
    password: Option<String>,
    private_key: Option<String>,
    passphrase: Option<String>,
    connect_timeout: Duration,
    session: Option<Session>,
    channel: Option<Channel>,
}

impl Ssh2Transport {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            private_key: config.private_key.clone(),
            passphrase: config.passphrase.clone(),
            connect_timeout: config.connect_timeout,
            session: None,
            channel: None,
        }
    }

    fn authenticate(&self, session: &Session) -> Result<(), ExecError> {
        if let Some(key) = self.private_key.as_deref() {
            session.userauth_pubkey_memory(
                &self.username,
                None,
                key,
                self.passphrase.as_deref(),
            )?;
        } else if let Some(password) = self.password.as_deref() {
            session.userauth_password(&self.username, password)?;
        } else {
            return Err(ExecError::Configuration(
                "either password or private_key is required".to_string(),
            ));
        }
        if !session.authenticated() {
            return Err(ExecError::Transport("authentication failed".to_string()));
        }
        Ok(())
    }
}

impl Transport for Ssh2Transport {
    fn connect(&mut self) -> Result<(), ExecError> {
        self.close();

        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                ExecError::Transport(format!("could not resolve {}:{}", self.host, self.port))
            })?;
        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        self.authenticate(&session)?;
        session.set_keepalive(true, network::KEEPALIVE_INTERVAL_S);

        let mut channel = session.channel_session()?;
        channel.request_pty("xterm", None, None)?;
        channel.shell()?;
        session.set_blocking(false);

        self.session = Some(session);
        self.channel = Some(channel);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), ExecError> {
        let channel = self.channel.as_mut().ok_or(ExecError::NotConnected)?;
        let mut offset = 0;
        while offset < data.len() {
            match channel.write(&data[offset..]) {
                Ok(written) => offset += written,
                Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(BLOCK_RETRY),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn recv(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, ExecError> {
        let channel = self.channel.as_mut().ok_or(ExecError::NotConnected)?;
        let mut buf = vec![0u8; max_bytes];
        let deadline = Instant::now() + timeout;
        loop {
            match channel.read(&mut buf) {
                // A zero-length read on the channel is EOF, not "no data
                // yet"; surfacing it here beats waiting out a full command
                // deadline on a dead peer.
                Ok(0) => {
                    return Err(ExecError::Transport(
                        "shell channel closed by peer".to_string(),
                    ))
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Ok(Vec::new());
                    }
                    thread::sleep(BLOCK_RETRY);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            // Best effort teardown; the peer may already be gone.
            let _ = channel.close();
        }
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "bye", None);
        }
    }

    fn is_active(&self) -> bool {
        match &self.channel {
            Some(channel) => !channel.eof(),
            None => false,
        }
    }
}
