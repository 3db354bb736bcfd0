pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const TIMEOUT_CONNECT_MS: u64 = 30_000;
    pub const KEEPALIVE_INTERVAL_S: u32 = 30;
}

pub mod timeouts {
    pub const DEFAULT_COMMAND_MS: u64 = 300_000;
    /// Ceiling applied to any sudo-rewritten call; non-interactive sudo
    /// fails fast instead of hanging, so a long deadline buys nothing.
    pub const SUDO_CLAMP_MS: u64 = 30_000;
    pub const ALIVE_PROBE_MS: u64 = 5_000;
    pub const RECV_POLL_MS: u64 = 100;
    /// Settle time after opening the PTY before draining login banners.
    pub const BANNER_SETTLE_MS: u64 = 1_000;
}

pub mod buffers {
    pub const RECV_CHUNK_BYTES: usize = 4096;
    pub const PROBE_CHUNK_BYTES: usize = 1024;
}

pub mod recovery {
    /// Extra interrupt/drain/probe rounds after the first attempt fails.
    pub const EXTRA_ROUNDS: usize = 2;
    pub const INTERRUPT_PAUSE_MS: u64 = 300;
    pub const ROUND_PAUSE_MS: u64 = 1_000;
    pub const PROBE_WINDOW_MS: u64 = 3_000;
    pub const RECONNECT_DELAY_MS: u64 = 2_000;
}

pub mod heredoc {
    /// Terminator indentation beyond this is treated as complex and is
    /// never auto-stripped.
    pub const MAX_SIMPLE_INDENT: usize = 8;
}
