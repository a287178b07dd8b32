//! Proxy sessions
//!
//! A session is one accepted client connection. It starts in setup mode,
//! where a small line-oriented command protocol configures the session and
//! eventually dials the remote endpoint (`CONN`); from then on the session
//! is in echo mode and relays bytes verbatim in both directions until one
//! side closes, an idle window expires, or the daemon stops.
//!
//! Submodules:
//! - [`command`]: setup-mode command parsing and execution
//! - [`relay`]: echo-mode bidirectional relay

pub mod command;
pub mod relay;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::{defaults, timeout, IDENT, PROTOCOL_VERSION};
use crate::error::CloseReason;
use crate::notify::{self, NotifyBinding};
use crate::proxy::DaemonState;
use crate::queue::QueueEntry;
use crate::registry::SessionShared;
use crate::session::command::LineOutcome;

/// The two states of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting setup commands on the client leg
    Setup = 1,
    /// Transparent byte pipe between client and remote
    Echo = 2,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Echo => "ECHO",
        }
    }
}

/// How the setup phase ended
enum SetupEnd {
    /// CONN succeeded; the session enters echo mode with this remote leg
    Connected(TcpStream),
    /// The session is done without ever reaching echo mode
    Closed(CloseReason),
}

/// Flow control for draining buffered setup lines
enum SetupFlow {
    Continue,
    End(SetupEnd),
}

/// One client connection and everything it owns.
pub struct Session {
    pub(crate) id: String,
    pub(crate) client: TcpStream,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) state: SessionState,
    pub(crate) block_size: usize,
    /// Idle window on the client leg; zero disables
    pub(crate) peer_timeout: Duration,
    /// Idle window on the remote leg; zero disables
    pub(crate) remote_timeout: Duration,
    pub(crate) notify_pace: Duration,
    pub(crate) binding: Option<NotifyBinding>,
    pub(crate) setup_buffer: Vec<u8>,
    pub(crate) last_peer: Instant,
    pub(crate) last_remote: Instant,
    pub(crate) recv_from_remote: u64,
    pub(crate) sent_to_remote: u64,
    pub(crate) remote_addr: Option<String>,
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) daemon: Arc<DaemonState>,
    pub(crate) cancel: CancellationToken,
}

impl Session {
    pub fn new(
        daemon: Arc<DaemonState>,
        client: TcpStream,
        peer_addr: SocketAddr,
        id: String,
        shared: Arc<SessionShared>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            client,
            peer_addr,
            state: SessionState::Setup,
            block_size: defaults::BLOCK_SIZE,
            peer_timeout: timeout::SETUP,
            remote_timeout: Duration::ZERO,
            notify_pace: Duration::ZERO,
            binding: None,
            setup_buffer: Vec::new(),
            last_peer: Instant::now(),
            last_remote: Instant::now(),
            recv_from_remote: 0,
            sent_to_remote: 0,
            remote_addr: None,
            shared,
            daemon,
            cancel,
        }
    }

    /// Drive a command-listener session: greeting, setup, echo, teardown.
    pub async fn run(mut self) {
        let greeting = format!("OK {} {} {}\n", IDENT, PROTOCOL_VERSION, self.id);
        if let Err(e) = self.client.write_all(greeting.as_bytes()).await {
            self.finish(CloseReason::PeerIo(e), None).await;
            return;
        }
        debug!(id = %self.id, peer = %self.peer_addr, "session accepted");

        match self.run_setup().await {
            SetupEnd::Connected(mut remote) => {
                let reason = self.run_echo(&mut remote).await;
                self.finish(reason, Some(remote)).await;
            }
            SetupEnd::Closed(reason) => self.finish(reason, None).await,
        }
    }

    /// Drive a direct-listener session: no greeting, the listener's
    /// preconfigured CONN line is applied with replies suppressed.
    pub async fn run_direct(mut self, conn_line: &str) {
        debug!(id = %self.id, peer = %self.peer_addr, "direct session accepted");
        match self.establish_from_line(conn_line).await {
            Ok(mut remote) => {
                let reason = self.run_echo(&mut remote).await;
                self.finish(reason, Some(remote)).await;
            }
            Err(detail) => {
                error!(id = %self.id, line = conn_line, %detail, "direct listener CONN failed");
                self.finish(CloseReason::DialFailed(detail), None).await;
            }
        }
    }

    /// Read and execute setup commands until CONN, QUIT, or a close
    /// condition.
    async fn run_setup(&mut self) -> SetupEnd {
        let mut buf = vec![0u8; self.block_size];

        loop {
            if buf.len() != self.block_size {
                buf = vec![0u8; self.block_size];
            }
            let deadline = self.peer_deadline();

            tokio::select! {
                _ = self.cancel.cancelled() => return SetupEnd::Closed(CloseReason::Shutdown),
                result = self.client.read(&mut buf) => match result {
                    Ok(0) => return SetupEnd::Closed(CloseReason::ClientEof),
                    Ok(n) => {
                        self.last_peer = Instant::now();
                        self.setup_buffer.extend_from_slice(&buf[..n]);
                        match self.drain_setup_lines().await {
                            SetupFlow::Continue => {}
                            SetupFlow::End(end) => return end,
                        }
                    }
                    Err(e) => return SetupEnd::Closed(CloseReason::PeerIo(e)),
                },
                _ = sleep_until_opt(deadline) => {
                    return SetupEnd::Closed(CloseReason::PeerIdleTimeout);
                }
            }
        }
    }

    /// Execute every complete line buffered so far. Bytes after a
    /// successful CONN line are flushed verbatim to the remote: command
    /// parsing stops permanently at that point.
    async fn drain_setup_lines(&mut self) -> SetupFlow {
        while let Some(pos) = self.setup_buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.setup_buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..pos]).into_owned();

            match self.execute_line(&line).await {
                LineOutcome::Continue => {}
                LineOutcome::Quit => return SetupFlow::End(SetupEnd::Closed(CloseReason::Quit)),
                LineOutcome::Close(reason) => {
                    return SetupFlow::End(SetupEnd::Closed(reason))
                }
                LineOutcome::Connected(mut remote) => {
                    if !self.setup_buffer.is_empty() {
                        let pipelined = std::mem::take(&mut self.setup_buffer);
                        if let Err(e) = remote.write_all(&pipelined).await {
                            return SetupFlow::End(SetupEnd::Closed(CloseReason::RemoteIo(e)));
                        }
                        self.sent_to_remote += pipelined.len() as u64;
                        self.sync_counters();
                    }
                    return SetupFlow::End(SetupEnd::Connected(remote));
                }
            }
        }
        SetupFlow::Continue
    }

    /// Write one protocol reply to the client leg.
    pub(crate) async fn reply(&mut self, text: &str) -> Result<(), CloseReason> {
        self.client
            .write_all(text.as_bytes())
            .await
            .map_err(CloseReason::PeerIo)
    }

    /// Enqueue a notification for this session; no-op without an active
    /// binding. Called only after the triggering bytes reached the client.
    pub(crate) fn enqueue_notify(&self) {
        let Some(binding) = &self.binding else { return };
        if !binding.is_active() {
            return;
        }
        let pid = binding.pid.as_deref().unwrap_or(&self.id);
        let url = notify::request_url(&self.daemon.settings.controller_url, binding, pid);
        let _ = self.daemon.notify_tx.send(QueueEntry {
            session_id: self.id.clone(),
            url,
        });
    }

    /// Push counters and activity timestamps into the registry view.
    pub(crate) fn sync_counters(&self) {
        let recv = self.recv_from_remote;
        let sent = self.sent_to_remote;
        let last_remote = self.last_remote;
        self.shared.update(|view| {
            view.recv_from_remote = recv;
            view.sent_to_remote = sent;
            view.last_remote = last_remote;
        });
    }

    pub(crate) fn peer_deadline(&self) -> Option<Instant> {
        if self.peer_timeout.is_zero() {
            None
        } else {
            Some(self.last_peer + self.peer_timeout)
        }
    }

    /// Symmetric teardown: deregister, shut both legs down, then emit the
    /// final notification so the controller observes the close on its next
    /// read.
    async fn finish(mut self, reason: CloseReason, remote: Option<TcpStream>) {
        self.daemon.registry.remove(&self.id);

        let _ = self.client.shutdown().await;
        if let Some(mut remote) = remote {
            let _ = remote.shutdown().await;
        }

        self.enqueue_notify();

        let remote_addr = self.remote_addr.as_deref().unwrap_or("-");
        if reason.is_error() {
            warn!(
                id = %self.id,
                state = self.state.as_str(),
                peer = %self.peer_addr,
                remote = remote_addr,
                recv = self.recv_from_remote,
                sent = self.sent_to_remote,
                "session closed: {}", reason
            );
        } else {
            info!(
                id = %self.id,
                state = self.state.as_str(),
                peer = %self.peer_addr,
                remote = remote_addr,
                recv = self.recv_from_remote,
                sent = self.sent_to_remote,
                "session closed: {}", reason
            );
        }
    }
}

pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
