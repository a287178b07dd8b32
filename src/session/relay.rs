//! Echo-mode relay
//!
//! Moves bytes verbatim between the client and remote legs, one in-flight
//! read per leg of at most `block_size` bytes. Remote arrivals are written
//! to the client before the notification is enqueued, so the controller's
//! read always finds the data that triggered it. Idle windows are enforced
//! per leg; whichever expires first ends the session.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::error::CloseReason;
use crate::session::{sleep_until_opt, Session};

/// Which leg's idle window expired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleLeg {
    Peer,
    Remote,
}

impl Session {
    /// Relay until either side closes, errors, or idles out. The remote
    /// leg is borrowed so teardown can still shut it down afterwards.
    pub(crate) async fn run_echo(&mut self, remote: &mut TcpStream) -> CloseReason {
        let mut client_buf = vec![0u8; self.block_size];
        let mut remote_buf = vec![0u8; self.block_size];

        loop {
            let deadline = self.next_idle_deadline();

            tokio::select! {
                _ = self.cancel.cancelled() => return CloseReason::Shutdown,

                result = self.client.read(&mut client_buf) => match result {
                    Ok(0) => return CloseReason::ClientEof,
                    Ok(n) => {
                        self.last_peer = Instant::now();
                        if let Err(e) = remote.write_all(&client_buf[..n]).await {
                            return CloseReason::RemoteIo(e);
                        }
                        self.sent_to_remote += n as u64;
                        self.sync_counters();
                    }
                    Err(e) => return CloseReason::PeerIo(e),
                },

                result = remote.read(&mut remote_buf) => match result {
                    Ok(0) => return CloseReason::RemoteEof,
                    Ok(n) => {
                        self.last_remote = Instant::now();
                        if let Err(e) = self.client.write_all(&remote_buf[..n]).await {
                            return CloseReason::PeerIo(e);
                        }
                        self.recv_from_remote += n as u64;
                        self.sync_counters();
                        self.enqueue_notify();
                    }
                    Err(e) => return CloseReason::RemoteIo(e),
                },

                leg = wait_idle(deadline) => return match leg {
                    IdleLeg::Peer => CloseReason::PeerIdleTimeout,
                    IdleLeg::Remote => CloseReason::RemoteIdleTimeout,
                },
            }
        }
    }

    /// Earliest enabled idle deadline across both legs.
    fn next_idle_deadline(&self) -> Option<(Instant, IdleLeg)> {
        let peer = self
            .peer_deadline()
            .map(|at| (at, IdleLeg::Peer));
        let remote = if self.remote_timeout.is_zero() {
            None
        } else {
            Some((self.last_remote + self.remote_timeout, IdleLeg::Remote))
        };

        match (peer, remote) {
            (Some(p), Some(r)) => Some(if r.0 <= p.0 { r } else { p }),
            (peer, remote) => peer.or(remote),
        }
    }
}

async fn wait_idle(deadline: Option<(Instant, IdleLeg)>) -> IdleLeg {
    match deadline {
        Some((at, leg)) => {
            sleep_until_opt(Some(at)).await;
            leg
        }
        None => std::future::pending().await,
    }
}
