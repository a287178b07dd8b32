//! The daemon: listeners, session spawning, orderly shutdown
//!
//! [`Daemon::bind`] performs the pre-flight work (binding the command
//! listener and every configured direct listener, spawning the notifier);
//! [`Daemon::run`] accepts until the daemon-wide shutdown token is
//! cancelled, then tears everything down in order: listeners first, then
//! sessions, then a final notifier drain.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::id::IdGenerator;
use crate::notify::NotifyClient;
use crate::queue::{Notifier, QueueEntry};
use crate::registry::{SessionRegistry, SessionShared};
use crate::session::Session;

/// State shared by every session task and the accept loops.
pub struct DaemonState {
    pub settings: Settings,
    pub registry: SessionRegistry,
    pub notify_tx: mpsc::UnboundedSender<QueueEntry>,
    pub ids: Mutex<IdGenerator>,
    /// Daemon-wide keep-going flag; cancelled by STOP or a signal
    pub shutdown: CancellationToken,
}

/// A bound, ready-to-run daemon instance.
///
/// Tests construct their own with a port-zero [`Settings`]; `main`
/// constructs exactly one.
pub struct Daemon {
    state: Arc<DaemonState>,
    command_listener: TcpListener,
    direct_listeners: Vec<(TcpListener, String)>,
    notifier: JoinHandle<()>,
    notifier_cancel: CancellationToken,
    done_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
}

impl Daemon {
    /// Bind all listeners and spawn the notifier. Failures here are
    /// fatal startup errors.
    pub async fn bind(settings: Settings) -> Result<Self> {
        let ip = settings.bind_ip().to_string();

        let command_listener = TcpListener::bind((ip.as_str(), settings.port))
            .await
            .with_context(|| format!("failed to bind {}:{}", ip, settings.port))?;

        let mut direct_listeners = Vec::new();
        for direct in &settings.direct {
            let listener = TcpListener::bind((ip.as_str(), direct.port))
                .await
                .with_context(|| {
                    format!("failed to bind direct listener {}:{}", ip, direct.port)
                })?;
            direct_listeners.push((listener, direct.conn_line.clone()));
        }

        let registry = SessionRegistry::new();
        let notifier_cancel = CancellationToken::new();
        let client = NotifyClient::new()?;
        let (notify_tx, notifier) =
            Notifier::spawn(registry.clone(), client, notifier_cancel.clone());
        let (done_tx, done_rx) = mpsc::channel(1);

        let state = Arc::new(DaemonState {
            settings,
            registry,
            notify_tx,
            ids: Mutex::new(IdGenerator::new()),
            shutdown: CancellationToken::new(),
        });

        Ok(Self {
            state,
            command_listener,
            direct_listeners,
            notifier,
            notifier_cancel,
            done_tx,
            done_rx,
        })
    }

    /// Address the command listener actually bound (port 0 resolves here).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.command_listener.local_addr()?)
    }

    /// Addresses of the direct listeners, in configuration order.
    pub fn direct_local_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.direct_listeners
            .iter()
            .map(|(listener, _)| listener.local_addr().map_err(Into::into))
            .collect()
    }

    /// Accept and serve until STOP, then shut down in order.
    pub async fn run(self) -> Result<()> {
        let Daemon {
            state,
            command_listener,
            direct_listeners,
            notifier,
            notifier_cancel,
            done_tx,
            mut done_rx,
        } = self;

        if let Ok(addr) = command_listener.local_addr() {
            info!(%addr, "command listener ready");
        }

        for (listener, conn_line) in direct_listeners {
            if let Ok(addr) = listener.local_addr() {
                info!(%addr, conn = %conn_line, "direct listener ready");
            }
            tokio::spawn(run_direct_listener(
                state.clone(),
                listener,
                conn_line,
                done_tx.clone(),
            ));
        }

        let signal_state = state.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("termination signal received; shutting down");
            signal_state.shutdown.cancel();
        });

        let shutdown = state.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = command_listener.accept() => match result {
                    Ok((stream, peer)) => {
                        spawn_session(&state, stream, peer, done_tx.clone(), None)
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }

        info!("stopping: closing listeners and sessions");
        drop(command_listener);

        // Sessions observe the cancelled token and tear down; wait for the
        // last completion sender to drop.
        drop(done_tx);
        let drain = async {
            while done_rx.recv().await.is_some() {}
        };
        if tokio::time::timeout(Duration::from_secs(5), drain)
            .await
            .is_err()
        {
            warn!("timed out waiting for sessions to close");
        }

        // Final notifications are queued by now; let the notifier deliver
        // them once and exit.
        notifier_cancel.cancel();
        let _ = notifier.await;

        info!("shutdown complete");
        Ok(())
    }
}

/// Accept loop for one direct listener; every accepted connection gets the
/// listener's preconfigured CONN line applied implicitly.
async fn run_direct_listener(
    state: Arc<DaemonState>,
    listener: TcpListener,
    conn_line: String,
    done: mpsc::Sender<()>,
) {
    let shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, peer)) => spawn_session(
                    &state,
                    stream,
                    peer,
                    done.clone(),
                    Some(conn_line.clone()),
                ),
                Err(e) => warn!(error = %e, "direct accept failed"),
            },
        }
    }
}

/// Register and launch one session task. Direct sessions get an `L` id
/// prefix and skip the greeting.
fn spawn_session(
    state: &Arc<DaemonState>,
    stream: TcpStream,
    peer: SocketAddr,
    done: mpsc::Sender<()>,
    conn_line: Option<String>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set TCP_NODELAY on client");
    }

    let id = {
        let mut ids = state.ids.lock().unwrap_or_else(PoisonError::into_inner);
        let base = ids.next_id();
        if conn_line.is_some() {
            format!("L{}", base)
        } else {
            base
        }
    };

    let cancel = state.shutdown.child_token();
    let shared = SessionShared::new(id.clone(), peer.to_string(), cancel.clone());
    state.registry.insert(shared.clone());

    let session = Session::new(state.clone(), stream, peer, id, shared, cancel);
    tokio::spawn(async move {
        let _done = done;
        match conn_line {
            Some(line) => session.run_direct(&line).await,
            None => session.run().await,
        }
    });
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
