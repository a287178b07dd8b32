//! # sockproxyd
//!
//! A long-running pass-through TCP proxy daemon that decouples a
//! single-threaded automation controller from blocking socket I/O.
//!
//! A plugin running inside the controller opens a TCP session to this
//! daemon, configures it with a small line-oriented command protocol, and
//! asks it to dial a remote endpoint (`CONN`). From then on the session is
//! a transparent byte pipe. Whenever bytes arrive from the remote, the
//! daemon fires an out-of-band HTTP GET at the controller naming the
//! session, so the plugin can do an ordinary non-blocking read instead of
//! polling.
//!
//! ## Architecture
//!
//! - **args / config**: CLI flags and the INI config file, merged into
//!   [`Settings`]
//! - **proxy**: the [`Daemon`]: listeners, session spawning, shutdown
//! - **session**: per-connection state machine (setup commands, echo relay)
//! - **queue / notify**: coalesced, paced notification delivery to the
//!   controller
//! - **registry**: the live-session map backing STAT and pacing lookups
//! - **id / formatting / constants / error / logging**: supporting leaves
//!
//! Each session is one tokio task; the registry and the send queue are the
//! only shared structures. Sessions never wait on notification delivery:
//! the relay enqueues onto an unbounded channel drained by the notifier
//! task.

pub mod args;
pub mod config;
pub mod constants;
pub mod error;
pub mod formatting;
pub mod id;
pub mod logging;
pub mod notify;
pub mod proxy;
pub mod queue;
pub mod registry;
pub mod session;

pub use args::Args;
pub use config::{DirectListener, Settings};
pub use error::CloseReason;
pub use notify::NotifyBinding;
pub use proxy::Daemon;
