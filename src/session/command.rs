//! Setup-mode command interpreter
//!
//! Commands are line-oriented, case-sensitive, and `\n`-terminated; tokens
//! are whitespace-separated. Replies are `OK <CMD>[ <extra>]` or
//! `ERR <CMD> <message>`, one line each. Parsing is split from execution
//! so the grammar can be tested without sockets.
//!
//! A malformed argument or unknown command closes the session after the
//! `ERR` reply. CONN failures are the exception: the reply is sent and the
//! session stays in setup so the client may retry or quit.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::constants::timeout;
use crate::error::CloseReason;
use crate::formatting::format_interval;
use crate::notify::NotifyBinding;
use crate::session::{Session, SessionState};

/// A parsed setup command
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Conn(ConnRequest),
    Ntfy(NotifyBinding),
    Rtim(u64),
    Pace(f64),
    Blks(usize),
    Stat,
    Capa,
    Help,
    Quit,
    Stop,
}

/// CONN target plus its inline options
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ConnRequest {
    pub host: String,
    pub port: u16,
    pub rtim: Option<u64>,
    pub blks: Option<usize>,
    pub pace: Option<f64>,
    pub ntfy: Option<NotifyBinding>,
}

/// Why a line failed to parse
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParseError {
    /// Recognized command with a bad argument
    Invalid { cmd: &'static str, message: String },
    /// Unrecognized command word
    Unknown,
}

fn invalid(cmd: &'static str, message: impl Into<String>) -> ParseError {
    ParseError::Invalid {
        cmd,
        message: message.into(),
    }
}

/// Parse one setup line. `Ok(None)` is a blank line.
pub(crate) fn parse_command(line: &str) -> Result<Option<Command>, ParseError> {
    let mut tokens = line.split_whitespace();
    let Some(word) = tokens.next() else {
        return Ok(None);
    };

    let command = match word {
        "CONN" => Command::Conn(parse_conn(&mut tokens)?),
        "NTFY" => {
            let device = tokens
                .next()
                .ok_or_else(|| invalid("NTFY", "Invalid arguments"))?;
            let service = tokens
                .next()
                .ok_or_else(|| invalid("NTFY", "Invalid arguments"))?;
            let action = tokens
                .next()
                .ok_or_else(|| invalid("NTFY", "Invalid arguments"))?;
            Command::Ntfy(NotifyBinding {
                // Non-integer device disables notifications rather than erroring
                device: device.parse().unwrap_or(-1),
                service: service.to_string(),
                action: action.to_string(),
                pid: tokens.next().map(str::to_string),
            })
        }
        "RTIM" => Command::Rtim(
            tokens
                .next()
                .and_then(|t| t.parse::<u64>().ok())
                .ok_or_else(|| invalid("RTIM", "Invalid timeout"))?,
        ),
        "PACE" => Command::Pace(
            tokens
                .next()
                .and_then(|t| t.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(|| invalid("PACE", "Invalid pace"))?,
        ),
        "BLKS" => Command::Blks(
            tokens
                .next()
                .and_then(|t| t.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .ok_or_else(|| invalid("BLKS", "Invalid block size"))?,
        ),
        "STAT" => Command::Stat,
        "CAPA" => Command::Capa,
        "HELP" => Command::Help,
        "QUIT" => Command::Quit,
        "STOP" => Command::Stop,
        _ => return Err(ParseError::Unknown),
    };
    Ok(Some(command))
}

fn parse_conn<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<ConnRequest, ParseError> {
    let addr = tokens
        .next()
        .ok_or_else(|| invalid("CONN", "Invalid address"))?;
    let Some((host, port_str)) = addr.split_once(':') else {
        return Err(invalid("CONN", format!("Invalid address {}", addr)));
    };
    if host.is_empty() || port_str.is_empty() || !port_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("CONN", format!("Invalid address {}", addr)));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| invalid("CONN", format!("Invalid address {}", addr)))?;

    let mut request = ConnRequest {
        host: host.to_string(),
        port,
        rtim: None,
        blks: None,
        pace: None,
        ntfy: None,
    };

    for token in tokens {
        let bad_option = || invalid("CONN", format!("Invalid option {}", token));
        let Some((key, value)) = token.split_once('=') else {
            return Err(bad_option());
        };
        match key {
            "RTIM" => request.rtim = Some(value.parse().map_err(|_| bad_option())?),
            "BLKS" => {
                request.blks = Some(
                    value
                        .parse::<usize>()
                        .ok()
                        .filter(|v| *v > 0)
                        .ok_or_else(bad_option)?,
                )
            }
            "PACE" => {
                request.pace = Some(
                    value
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite() && *v >= 0.0)
                        .ok_or_else(bad_option)?,
                )
            }
            "NTFY" => request.ntfy = Some(parse_ntfy_value(value).ok_or_else(bad_option)?),
            _ => return Err(bad_option()),
        }
    }

    Ok(request)
}

/// `dev/sid/act[/pid]` value of the NTFY CONN option.
fn parse_ntfy_value(value: &str) -> Option<NotifyBinding> {
    let parts: Vec<&str> = value.split('/').collect();
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }
    Some(NotifyBinding {
        device: parts[0].parse().unwrap_or(-1),
        service: parts[1].to_string(),
        action: parts[2].to_string(),
        pid: parts.get(3).map(|p| p.to_string()),
    })
}

/// What a processed line means for the setup loop
pub(crate) enum LineOutcome {
    Continue,
    Connected(TcpStream),
    Quit,
    Close(CloseReason),
}

impl Session {
    /// Parse and execute one setup line, writing any reply.
    pub(crate) async fn execute_line(&mut self, line: &str) -> LineOutcome {
        match parse_command(line) {
            Ok(None) => LineOutcome::Continue,
            Ok(Some(command)) => self.apply(command).await,
            Err(ParseError::Invalid { cmd: "CONN", message }) => {
                // Dial-family failure: the session stays in setup
                self.reply_flow(&format!("ERR CONN {}\n", message)).await
            }
            Err(ParseError::Invalid { cmd, message }) => {
                let _ = self.reply(&format!("ERR {} {}\n", cmd, message)).await;
                LineOutcome::Close(CloseReason::Protocol(format!("{} {}", cmd, message)))
            }
            Err(ParseError::Unknown) => {
                let _ = self.reply("ERR INVALID COMMAND\n").await;
                LineOutcome::Close(CloseReason::Protocol(format!("invalid command '{}'", line)))
            }
        }
    }

    async fn apply(&mut self, command: Command) -> LineOutcome {
        match command {
            Command::Conn(request) => self.cmd_conn(request).await,
            Command::Ntfy(binding) => {
                // pid defaults unchanged: keep a previously-set override
                let pid = binding
                    .pid
                    .or_else(|| self.binding.as_ref().and_then(|b| b.pid.clone()));
                let binding = NotifyBinding { pid, ..binding };
                self.binding = Some(binding.clone());
                self.shared.update(|view| view.binding = Some(binding));
                self.ok("NTFY").await
            }
            Command::Rtim(ms) => {
                self.remote_timeout = Duration::from_millis(ms);
                self.ok("RTIM").await
            }
            Command::Pace(seconds) => {
                self.notify_pace = Duration::from_secs_f64(seconds);
                let pace = self.notify_pace;
                self.shared.update(|view| view.notify_pace = pace);
                self.ok("PACE").await
            }
            Command::Blks(bytes) => {
                self.block_size = bytes;
                self.ok("BLKS").await
            }
            Command::Stat => self.cmd_stat().await,
            Command::Capa => self.reply_flow("OK CAPA BLKS RTIM NTFY CONN\n").await,
            Command::Help => self.cmd_help().await,
            Command::Quit => {
                let _ = self.reply("OK QUIT\n").await;
                LineOutcome::Quit
            }
            Command::Stop => {
                let _ = self.reply("OK STOP\n").await;
                info!(id = %self.id, "STOP received; shutting down");
                self.daemon.shutdown.cancel();
                LineOutcome::Close(CloseReason::Shutdown)
            }
        }
    }

    async fn cmd_conn(&mut self, request: ConnRequest) -> LineOutcome {
        match self.establish(request).await {
            Ok(remote) => {
                let pid = self
                    .binding
                    .as_ref()
                    .and_then(|b| b.pid.clone())
                    .unwrap_or_else(|| self.id.clone());
                match self.reply(&format!("OK CONN {}\n", pid)).await {
                    Ok(()) => LineOutcome::Connected(remote),
                    Err(reason) => LineOutcome::Close(reason),
                }
            }
            Err(detail) => self.reply_flow(&format!("ERR CONN {}\n", detail)).await,
        }
    }

    /// Dial the remote and flip the session into echo mode. Options are
    /// applied only once the dial has succeeded, so a refused CONN leaves
    /// the session exactly as it was.
    pub(crate) async fn establish(&mut self, request: ConnRequest) -> Result<TcpStream, String> {
        let target = format!("{}:{}", request.host, request.port);

        let remote = match tokio::time::timeout(timeout::DIAL, TcpStream::connect(&target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(format!("Can't connect: {}", e)),
            Err(_) => return Err("dial timed out".to_string()),
        };
        if let Err(e) = remote.set_nodelay(true) {
            debug!(id = %self.id, error = %e, "failed to set TCP_NODELAY on remote");
        }

        if let Some(ms) = request.rtim {
            self.remote_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = request.blks {
            self.block_size = bytes;
        }
        if let Some(seconds) = request.pace {
            self.notify_pace = Duration::from_secs_f64(seconds);
        }
        if let Some(binding) = request.ntfy {
            self.binding = Some(binding);
        }

        self.state = SessionState::Echo;
        // Echo mode: the client leg inherits the remote idle window
        self.peer_timeout = self.remote_timeout;
        self.last_peer = Instant::now();
        self.last_remote = Instant::now();
        self.remote_addr = Some(target.clone());

        info!(id = %self.id, remote = %target, "connected to remote");

        let pace = self.notify_pace;
        let binding = self.binding.clone();
        let last_remote = self.last_remote;
        self.shared.update(|view| {
            view.state = SessionState::Echo;
            view.remote_addr = Some(target);
            view.notify_pace = pace;
            view.binding = binding;
            view.last_remote = last_remote;
        });

        Ok(remote)
    }

    /// Apply a direct listener's preconfigured CONN line, no replies.
    pub(crate) async fn establish_from_line(&mut self, line: &str) -> Result<TcpStream, String> {
        match parse_command(line) {
            Ok(Some(Command::Conn(request))) => self.establish(request).await,
            Ok(_) => Err("not a CONN line".to_string()),
            Err(ParseError::Invalid { message, .. }) => Err(message),
            Err(ParseError::Unknown) => Err("not a CONN line".to_string()),
        }
    }

    async fn cmd_stat(&mut self) -> LineOutcome {
        // A human may be reading; give the caller a long leash
        self.peer_timeout = timeout::STAT_CALLER;
        self.sync_counters();
        let table = self.render_stat();
        self.reply_flow(&table).await
    }

    fn render_stat(&self) -> String {
        let now = Instant::now();
        let mut out = format!(
            " {:<10} {:<5} {:>6} {:>6} {:<21} {:<21} {:>10} {:>10} {}\n",
            "ID", "STATE", "RTIME", "UPTIME", "PEER", "REMOTE", "RCVD", "SENT", "NTFY"
        );
        for shared in self.daemon.registry.snapshot() {
            let view = shared.view();
            let selector = if shared.id == self.id { '*' } else { ' ' };
            let ntfy = view
                .binding
                .as_ref()
                .map(|b| b.display_with(&shared.id))
                .unwrap_or_default();
            out.push_str(&format!(
                "{}{:<10} {:<5} {:>6} {:>6} {:<21} {:<21} {:>10} {:>10} {}\n",
                selector,
                shared.id,
                view.state.as_str(),
                format_interval(now.duration_since(view.last_remote)),
                format_interval(now.duration_since(shared.created)),
                view.peer_addr,
                view.remote_addr.as_deref().unwrap_or("-"),
                view.recv_from_remote,
                view.sent_to_remote,
                ntfy
            ));
        }
        out
    }

    async fn cmd_help(&mut self) -> LineOutcome {
        let text = "\
CONN host:port [RTIM=ms] [BLKS=n] [PACE=s] [NTFY=dev/sid/act[/pid]]  dial remote, enter echo mode\n\
NTFY dev sid act [pid]  set notification binding\n\
RTIM ms                 remote idle timeout, 0 disables\n\
PACE seconds            minimum interval between notifications, 0 disables\n\
BLKS nbytes             maximum bytes per read\n\
STAT                    list live sessions\n\
CAPA                    list CONN capabilities\n\
QUIT                    close this session\n\
STOP                    shut the daemon down\n\
OK HELP\n";
        self.reply_flow(text).await
    }

    async fn ok(&mut self, cmd: &str) -> LineOutcome {
        self.reply_flow(&format!("OK {}\n", cmd)).await
    }

    async fn reply_flow(&mut self, text: &str) -> LineOutcome {
        match self.reply(text).await {
            Ok(()) => LineOutcome::Continue,
            Err(reason) => LineOutcome::Close(reason),
        }
    }
}
