//! Session close reasons
//!
//! Every session teardown carries a [`CloseReason`] so the logging site can
//! distinguish normal disconnects from failures and pick the right level.

use std::fmt;

/// Why a session ended
#[derive(Debug)]
pub enum CloseReason {
    /// Client leg reached EOF
    ClientEof,

    /// Remote leg reached EOF
    RemoteEof,

    /// Non-timeout I/O error on the client leg
    PeerIo(std::io::Error),

    /// Non-timeout I/O error on the remote leg
    RemoteIo(std::io::Error),

    /// Client leg exceeded its idle window
    PeerIdleTimeout,

    /// Remote leg exceeded its idle window
    RemoteIdleTimeout,

    /// Malformed command or argument during setup
    Protocol(String),

    /// A direct listener's implicit CONN could not be applied
    DialFailed(String),

    /// Client issued QUIT
    Quit,

    /// Daemon-wide STOP
    Shutdown,
}

impl CloseReason {
    /// True for reasons that warrant a warn-level log line
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::PeerIo(_) | Self::RemoteIo(_) | Self::Protocol(_) | Self::DialFailed(_)
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientEof => write!(f, "client closed connection"),
            Self::RemoteEof => write!(f, "remote closed connection"),
            Self::PeerIo(e) => write!(f, "client I/O error: {}", e),
            Self::RemoteIo(e) => write!(f, "remote I/O error: {}", e),
            Self::PeerIdleTimeout => write!(f, "client idle timeout"),
            Self::RemoteIdleTimeout => write!(f, "remote idle timeout"),
            Self::Protocol(detail) => write!(f, "protocol error: {}", detail),
            Self::DialFailed(detail) => write!(f, "implicit CONN failed: {}", detail),
            Self::Quit => write!(f, "client quit"),
            Self::Shutdown => write!(f, "daemon shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(CloseReason::PeerIo(std::io::Error::other("x")).is_error());
        assert!(CloseReason::Protocol("bad".into()).is_error());
        assert!(!CloseReason::ClientEof.is_error());
        assert!(!CloseReason::Quit.is_error());
        assert!(!CloseReason::PeerIdleTimeout.is_error());
    }

    #[test]
    fn test_display_includes_detail() {
        let reason = CloseReason::Protocol("INVALID COMMAND".into());
        assert!(reason.to_string().contains("INVALID COMMAND"));

        let reason = CloseReason::RemoteIo(std::io::Error::other("reset"));
        assert!(reason.to_string().contains("reset"));
    }
}
