//! Constants used throughout the proxy daemon
//!
//! This module centralizes protocol identifiers, defaults, and timeout
//! values to improve maintainability and reduce duplication.

use std::time::Duration;

/// Identity string sent in the command-listener greeting.
pub const IDENT: &str = "TOGGLEDBITS-SOCKPROXY";

/// Protocol version reported in the greeting and the notification User-Agent.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default values for configurable settings
pub mod defaults {
    /// Default command-listener port
    pub const LISTEN_PORT: u16 = 2504;

    /// Default bind address; `*` means all interfaces
    pub const BIND_ADDR: &str = "*";

    /// Default controller base URL for notifications
    pub const CONTROLLER_URL: &str = "http://127.0.0.1:3480";

    /// Maximum bytes per read on either leg of a session
    pub const BLOCK_SIZE: usize = 2048;
}

/// Timeout constants
pub mod timeout {
    use super::Duration;

    /// Client-leg idle timeout while a session is still in setup
    pub const SETUP: Duration = Duration::from_secs(30);

    /// Client-leg idle timeout granted to a STAT caller so a human can read
    /// the table; bounded so a stuck caller eventually yields resources
    pub const STAT_CALLER: Duration = Duration::from_secs(3600);

    /// Total budget for one notification HTTP request
    pub const NOTIFY: Duration = Duration::from_secs(5);

    /// Ceiling on a CONN dial to the remote endpoint
    pub const DIAL: Duration = Duration::from_secs(10);
}

/// Session id derivation constants
pub mod id {
    /// Offset subtracted from the unix clock before bucketing (2020-01-01T00:00:00Z)
    pub const EPOCH_OFFSET: u64 = 1_577_836_800;

    /// Seconds per id bucket
    pub const BUCKET_SECS: u64 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_identity() {
        assert_eq!(IDENT, "TOGGLEDBITS-SOCKPROXY");
        assert_eq!(PROTOCOL_VERSION, 1);
    }

    #[test]
    fn test_timeouts() {
        assert!(timeout::SETUP.as_secs() > 0);
        assert!(timeout::STAT_CALLER > timeout::SETUP);
        assert_eq!(timeout::NOTIFY.as_secs(), 5);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(defaults::LISTEN_PORT, 2504);
        assert!(defaults::BLOCK_SIZE > 0);
    }
}
