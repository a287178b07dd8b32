//! Command-line argument parsing
//!
//! Flags keep the daemon's historical single-letter interface. Every flag
//! is optional; values not given on the command line fall back to the INI
//! config file (when `-c` is present) and then to built-in defaults.

use std::path::PathBuf;

use clap::Parser;

/// Pass-through TCP proxy daemon for single-threaded automation controllers
#[derive(Parser, Debug, Clone)]
#[command(name = "sockproxyd", disable_version_flag = true)]
pub struct Args {
    /// Bind address; `*` means all interfaces
    #[arg(short = 'a', value_name = "ADDR")]
    pub bind_addr: Option<String>,

    /// Command-listener port
    #[arg(short = 'p', value_name = "PORT")]
    pub port: Option<u16>,

    /// Log file path; `-` or unset logs to stderr
    #[arg(short = 'L', value_name = "FILE")]
    pub log_file: Option<String>,

    /// Controller base URL for notifications
    #[arg(short = 'N', value_name = "URL")]
    pub controller_url: Option<String>,

    /// Controller base URL (historical alias for -N)
    #[arg(short = 'V', value_name = "URL", conflicts_with = "controller_url")]
    pub controller_url_alias: Option<String>,

    /// Enable debug logging
    #[arg(short = 'D')]
    pub debug: bool,

    /// INI configuration file
    #[arg(short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Controller URL from whichever of `-N`/`-V` was given.
    pub fn controller(&self) -> Option<&str> {
        self.controller_url
            .as_deref()
            .or(self.controller_url_alias.as_deref())
    }
}
