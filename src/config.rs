//! Configuration loading
//!
//! Runtime settings come from three layers: built-in defaults, the INI
//! config file named by `-c`, and explicit command-line flags (which win).
//!
//! The INI format has two sections. `[host]` carries the daemon's own
//! settings (`ip`, `port`, `vera`, `log`, `debug`); `[direct]` maps decimal
//! listener ports to whole `CONN` command lines, one extra listener per
//! key. Lines starting with `;` are comments, blank lines are ignored, and
//! section names and keys are folded to lower case.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::args::Args;
use crate::constants::defaults;

/// Fully-resolved daemon settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Bind address; `*` means all interfaces
    pub bind_addr: String,
    /// Command-listener port
    pub port: u16,
    /// Log destination; `None` is stderr
    pub log_file: Option<PathBuf>,
    /// Controller base URL for notifications
    pub controller_url: String,
    /// Debug logging enabled
    pub debug: bool,
    /// Extra listeners whose accepted connections get an implicit CONN
    pub direct: Vec<DirectListener>,
}

/// One preconfigured direct listener
#[derive(Debug, Clone, PartialEq)]
pub struct DirectListener {
    pub port: u16,
    pub conn_line: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: defaults::BIND_ADDR.to_string(),
            port: defaults::LISTEN_PORT,
            log_file: None,
            controller_url: defaults::CONTROLLER_URL.to_string(),
            debug: false,
            direct: Vec::new(),
        }
    }
}

impl Settings {
    /// Resolve settings from defaults, the `-c` file, and argv flags.
    pub fn load(args: &Args) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(path) = &args.config {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?;
            settings
                .apply_ini(&text)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        }

        if let Some(addr) = &args.bind_addr {
            settings.bind_addr = addr.clone();
        }
        if let Some(port) = args.port {
            settings.port = port;
        }
        if let Some(log) = &args.log_file {
            settings.log_file = log_destination(log);
        }
        if let Some(url) = args.controller() {
            settings.controller_url = url.trim_end_matches('/').to_string();
        }
        if args.debug {
            settings.debug = true;
        }

        Ok(settings)
    }

    /// Merge an INI document into these settings.
    pub fn apply_ini(&mut self, text: &str) -> Result<()> {
        let mut section = String::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = name.trim().to_lowercase();
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                bail!("line {}: expected key=value, got '{}'", index + 1, line);
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match section.as_str() {
                "host" => self.apply_host_key(&key, value, index + 1)?,
                "direct" => {
                    let port: u16 = key
                        .parse()
                        .with_context(|| format!("line {}: invalid direct port '{}'", index + 1, key))?;
                    self.direct.push(DirectListener {
                        port,
                        conn_line: value.to_string(),
                    });
                }
                "" => bail!("line {}: key before any section", index + 1),
                // Unknown sections are tolerated so configs can be shared
                // across daemon versions.
                _ => {}
            }
        }

        Ok(())
    }

    fn apply_host_key(&mut self, key: &str, value: &str, line: usize) -> Result<()> {
        match key {
            "ip" => self.bind_addr = value.to_string(),
            "port" => {
                self.port = value
                    .parse()
                    .with_context(|| format!("line {}: invalid port '{}'", line, value))?;
            }
            "vera" => self.controller_url = value.trim_end_matches('/').to_string(),
            "log" => self.log_file = log_destination(value),
            "debug" => self.debug = parse_bool(value),
            _ => {}
        }
        Ok(())
    }

    /// Concrete IP to bind, resolving the `*` wildcard.
    pub fn bind_ip(&self) -> &str {
        if self.bind_addr == "*" {
            "0.0.0.0"
        } else {
            &self.bind_addr
        }
    }
}

fn log_destination(value: &str) -> Option<PathBuf> {
    if value == "-" || value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
