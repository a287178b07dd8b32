//! Logging setup
//!
//! Logs go to stderr by default, or to the file named by `-L`. The filter
//! honors `RUST_LOG` when set; otherwise `-D` selects debug over info.
//!
//! The file appender's guard is forgotten to keep it alive for the program
//! lifetime.

use std::path::Path;

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. Call once, before any log output.
pub fn init(log_file: Option<&Path>, debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let name = path.file_name().unwrap_or_else(|| "sockproxyd.log".as_ref());
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();

            // Keep the appender alive for the program lifetime
            std::mem::forget(guard);
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}
