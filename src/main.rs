use clap::Parser;
use tracing::error;

use sockproxyd::{logging, Args, Daemon, Settings};

fn main() {
    let args = Args::parse();

    // Pre-flight: a bad -c file exits non-zero before anything binds
    let settings = match Settings::load(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("sockproxyd: {:#}", e);
            std::process::exit(1);
        }
    };

    logging::init(settings.log_file.as_deref(), settings.debug);

    // Sessions are cooperative tasks; a single-threaded runtime matches
    // the daemon's scheduling model
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("sockproxyd: failed to build runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(async {
        let daemon = match Daemon::bind(settings).await {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("startup failed: {:#}", e);
                return 1;
            }
        };
        match daemon.run().await {
            Ok(()) => 0,
            Err(e) => {
                error!("fatal error in main loop: {:#}", e);
                127
            }
        }
    });
    std::process::exit(code);
}
