use clap::Parser;
use dymo_scale_listener::app::{self, Options, RunError};
use std::panic::{self, PanicHookInfo};
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Install the global `tracing` subscriber.
///
/// Logs go to stderr, stdout carries the data. `RUST_LOG` takes precedence;
/// otherwise only warnings are shown, plus debug output from this crate when
/// `verbose` is set.
fn initialize_logging(verbose: bool) {
    let default = if verbose {
        "warn,dymo_scale_listener=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "rusb")]
async fn run(options: Options) -> Result<(), RunError> {
    let transport = dymo_scale_listener::transport::libusb::RusbTransport::new()?;
    let mut out = std::io::stdout();
    let mut err = std::io::stderr();
    app::run_with_io(options, transport, &mut out, &mut err).await
}

#[cfg(not(feature = "rusb"))]
async fn run(_options: Options) -> Result<(), RunError> {
    Err(dymo_scale_listener::TransportError::BackendNotAvailable("rusb".to_string()).into())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, Telegraf execd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    initialize_logging(options.verbose);

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
