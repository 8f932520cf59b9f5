//! Core application runner for `dymo-scale-listener`.
//!
//! Kept apart from process setup (logging, exit codes) so the whole CLI
//! pipeline can be driven with a fake transport and in-memory output streams.

use crate::bus::{Event, EventKind};
use crate::decoder::Calibration;
use crate::output::influxdb::InfluxDbFormatter;
use crate::output::text::TextFormatter;
use crate::output::{Format, OutputFormatter};
use crate::scale::{Scale, ScaleConfig, ScaleError};
use crate::transport::{Transport, TransportError};
use clap::Parser;
use std::io;
use std::io::Write;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Product id of the scale to use when several are attached.
    /// Decimal (32777) or hex with 0x prefix (0x8009).
    #[arg(long, value_parser = parse_product_id)]
    pub product_id: Option<u16>,

    /// Magnitude correction for scales reporting in finer steps
    #[arg(long, default_value_t, value_enum)]
    pub calibration: Calibration,

    /// Output format
    #[arg(long, default_value_t, value_enum)]
    pub format: Format,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "scale_weight")]
    pub influxdb_measurement: String,

    /// Only print these events. May be repeated; all events by default.
    #[arg(long = "event", value_enum, value_name = "EVENT")]
    pub events: Vec<EventKind>,

    /// Keep running after the session ends and wait for a scale to be plugged in
    #[arg(long)]
    pub follow: bool,

    /// Verbose output, print session end reasons and debug logs to stderr
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    fn prints(&self, kind: EventKind) -> bool {
        self.events.is_empty() || self.events.contains(&kind)
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scale(#[from] ScaleError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The session ended and `--follow` was not given
    #[error("{0}")]
    Session(String),
}

/// Parse a USB product id, either decimal or `0x`-prefixed hex.
pub fn parse_product_id(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid product id '{s}': {e}"))
}

fn formatter(options: &Options) -> Box<dyn OutputFormatter> {
    match options.format {
        Format::Text => Box::new(TextFormatter::new()),
        Format::Influxdb => Box::new(InfluxDbFormatter::new(
            options.influxdb_measurement.clone(),
        )),
    }
}

fn write_event(
    formatter: &dyn OutputFormatter,
    event: &Event,
    out: &mut dyn Write,
) -> io::Result<()> {
    match formatter.format(event, SystemTime::now()) {
        Some(line) => writeln!(out, "{line}"),
        None => Ok(()),
    }
}

/// Run the core processing loop, writing formatted events to `out` and
/// verbose diagnostics to `err`.
///
/// - Starts a session on `transport` and prints every selected event.
/// - When the session ends, returns [`RunError::Session`] with the reason,
///   unless `options.follow` is set, in which case it keeps waiting for the
///   next hotplug attach.
pub async fn run_with_io<T: Transport + 'static>(
    options: Options,
    transport: T,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let formatter = formatter(&options);
    let scale = Scale::spawn(
        transport,
        ScaleConfig {
            calibration: options.calibration,
        },
    );

    let mut events = scale.events(&EventKind::ALL)?;
    scale.start(options.product_id)?;

    let result = process_events(&options, formatter.as_ref(), &mut events, out, err).await;
    scale.shutdown().await?;
    result
}

async fn process_events(
    options: &Options,
    formatter: &dyn OutputFormatter,
    events: &mut mpsc::UnboundedReceiver<Event>,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    while let Some(event) = events.recv().await {
        if options.prints(event.kind()) {
            write_event(formatter, &event, out)?;
        }

        if let Event::End(reason) = event {
            if !options.follow {
                return Err(RunError::Session(reason));
            }
            if options.verbose {
                writeln!(err, "{reason}")?;
            }
            debug!("session ended, waiting for a scale to be attached");
        }
    }

    Ok(())
}
