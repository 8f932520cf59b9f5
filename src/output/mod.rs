//! Output formatters for scale events.
//!
//! A formatter turns one [`Event`] into at most one output line. Formats that
//! only care about some events (InfluxDB only records weights) return `None`
//! for the rest.

pub mod influxdb;
pub mod text;

use crate::bus::Event;
use std::fmt;
use std::time::SystemTime;

/// Output format selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    /// Human readable, one event per line
    #[default]
    Text,
    /// InfluxDB line protocol, weight readings only
    Influxdb,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Text => write!(f, "text"),
            Format::Influxdb => write!(f, "influxdb"),
        }
    }
}

/// Trait for formatting events into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format an event observed at `timestamp`.
    ///
    /// # Returns
    /// The line to print (without trailing newline), or `None` when the
    /// format has no representation for this event.
    fn format(&self, event: &Event, timestamp: SystemTime) -> Option<String>;
}
