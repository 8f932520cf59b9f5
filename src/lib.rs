//! `dymo-scale-listener` library.
//!
//! Reads weight reports from Dymo USB postal scales and publishes them as
//! events. The binary (`src/main.rs`) is responsible for logging setup and
//! process exit codes; the CLI pipeline lives in [`crate::app`] where it can
//! be tested deterministically with an injected transport and output streams.

pub mod app;
pub mod bus;
pub mod decoder;
pub mod filter;
pub mod output;
pub mod reading;
pub mod scale;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use bus::{Event, EventKind, NotificationBus};
pub use decoder::{Calibration, REPORT_SIZE, Report, ScaleStatus, decode};
pub use filter::ChangeFilter;
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use output::text::TextFormatter;
pub use reading::{WeightReading, WeightUnit};
pub use scale::{Scale, ScaleConfig, ScaleError, Snapshot};
pub use session::{Session, SessionError, SessionState};
pub use transport::{DeviceDescriptor, HotplugEvent, Transport, TransportError};
