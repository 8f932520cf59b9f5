//! Plain text output.

use crate::bus::Event;
use crate::output::OutputFormatter;
use std::time::SystemTime;

/// One line per event, prefixed with the event name.
///
/// ```text
/// online
/// weight 100.00 grams
/// weight-change 100.00 grams
/// overweight-change true
/// end: report stream ended
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter;

impl TextFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl OutputFormatter for TextFormatter {
    fn format(&self, event: &Event, _timestamp: SystemTime) -> Option<String> {
        let kind = event.kind();
        let line = match event {
            Event::Online | Event::Offline => kind.to_string(),
            Event::Weight(reading) => format!("{kind} {reading}"),
            Event::WeightChange { value, unit } => {
                format!("{kind} {}.{:02} {unit}", value / 100, value % 100)
            }
            Event::OverweightChange(overweight) => format!("{kind} {overweight}"),
            Event::End(reason) => format!("{kind}: {reason}"),
        };
        Some(line)
    }
}
