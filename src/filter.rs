//! Change filtering for decoded weight readings.
//!
//! The scale reports several times per second whether or not anything
//! changed. This module keeps the last published reading and turns a new
//! reading into the notifications it warrants, so subscribers only hear
//! about actual changes.

use crate::bus::Event;
use crate::reading::WeightReading;

/// Compare two readings and list the events `next` should publish.
///
/// Magnitude and unit are compared together (a unit switch at the same
/// number is still a change). The overweight flag is compared on its own,
/// so both kinds of change can fire for the same report.
pub fn changes(previous: &WeightReading, next: &WeightReading) -> Vec<Event> {
    let mut events = Vec::new();

    if next.value != previous.value || next.unit != previous.unit {
        events.push(Event::WeightChange {
            value: next.value,
            unit: next.unit,
        });
        events.push(Event::Weight(*next));
    }

    if next.is_overweight != previous.is_overweight {
        events.push(Event::OverweightChange(next.is_overweight));
        events.push(Event::Weight(*next));
    }

    events
}

/// Holds the last-known reading of one session.
#[derive(Debug, Default, Clone)]
pub struct ChangeFilter {
    last: WeightReading,
}

impl ChangeFilter {
    /// Create a filter whose last-known reading is idle grams.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a freshly decoded reading.
    ///
    /// Returns the events to publish and remembers `next` as the last-known
    /// reading. Feeding the same reading twice publishes nothing the second time.
    pub fn apply(&mut self, next: WeightReading) -> Vec<Event> {
        let events = changes(&self.last, &next);
        self.last = next;
        events
    }

    pub fn last(&self) -> WeightReading {
        self.last
    }
}
