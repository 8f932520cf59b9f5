//! Notification bus.
//!
//! A plain observer registry: each [`EventKind`] maps to an ordered list of
//! callbacks. Delivery is synchronous and in subscription order. There is no
//! buffering, so a subscriber only sees events published after it subscribed.

use crate::reading::{WeightReading, WeightUnit};
use std::collections::HashMap;
use std::fmt;

/// A notification published by a scale session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A scale was attached
    Online,
    /// A scale was detached
    Offline,
    /// Full reading, published alongside every change notification
    Weight(WeightReading),
    /// Magnitude or unit changed
    WeightChange { value: u32, unit: WeightUnit },
    /// Overweight flag flipped
    OverweightChange(bool),
    /// The session ended; carries a human-readable reason
    End(String),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Online => EventKind::Online,
            Event::Offline => EventKind::Offline,
            Event::Weight(_) => EventKind::Weight,
            Event::WeightChange { .. } => EventKind::WeightChange,
            Event::OverweightChange(_) => EventKind::OverweightChange,
            Event::End(_) => EventKind::End,
        }
    }
}

/// Event names subscribers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum EventKind {
    Online,
    Offline,
    Weight,
    WeightChange,
    OverweightChange,
    End,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Online,
        EventKind::Offline,
        EventKind::Weight,
        EventKind::WeightChange,
        EventKind::OverweightChange,
        EventKind::End,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Online => "online",
            EventKind::Offline => "offline",
            EventKind::Weight => "weight",
            EventKind::WeightChange => "weight-change",
            EventKind::OverweightChange => "overweight-change",
            EventKind::End => "end",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscriber callback.
pub type Callback = Box<dyn FnMut(&Event) + Send>;

/// Registry of subscribers keyed by event kind.
#[derive(Default)]
pub struct NotificationBus {
    subscribers: HashMap<EventKind, Vec<Callback>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback for `kind`. Subscriptions are never removed.
    pub fn subscribe(&mut self, kind: EventKind, callback: Callback) {
        self.subscribers.entry(kind).or_default().push(callback);
    }

    /// Deliver `event` to every subscriber of its kind, in subscription order.
    pub fn publish(&mut self, event: &Event) {
        if let Some(callbacks) = self.subscribers.get_mut(&event.kind()) {
            for callback in callbacks.iter_mut() {
                callback(event);
            }
        }
    }

    pub fn publish_all(&mut self, events: &[Event]) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self
            .subscribers
            .iter()
            .map(|(kind, callbacks)| (kind.as_str(), callbacks.len()))
            .collect();
        f.debug_struct("NotificationBus")
            .field("subscribers", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Callback {
        let log = Arc::clone(log);
        Box::new(move |event| {
            log.lock().unwrap().push(format!("{tag}:{}", event.kind()));
        })
    }

    #[test]
    fn test_delivers_in_subscription_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = NotificationBus::new();
        bus.subscribe(EventKind::Online, recorder(&log, "a"));
        bus.subscribe(EventKind::Online, recorder(&log, "b"));
        bus.subscribe(EventKind::Offline, recorder(&log, "c"));

        bus.publish(&Event::Online);
        bus.publish(&Event::Offline);

        assert_eq!(*log.lock().unwrap(), vec!["a:online", "b:online", "c:offline"]);
    }

    #[test]
    fn test_only_matching_kind_is_delivered() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = NotificationBus::new();
        bus.subscribe(EventKind::End, recorder(&log, "end"));

        bus.publish(&Event::Weight(WeightReading::default()));
        bus.publish(&Event::OverweightChange(true));
        assert!(log.lock().unwrap().is_empty());

        bus.publish(&Event::End("gone".into()));
        assert_eq!(*log.lock().unwrap(), vec!["end:end"]);
    }

    #[test]
    fn test_no_replay_for_late_subscriber() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = NotificationBus::new();

        bus.publish(&Event::Online);
        bus.subscribe(EventKind::Online, recorder(&log, "late"));
        assert!(log.lock().unwrap().is_empty());

        bus.publish(&Event::Online);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_event_kind_names_match_command_line_values() {
        use clap::ValueEnum;

        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_str(kind.as_str(), false), Ok(kind));
        }
        assert_eq!(EventKind::WeightChange.to_string(), "weight-change");
        assert!(EventKind::from_str("weight_change", false).is_err());
    }

    #[test]
    fn test_subscriber_count_and_debug() {
        let mut bus = NotificationBus::new();
        assert_eq!(bus.subscriber_count(EventKind::Weight), 0);
        bus.subscribe(EventKind::Weight, Box::new(|_| {}));
        assert_eq!(bus.subscriber_count(EventKind::Weight), 1);
        assert!(format!("{bus:?}").contains("weight"));
    }
}
