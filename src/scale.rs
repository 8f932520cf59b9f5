//! Public handle to a Dymo scale.
//!
//! [`Scale::spawn`] starts a driver task that owns the notification bus, the
//! current [`Session`] and the hotplug listener. Every input (start
//! requests, subscriptions, hotplug notifications and reports) is handled
//! on that one task, one at a time, so subscribers never see interleaved
//! or out-of-order readings.

use crate::bus::{Callback, Event, EventKind, NotificationBus};
use crate::decoder::Calibration;
use crate::reading::WeightReading;
use crate::session::{Session, SessionState};
use crate::transport::{HotplugEvent, Transport, VENDOR_ID};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Settings applied to every session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScaleConfig {
    /// Magnitude correction, never inferred from the product id
    pub calibration: Calibration,
}

/// Errors returned by the scale handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScaleError {
    #[error("scale driver has stopped")]
    Stopped,
}

/// Point-in-time view of the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub state: SessionState,
    pub ready: bool,
    pub reading: WeightReading,
}

enum Command {
    Start(Option<u16>),
    Subscribe(EventKind, Callback),
    Shutdown,
}

/// Handle to a running scale driver.
///
/// Must be created from within a tokio runtime.
#[derive(Debug)]
pub struct Scale {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

impl Scale {
    /// Spawn the driver task. Hotplug notifications are used when the
    /// transport supports them; otherwise only explicit [`Scale::start`]
    /// calls create sessions.
    pub fn spawn<T: Transport + 'static>(transport: T, config: ScaleConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(Snapshot::default());

        let hotplug = match transport.hotplug(VENDOR_ID) {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!("not watching for scale hotplug: {e}");
                None
            }
        };

        let driver = Driver {
            transport: Box::new(transport),
            config,
            bus: NotificationBus::new(),
            session: None,
            snapshot: snapshot_tx,
        };
        let task = tokio::spawn(driver.run(command_rx, hotplug));

        Self {
            commands,
            snapshot,
            task,
        }
    }

    /// Start a new session, ending the current one first.
    ///
    /// With `product_id`, that scale is preferred when several are attached.
    /// Failures are reported through the `end` event.
    pub fn start(&self, product_id: Option<u16>) -> Result<(), ScaleError> {
        self.send(Command::Start(product_id))
    }

    /// Register `callback` for `kind`. It runs on the driver task and only
    /// sees events published after the subscription is processed.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Result<(), ScaleError>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.send(Command::Subscribe(kind, Box::new(callback)))
    }

    /// Subscribe to several kinds at once and receive the events on a channel,
    /// in publish order.
    pub fn events(&self, kinds: &[EventKind]) -> Result<mpsc::UnboundedReceiver<Event>, ScaleError> {
        let (tx, rx) = mpsc::unbounded_channel();
        for &kind in kinds {
            let tx = tx.clone();
            self.subscribe(kind, move |event| {
                let _ = tx.send(event.clone());
            })?;
        }
        Ok(rx)
    }

    /// Last reading published by the current session.
    pub fn current_reading(&self) -> WeightReading {
        self.snapshot.borrow().reading
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot.borrow().ready
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.snapshot.borrow()
    }

    /// Wait until the snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&Snapshot) -> bool,
    ) -> Result<Snapshot, ScaleError> {
        let mut snapshot = self.snapshot.clone();
        let current = snapshot
            .wait_for(predicate)
            .await
            .map_err(|_| ScaleError::Stopped)?;
        Ok(*current)
    }

    /// End the current session and stop the driver.
    pub async fn shutdown(self) -> Result<(), ScaleError> {
        // The driver may already be gone; joining tells us how it went.
        let _ = self.commands.send(Command::Shutdown);
        self.task.await.map_err(|_| ScaleError::Stopped)
    }

    fn send(&self, command: Command) -> Result<(), ScaleError> {
        self.commands.send(command).map_err(|_| ScaleError::Stopped)
    }
}

struct Driver {
    transport: Box<dyn Transport>,
    config: ScaleConfig,
    bus: NotificationBus,
    session: Option<Session>,
    snapshot: watch::Sender<Snapshot>,
}

async fn next_hotplug(hotplug: &mut Option<mpsc::Receiver<HotplugEvent>>) -> Option<HotplugEvent> {
    match hotplug {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut hotplug: Option<mpsc::Receiver<HotplugEvent>>,
    ) {
        loop {
            // Commands first, so a subscription is registered before any
            // hotplug or report that was queued after it.
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Start(product_id)) => self.start(product_id).await,
                    Some(Command::Subscribe(kind, callback)) => self.bus.subscribe(kind, callback),
                    Some(Command::Shutdown) | None => break,
                },
                event = next_hotplug(&mut hotplug) => match event {
                    Some(event) => self.on_hotplug(event).await,
                    None => {
                        debug!("hotplug notifications closed");
                        hotplug = None;
                    }
                },
                signal = next_signal(&mut self.session) => {
                    let events = match self.session.as_mut() {
                        Some(session) => session.handle(signal),
                        None => Vec::new(),
                    };
                    self.publish(&events);
                },
            }
        }

        if let Some(session) = self.session.as_mut() {
            session.shutdown();
            session.released().await;
        }
        self.sync_snapshot();
        debug!("scale driver stopped");
    }

    async fn start(&mut self, product_id: Option<u16>) {
        if let Some(previous) = self.session.as_mut() {
            previous.shutdown();
            previous.released().await;
        }

        let mut session = Session::new(self.config.calibration);
        let result = session.start(self.transport.as_ref(), product_id).await;
        self.session = Some(session);

        match result {
            Ok(()) => self.sync_snapshot(),
            Err(e) => self.publish(&[Event::End(e.to_string())]),
        }
    }

    async fn on_hotplug(&mut self, event: HotplugEvent) {
        if !event.device().is_scale() {
            return;
        }

        match event {
            HotplugEvent::Attach(device) => {
                info!("scale attached: {device}");
                self.publish(&[Event::Online]);
                self.start(Some(device.product_id)).await;
            }
            HotplugEvent::Detach(device) => {
                info!("scale detached: {device}");
                if let Some(session) = self.session.as_mut() {
                    session.mark_not_ready();
                }
                self.publish(&[Event::Offline]);
            }
        }
    }

    /// Refresh the shared snapshot, then deliver `events` in order.
    fn publish(&mut self, events: &[Event]) {
        self.sync_snapshot();
        self.bus.publish_all(events);
    }

    fn sync_snapshot(&self) {
        let snapshot = match &self.session {
            Some(session) => Snapshot {
                state: session.state(),
                ready: session.is_ready(),
                reading: session.current_reading(),
            },
            None => Snapshot::default(),
        };
        self.snapshot.send_replace(snapshot);
    }
}

async fn next_signal(session: &mut Option<Session>) -> crate::session::StreamSignal {
    match session {
        Some(session) => session.next_signal().await,
        None => std::future::pending().await,
    }
}
