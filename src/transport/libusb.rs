//! libusb transport backend.
//!
//! Uses the `rusb` bindings. Reports are read with blocking interrupt
//! transfers on a dedicated thread, hotplug callbacks are pumped by a second
//! thread running the libusb event loop.

use super::{
    Connection, DeviceAddress, DeviceDescriptor, HOTPLUG_CHANNEL_BUFFER_SIZE, HotplugEvent,
    ReleaseGuard, ReportSink, ReportStream, Transport, TransportError, TransportFuture,
    release_signal, report_channel,
};
use crate::decoder::Report;
use rusb::{Context, Device, Hotplug, HotplugBuilder, UsbContext};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Timeout of a single interrupt read. Bounds how long a stopped stream
/// keeps the device open.
const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Timeout of one pass of the hotplug event loop.
const EVENT_LOOP_TIMEOUT: Duration = Duration::from_millis(500);

impl From<rusb::Error> for TransportError {
    fn from(err: rusb::Error) -> Self {
        TransportError::Usb(err.to_string())
    }
}

fn describe<T: UsbContext>(device: &Device<T>) -> Option<DeviceDescriptor> {
    let descriptor = device.device_descriptor().ok()?;
    Some(DeviceDescriptor {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        handle: DeviceAddress {
            bus: device.bus_number(),
            address: device.address(),
        },
    })
}

/// Transport backed by a libusb context.
#[derive(Debug, Clone)]
pub struct RusbTransport {
    context: Context,
}

impl RusbTransport {
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            context: Context::new()?,
        })
    }
}

fn list(context: &Context, vendor_id: u16) -> Result<Vec<DeviceDescriptor>, TransportError> {
    Ok(context
        .devices()?
        .iter()
        .filter_map(|device| describe(&device))
        .filter(|d| d.vendor_id == vendor_id)
        .collect())
}

/// Accept a completed interrupt transfer as a report.
///
/// Zero-length and truncated transfers are skipped rather than ending the
/// stream; the scale sends a full report again a few milliseconds later.
fn accept_transfer(data: &[u8]) -> Option<Report> {
    match Report::try_from(data) {
        Ok(report) => Some(report),
        Err(short) => {
            debug!("skipping transfer: {short}");
            None
        }
    }
}

impl Transport for RusbTransport {
    fn enumerate(&self, vendor_id: u16) -> TransportFuture<'_, Vec<DeviceDescriptor>> {
        let context = self.context.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || list(&context, vendor_id))
                .await
                .map_err(|e| TransportError::Usb(format!("enumerate task failed: {e}")))?
        })
    }

    fn open(&self, device: DeviceDescriptor) -> TransportFuture<'_, Box<dyn Connection>> {
        let context = self.context.clone();
        Box::pin(async move {
            let handle = tokio::task::spawn_blocking(move || {
                let found = context
                    .devices()?
                    .iter()
                    .find(|d| describe(d).is_some_and(|desc| desc.handle == device.handle))
                    .ok_or(TransportError::NotFound(device.handle))?;
                found.open().map_err(TransportError::from)
            })
            .await
            .map_err(|e| TransportError::Usb(format!("open task failed: {e}")))??;

            Ok(Box::new(RusbConnection {
                handle,
                claimed: None,
            }) as Box<dyn Connection>)
        })
    }

    fn hotplug(&self, vendor_id: u16) -> Result<mpsc::Receiver<HotplugEvent>, TransportError> {
        if !rusb::has_hotplug() {
            return Err(TransportError::HotplugUnsupported);
        }

        let (tx, rx) = mpsc::channel(HOTPLUG_CHANNEL_BUFFER_SIZE);
        let (registered_tx, registered_rx) = std_mpsc::channel();
        let context = self.context.clone();

        // The registration stays on the event loop thread; it is dropped
        // (and the callback deregistered) once the receiver goes away.
        thread::Builder::new()
            .name("dymo-hotplug".into())
            .spawn(move || {
                let forwarder = HotplugForwarder { tx: tx.clone() };
                let callback: Box<dyn Hotplug<Context>> = Box::new(forwarder);
                let registration = HotplugBuilder::new()
                    .vendor_id(vendor_id)
                    .enumerate(false)
                    .register(&context, callback);

                let _registration = match registration {
                    Ok(registration) => {
                        let _ = registered_tx.send(Ok(()));
                        registration
                    }
                    Err(e) => {
                        let _ = registered_tx.send(Err(TransportError::from(e)));
                        return;
                    }
                };

                while !tx.is_closed() {
                    if let Err(e) = context.handle_events(Some(EVENT_LOOP_TIMEOUT)) {
                        warn!("libusb event loop failed: {e}");
                        break;
                    }
                }
                debug!("hotplug event loop stopped");
            })
            .map_err(|e| TransportError::Usb(format!("failed to spawn hotplug thread: {e}")))?;

        registered_rx
            .recv()
            .map_err(|_| TransportError::Usb("hotplug thread exited".into()))??;

        Ok(rx)
    }
}

struct HotplugForwarder {
    tx: mpsc::Sender<HotplugEvent>,
}

impl HotplugForwarder {
    fn forward(&self, event: HotplugEvent) {
        if self.tx.blocking_send(event).is_err() {
            debug!("hotplug receiver dropped, discarding {event:?}");
        }
    }
}

impl<T: UsbContext> Hotplug<T> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<T>) {
        if let Some(descriptor) = describe(&device) {
            self.forward(HotplugEvent::Attach(descriptor));
        }
    }

    fn device_left(&mut self, device: Device<T>) {
        if let Some(descriptor) = describe(&device) {
            self.forward(HotplugEvent::Detach(descriptor));
        }
    }
}

/// An open libusb device handle.
pub struct RusbConnection {
    handle: rusb::DeviceHandle<Context>,
    claimed: Option<u8>,
}

impl Connection for RusbConnection {
    fn reset(&mut self) -> Result<(), TransportError> {
        Ok(self.handle.reset()?)
    }

    fn kernel_driver_active(&mut self, interface: u8) -> Result<bool, TransportError> {
        match self.handle.kernel_driver_active(interface) {
            Ok(active) => Ok(active),
            // Platforms without kernel drivers to detach (macOS, Windows)
            Err(rusb::Error::NotSupported) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), TransportError> {
        Ok(self.handle.detach_kernel_driver(interface)?)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        self.handle.claim_interface(interface)?;
        self.claimed = Some(interface);
        Ok(())
    }

    fn poll_reports(
        self: Box<Self>,
        endpoint: u8,
        report_size: usize,
        queue_depth: usize,
    ) -> Result<ReportStream, TransportError> {
        let (sink, stream) = report_channel(queue_depth);
        let (guard, released) = release_signal();
        let connection = *self;

        thread::Builder::new()
            .name("dymo-poll".into())
            .spawn(move || connection.poll(endpoint, report_size, sink, guard))
            .map_err(|e| TransportError::Usb(format!("failed to spawn polling thread: {e}")))?;

        Ok(stream.with_release(released))
    }
}

impl RusbConnection {
    /// Read reports until the stream is stopped or the device goes away.
    ///
    /// `guard` is dropped only after the interface is released and the handle
    /// closed, so a new session can claim the device as soon as it resolves.
    fn poll(mut self, endpoint: u8, report_size: usize, sink: ReportSink, guard: ReleaseGuard) {
        let mut buf = vec![0u8; report_size];

        while !sink.is_stopped() {
            match self.handle.read_interrupt(endpoint, &mut buf, READ_TIMEOUT) {
                Ok(n) => {
                    let Some(report) = accept_transfer(&buf[..n]) else {
                        continue;
                    };
                    if !sink.blocking_send(Ok(report)) {
                        break;
                    }
                }
                Err(rusb::Error::Timeout) => continue,
                Err(rusb::Error::NoDevice) => {
                    debug!("scale disconnected, ending report stream");
                    break;
                }
                Err(e) => {
                    sink.blocking_send(Err(e.into()));
                    break;
                }
            }
        }

        if let Some(interface) = self.claimed.take() {
            let _ = self.handle.release_interface(interface);
        }
        drop(self);
        drop(guard);
        debug!("report polling stopped");
    }
}
