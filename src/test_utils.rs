use crate::decoder::Report;
use crate::transport::{
    Connection, DeviceAddress, DeviceDescriptor, HotplugEvent, ReportSink, ReportStream,
    Transport, TransportError, TransportFuture, VENDOR_ID, release_signal, report_channel,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const STATUS_IDLE: u8 = 2;
pub const STATUS_STABLE: u8 = 4;
pub const STATUS_OVERWEIGHT: u8 = 6;

pub const UNIT_GRAMS: u8 = 3;
pub const UNIT_OUNCES: u8 = 12;

/// Product id of the large (S250 style) scale.
pub const LARGE_SCALE: u16 = 32777;
/// Product id of the small (M5 style) scale.
pub const SMALL_SCALE: u16 = 32771;

/// How long a fake polling side keeps the interface after being stopped,
/// like a blocked interrupt read running into its timeout.
const RELEASE_DELAY: Duration = Duration::from_millis(20);

/// Build a report from its meaningful fields.
pub fn report(status: u8, unit: u8, low: u8, high: u8) -> Report {
    Report([0x03, status, unit, 0xff, low, high])
}

/// A stable reading of `grams` whole grams.
pub fn grams_report(grams: u16) -> Report {
    let [low, high] = grams.to_le_bytes();
    report(STATUS_STABLE, UNIT_GRAMS, low, high)
}

pub fn scale_device(product_id: u16, address: u8) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id: VENDOR_ID,
        product_id,
        handle: DeviceAddress { bus: 1, address },
    }
}

/// Test-side handles to a [`FakeTransport`].
pub struct FakeHandles {
    /// One sink per successful `poll_reports`, in connection order
    pub sinks: mpsc::UnboundedReceiver<ReportSink>,
    /// Feed attach/detach notifications
    pub hotplug: mpsc::Sender<HotplugEvent>,
    /// Transport calls in the order they happened
    pub calls: Arc<Mutex<Vec<String>>>,
}

/// In-memory transport with scripted devices and failures.
pub struct FakeTransport {
    devices: Mutex<Vec<DeviceDescriptor>>,
    open_error: Option<String>,
    reset_error: Option<String>,
    detach_error: Option<String>,
    claim_error: Option<String>,
    kernel_driver_active: bool,
    /// Interface 0 is claimed; claims are exclusive like on usbfs
    claimed: Arc<AtomicBool>,
    sinks: mpsc::UnboundedSender<ReportSink>,
    hotplug: Mutex<Option<mpsc::Receiver<HotplugEvent>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeTransport {
    pub fn new(devices: Vec<DeviceDescriptor>) -> (Self, FakeHandles) {
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let (hotplug_tx, hotplug_rx) = mpsc::channel(8);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let transport = Self {
            devices: Mutex::new(devices),
            open_error: None,
            reset_error: None,
            detach_error: None,
            claim_error: None,
            kernel_driver_active: false,
            claimed: Arc::new(AtomicBool::new(false)),
            sinks: sink_tx,
            hotplug: Mutex::new(Some(hotplug_rx)),
            calls: Arc::clone(&calls),
        };
        let handles = FakeHandles {
            sinks: sink_rx,
            hotplug: hotplug_tx,
            calls,
        };
        (transport, handles)
    }

    pub fn failing_open(mut self, reason: &str) -> Self {
        self.open_error = Some(reason.to_string());
        self
    }

    pub fn failing_reset(mut self, reason: &str) -> Self {
        self.reset_error = Some(reason.to_string());
        self
    }

    pub fn failing_detach(mut self, reason: &str) -> Self {
        self.detach_error = Some(reason.to_string());
        self
    }

    pub fn failing_claim(mut self, reason: &str) -> Self {
        self.claim_error = Some(reason.to_string());
        self
    }

    pub fn with_kernel_driver(mut self) -> Self {
        self.kernel_driver_active = true;
        self
    }

    /// Replace the enumerable devices (e.g. to simulate a plug-in).
    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        *self.devices.lock().unwrap() = devices;
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Transport for FakeTransport {
    fn enumerate(&self, vendor_id: u16) -> TransportFuture<'_, Vec<DeviceDescriptor>> {
        let devices: Vec<_> = self
            .devices
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|d| d.vendor_id == vendor_id)
            .collect();
        self.log(format!("enumerate {vendor_id}"));
        Box::pin(async move { Ok(devices) })
    }

    fn open(&self, device: DeviceDescriptor) -> TransportFuture<'_, Box<dyn Connection>> {
        self.log(format!("open {}", device.product_id));
        let result = match &self.open_error {
            Some(reason) => Err(TransportError::Usb(reason.clone())),
            None => Ok(Box::new(FakeConnection {
                kernel_driver_active: self.kernel_driver_active,
                reset_error: self.reset_error.clone(),
                detach_error: self.detach_error.clone(),
                claim_error: self.claim_error.clone(),
                claimed: Arc::clone(&self.claimed),
                holds_claim: false,
                sinks: self.sinks.clone(),
                calls: Arc::clone(&self.calls),
            }) as Box<dyn Connection>),
        };
        Box::pin(async move { result })
    }

    fn hotplug(&self, _vendor_id: u16) -> Result<mpsc::Receiver<HotplugEvent>, TransportError> {
        self.hotplug
            .lock()
            .unwrap()
            .take()
            .ok_or(TransportError::HotplugUnsupported)
    }
}

struct FakeConnection {
    kernel_driver_active: bool,
    reset_error: Option<String>,
    detach_error: Option<String>,
    claim_error: Option<String>,
    claimed: Arc<AtomicBool>,
    holds_claim: bool,
    sinks: mpsc::UnboundedSender<ReportSink>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeConnection {
    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn fail_with(reason: Option<&String>) -> Result<(), TransportError> {
        match reason {
            Some(reason) => Err(TransportError::Usb(reason.clone())),
            None => Ok(()),
        }
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        if self.holds_claim {
            self.claimed.store(false, Ordering::Release);
        }
    }
}

impl Connection for FakeConnection {
    fn reset(&mut self) -> Result<(), TransportError> {
        self.log("reset".into());
        Self::fail_with(self.reset_error.as_ref())
    }

    fn kernel_driver_active(&mut self, _interface: u8) -> Result<bool, TransportError> {
        Ok(self.kernel_driver_active)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), TransportError> {
        self.log(format!("detach {interface}"));
        Self::fail_with(self.detach_error.as_ref())?;
        self.kernel_driver_active = false;
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        self.log(format!("claim {interface}"));
        Self::fail_with(self.claim_error.as_ref())?;
        if self.claimed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Usb("Resource busy".into()));
        }
        self.holds_claim = true;
        Ok(())
    }

    fn poll_reports(
        self: Box<Self>,
        endpoint: u8,
        report_size: usize,
        queue_depth: usize,
    ) -> Result<ReportStream, TransportError> {
        self.log(format!("poll {endpoint:#04x} {report_size} {queue_depth}"));
        let (sink, stream) = report_channel(queue_depth);
        let (guard, released) = release_signal();
        let stopped = sink.stop_flag();
        let _ = self.sinks.send(sink);

        // Hold the claim until the consumer stops the stream, then some more.
        let connection = *self;
        tokio::spawn(async move {
            while !stopped.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(RELEASE_DELAY).await;
            drop(connection);
            drop(guard);
        });

        Ok(stream.with_release(released))
    }
}
