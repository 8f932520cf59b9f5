//! Device session state machine.
//!
//! A [`Session`] is one attempt to select a scale, connect to it and stream
//! its reports. It moves through
//!
//! ```text
//! Disconnected -> Selecting -> Connecting -> Ready -> Ended
//!                     |             |
//!                     +-------------+------------> Ended
//! ```
//!
//! and never leaves `Ended`. Recovering from a failure means building a new
//! session, which the scale driver does on hotplug attach.

use crate::bus::Event;
use crate::decoder::{Calibration, REPORT_SIZE, Report, decode};
use crate::filter::ChangeFilter;
use crate::reading::WeightReading;
use crate::transport::{
    DeviceDescriptor, ENDPOINT, INTERFACE, REPORT_QUEUE_DEPTH, Released, ReportStream, Transport,
    TransportError, VENDOR_ID,
};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Selecting,
    Connecting,
    Ready,
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Selecting => "selecting",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Reasons a session ends. All of them are terminal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("no Dymo scale found")]
    NoDeviceFound,
    #[error("found {0} Dymo scales, specify a product id")]
    AmbiguousDevice(usize),
    #[error("failed to connect to scale: {0}")]
    ConnectFailed(String),
    #[error("endpoint error: {0}")]
    EndpointError(String),
    #[error("report stream ended")]
    StreamEnded,
}

/// What the report stream delivered next.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    Report(Report),
    Error(TransportError),
    End,
}

impl From<Option<Result<Report, TransportError>>> for StreamSignal {
    fn from(item: Option<Result<Report, TransportError>>) -> Self {
        match item {
            Some(Ok(report)) => StreamSignal::Report(report),
            Some(Err(e)) => StreamSignal::Error(e),
            None => StreamSignal::End,
        }
    }
}

/// Pick the device to connect to.
///
/// A matching `product_id` wins. Otherwise a single candidate is taken, and
/// zero or several candidates are errors. Devices of other vendors are ignored.
pub fn select(
    candidates: &[DeviceDescriptor],
    product_id: Option<u16>,
) -> Result<DeviceDescriptor, SessionError> {
    let scales: Vec<&DeviceDescriptor> = candidates.iter().filter(|d| d.is_scale()).collect();

    if let Some(wanted) = product_id
        && let Some(device) = scales.iter().find(|d| d.product_id == wanted)
    {
        return Ok(**device);
    }

    match scales.as_slice() {
        [] => Err(SessionError::NoDeviceFound),
        [device] => Ok(**device),
        many => Err(SessionError::AmbiguousDevice(many.len())),
    }
}

/// Open, reset, detach the kernel driver, claim and start polling.
#[tracing::instrument(skip(transport, device), fields(device = %device))]
async fn connect(
    transport: &dyn Transport,
    device: DeviceDescriptor,
) -> Result<ReportStream, TransportError> {
    let mut connection = transport.open(device).await?;
    connection.reset()?;
    if connection.kernel_driver_active(INTERFACE)? {
        debug!("detaching kernel driver from interface {INTERFACE}");
        connection.detach_kernel_driver(INTERFACE)?;
    }
    connection.claim_interface(INTERFACE)?;
    connection.poll_reports(ENDPOINT, REPORT_SIZE, REPORT_QUEUE_DEPTH)
}

/// One connection attempt to one scale.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    ready: bool,
    calibration: Calibration,
    filter: ChangeFilter,
    device: Option<DeviceDescriptor>,
    stream: Option<ReportStream>,
    released: Option<Released>,
}

impl Session {
    pub fn new(calibration: Calibration) -> Self {
        Self {
            state: SessionState::Disconnected,
            ready: false,
            calibration,
            filter: ChangeFilter::new(),
            device: None,
            stream: None,
            released: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Last published reading of this session.
    pub fn current_reading(&self) -> WeightReading {
        self.filter.last()
    }

    /// The device selected for this session, once selection succeeded.
    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.device.as_ref()
    }

    /// Select a scale and connect to it.
    ///
    /// On success the session is `Ready` and reports start arriving through
    /// [`Session::next_signal`]. On failure it is `Ended` and the error
    /// explains why. A session can only be started once.
    pub async fn start(
        &mut self,
        transport: &dyn Transport,
        product_id: Option<u16>,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::ConnectFailed(format!(
                "session already {}",
                self.state
            )));
        }

        let result = self.select_and_connect(transport, product_id).await;
        if let Err(e) = &result {
            warn!("scale session failed: {e}");
            self.shutdown();
        }
        result
    }

    async fn select_and_connect(
        &mut self,
        transport: &dyn Transport,
        product_id: Option<u16>,
    ) -> Result<(), SessionError> {
        self.state = SessionState::Selecting;
        let candidates = transport
            .enumerate(VENDOR_ID)
            .await
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;
        let device = select(&candidates, product_id)?;
        debug!("selected {device}");

        self.state = SessionState::Connecting;
        self.device = Some(device);
        let stream = connect(transport, device)
            .await
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        self.stream = Some(stream);
        self.state = SessionState::Ready;
        self.ready = true;
        info!("connected to scale {device}");
        Ok(())
    }

    /// Wait for the next report stream signal.
    ///
    /// Pends forever when the session has no live stream, so it can sit in a
    /// `select!` next to other event sources.
    pub async fn next_signal(&mut self) -> StreamSignal {
        match self.stream.as_mut() {
            Some(stream) if self.state == SessionState::Ready => stream.recv().await.into(),
            _ => std::future::pending().await,
        }
    }

    /// Process one stream signal and return the events to publish.
    ///
    /// Signals arriving after the session left `Ready` are dropped.
    pub fn handle(&mut self, signal: StreamSignal) -> Vec<Event> {
        if self.state != SessionState::Ready {
            return Vec::new();
        }

        match signal {
            StreamSignal::Report(report) => {
                let reading = decode(&report, self.calibration);
                self.filter.apply(reading)
            }
            StreamSignal::Error(e) => {
                let reason = SessionError::EndpointError(e.to_string());
                warn!("{reason}");
                self.shutdown();
                vec![Event::End(reason.to_string())]
            }
            StreamSignal::End => {
                info!("scale report stream ended");
                self.shutdown();
                vec![Event::End(SessionError::StreamEnded.to_string())]
            }
        }
    }

    /// Flag the session as not ready without touching its stream.
    pub fn mark_not_ready(&mut self) {
        self.ready = false;
    }

    /// Drive the session to `Ended`: not ready first, then stop polling and
    /// release the stream. Idempotent.
    ///
    /// The device may still be held by the polling side afterwards; await
    /// [`Session::released`] before connecting to it again.
    pub fn shutdown(&mut self) {
        self.ready = false;
        if let Some(stream) = self.stream.take() {
            self.released = stream.close();
        }
        self.state = SessionState::Ended;
    }

    /// Wait until the polling side has let go of the device.
    ///
    /// Returns at once for sessions that never polled, or whose release was
    /// already awaited.
    pub async fn released(&mut self) {
        if let Some(released) = self.released.take() {
            released.wait().await;
            debug!("scale released");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
