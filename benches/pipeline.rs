//! Integration benchmark for the scale processing pipeline.
//!
//! Benchmarks the full application loop the same way the tests in app.rs
//! drive it: a fake transport feeds raw reports through run_with_io until the
//! report stream ends.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use dymo_scale_listener::app::{Options, RunError, run_with_io};
use dymo_scale_listener::output::Format;
use dymo_scale_listener::transport::{
    Connection, DeviceAddress, ReportStream, TransportFuture, report_channel,
};
use dymo_scale_listener::{
    Calibration, DeviceDescriptor, HotplugEvent, Report, Transport, TransportError,
};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

/// A transport with one attached scale that replays `reports` and then ends
/// the stream.
struct FakeTransport {
    reports: Vec<Report>,
}

impl Transport for FakeTransport {
    fn enumerate(&self, vendor_id: u16) -> TransportFuture<'_, Vec<DeviceDescriptor>> {
        let device = DeviceDescriptor {
            vendor_id,
            product_id: 0x8009,
            handle: DeviceAddress { bus: 1, address: 4 },
        };
        Box::pin(async move { Ok(vec![device]) })
    }

    fn open(&self, _device: DeviceDescriptor) -> TransportFuture<'_, Box<dyn Connection>> {
        let connection = FakeConnection {
            reports: self.reports.clone(),
        };
        Box::pin(async move { Ok(Box::new(connection) as Box<dyn Connection>) })
    }

    fn hotplug(&self, _vendor_id: u16) -> Result<mpsc::Receiver<HotplugEvent>, TransportError> {
        Err(TransportError::HotplugUnsupported)
    }
}

struct FakeConnection {
    reports: Vec<Report>,
}

impl Connection for FakeConnection {
    fn reset(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn kernel_driver_active(&mut self, _interface: u8) -> Result<bool, TransportError> {
        Ok(false)
    }

    fn detach_kernel_driver(&mut self, _interface: u8) -> Result<(), TransportError> {
        Ok(())
    }

    fn claim_interface(&mut self, _interface: u8) -> Result<(), TransportError> {
        Ok(())
    }

    fn poll_reports(
        self: Box<Self>,
        _endpoint: u8,
        _report_size: usize,
        queue_depth: usize,
    ) -> Result<ReportStream, TransportError> {
        let (sink, stream) = report_channel(queue_depth);
        tokio::spawn(async move {
            for report in self.reports {
                if !sink.send(Ok(report)).await {
                    break;
                }
            }
        });
        Ok(stream)
    }
}

/// A stable reading of `grams` whole grams.
fn grams(grams: u16) -> Report {
    let [low, high] = grams.to_le_bytes();
    Report([0x03, 0x04, 0x03, 0xff, low, high])
}

fn options(format: Format) -> Options {
    Options {
        product_id: None,
        calibration: Calibration::Baseline,
        format,
        influxdb_measurement: "scale_weight".to_string(),
        events: vec![],
        follow: false,
        verbose: false,
    }
}

fn run(rt: &Runtime, format: Format, reports: &[Report]) -> Vec<u8> {
    let transport = FakeTransport {
        reports: reports.to_vec(),
    };
    let mut out = Vec::<u8>::with_capacity(64 * reports.len());
    let mut err = Vec::<u8>::new();

    let result = rt.block_on(run_with_io(options(format), transport, &mut out, &mut err));
    // Every run ends with the stream running dry.
    debug_assert!(matches!(result, Err(RunError::Session(_))));

    out
}

/// Benchmark the full pipeline: transport -> decode -> filter -> bus -> format -> write
fn bench_app_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("app_pipeline");
    let rt = Runtime::new().unwrap();
    let reports = vec![grams(100)];

    group.throughput(Throughput::Elements(1));
    for format in [Format::Text, Format::Influxdb] {
        group.bench_with_input(
            BenchmarkId::new("single", format),
            &reports,
            |b, reports| b.iter(|| black_box(run(&rt, format, reports))),
        );
    }

    group.finish();
}

/// Benchmark a batch of changing readings, each one publishing events
fn bench_changing_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("changing_batch");
    let rt = Runtime::new().unwrap();

    for batch_size in [1u16, 10, 100] {
        let reports: Vec<Report> = (1..=batch_size).map(grams).collect();
        group.throughput(Throughput::Elements(u64::from(batch_size)));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &reports,
            |b, reports| b.iter(|| black_box(run(&rt, Format::Text, reports))),
        );
    }

    group.finish();
}

/// Benchmark the realistic case where the scale repeats a stable reading and
/// the filter drops almost everything
fn bench_steady_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("steady_pipeline");
    let rt = Runtime::new().unwrap();
    let reports = vec![grams(250); 100];

    group.throughput(Throughput::Elements(100));
    group.bench_function("100_same_reading", |b| {
        b.iter(|| {
            let out = run(&rt, Format::Influxdb, &reports);
            // Only the first reading publishes a weight
            debug_assert_eq!(out.iter().filter(|&&b| b == b'\n').count(), 1);
            black_box(out)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_app_pipeline,
    bench_changing_batch,
    bench_steady_pipeline,
);
criterion_main!(benches);
