//! Decoder for the 6-byte HID weight report.
//!
//! Layout of a report as delivered by the interrupt endpoint:
//!
//! | offset | field                                   |
//! |--------|-----------------------------------------|
//! | 0      | report id (ignored)                     |
//! | 1      | scale status                            |
//! | 2      | unit code                               |
//! | 3      | scaling exponent (ignored)              |
//! | 4..=5  | weight mantissa, little-endian `u16`    |

use crate::reading::{WeightReading, WeightUnit};
use std::fmt;
use thiserror::Error;

/// Size in bytes of a single weight report.
pub const REPORT_SIZE: usize = 6;

const STATUS_OFFSET: usize = 1;
const UNIT_OFFSET: usize = 2;

const UNIT_CODE_GRAMS: u8 = 3;
const UNIT_CODE_OUNCES: u8 = 12;

/// A raw weight report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Report(pub [u8; REPORT_SIZE]);

/// Returned when a transfer is too short to hold a weight report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("short report: expected 6 bytes, got {0}")]
pub struct ShortReport(pub usize);

impl TryFrom<&[u8]> for Report {
    type Error = ShortReport;

    /// Take the first [`REPORT_SIZE`] bytes of a transfer. Trailing bytes are ignored.
    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        data.get(..REPORT_SIZE)
            .and_then(|head| head.try_into().ok())
            .map(Report)
            .ok_or(ShortReport(data.len()))
    }
}

impl From<[u8; REPORT_SIZE]> for Report {
    fn from(bytes: [u8; REPORT_SIZE]) -> Self {
        Self(bytes)
    }
}

impl Report {
    pub fn status(&self) -> ScaleStatus {
        ScaleStatus::from(self.0[STATUS_OFFSET])
    }

    pub fn unit_code(&self) -> u8 {
        self.0[UNIT_OFFSET]
    }

    /// Raw weight mantissa (`low + high * 256`).
    pub fn mantissa(&self) -> u32 {
        u32::from(self.0[4]) + u32::from(self.0[5]) * 256
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Scale status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleStatus {
    /// Nothing on the platform
    Idle,
    /// Load is settling
    Weighing,
    /// Stable reading available
    StableReady,
    /// Load exceeds capacity
    Overweight,
    /// Any other status code (fault, under zero, calibration...)
    Unknown(u8),
}

impl From<u8> for ScaleStatus {
    fn from(code: u8) -> Self {
        match code {
            2 => ScaleStatus::Idle,
            3 => ScaleStatus::Weighing,
            4 => ScaleStatus::StableReady,
            6 => ScaleStatus::Overweight,
            other => ScaleStatus::Unknown(other),
        }
    }
}

/// Correction applied to stable magnitudes for scale models that report
/// with a finer resolution.
///
/// Never inferred from the product id: it has to be chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Calibration {
    /// Magnitudes are used as reported
    #[default]
    Baseline,
    /// Divide ounce magnitudes by 1000 and gram magnitudes by 100
    SmallScale,
}

impl Calibration {
    fn divisor(self, unit: WeightUnit) -> u32 {
        match (self, unit) {
            (Calibration::Baseline, _) => 1,
            (Calibration::SmallScale, WeightUnit::Ounces) => 1000,
            (Calibration::SmallScale, WeightUnit::Grams) => 100,
        }
    }

    /// Scale `value` down, rounding half up.
    fn apply(self, value: u32, unit: WeightUnit) -> u32 {
        let divisor = self.divisor(unit);
        (value + divisor / 2) / divisor
    }
}

/// Decode a weight report.
///
/// Rules are applied in order, later ones overriding earlier ones, so that
/// the status byte always dominates the unit and magnitude:
///
/// 1. idle zeroes the value,
/// 2. the unit code selects ounces or grams (anything else stays grams),
/// 3. a stable reading takes its magnitude from the mantissa, in
///    hundredths of the display unit (the ounce mantissa counts tenths),
/// 4. overweight zeroes the value and raises the overweight flag.
///
/// Never fails: unknown status codes decode like idle.
pub fn decode(report: &Report, calibration: Calibration) -> WeightReading {
    let status = report.status();
    let mut reading = WeightReading::idle(WeightUnit::default());

    reading.unit = match report.unit_code() {
        UNIT_CODE_OUNCES => WeightUnit::Ounces,
        UNIT_CODE_GRAMS => WeightUnit::Grams,
        _ => reading.unit,
    };

    if status == ScaleStatus::StableReady {
        let raw = match reading.unit {
            WeightUnit::Ounces => report.mantissa() * 10,
            WeightUnit::Grams => report.mantissa() * 100,
        };
        reading.value = calibration.apply(raw, reading.unit);
    }

    if status == ScaleStatus::Overweight {
        reading.is_overweight = true;
        reading.value = 0;
    }

    reading
}
