//! InfluxDB line protocol output formatter.

use crate::bus::Event;
use crate::output::OutputFormatter;
use crate::reading::WeightReading;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::Boolean(value) => write!(f, "{value}"),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

// Timestamps before the epoch are written without a timestamp, letting the
// server assign one.
fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    if let Some(since_epoch) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
    {
        write!(fmt, " {}", since_epoch.as_nanos())?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Only `weight` events produce a data point: the unit becomes a tag, the
/// reading is written both in display units (`value`) and in the raw
/// hundredths the scale reports (`raw`).
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(reading: &WeightReading) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("unit".to_string(), reading.unit.to_string());
        tags
    }

    fn field_set(reading: &WeightReading) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert("value".to_string(), FieldValue::Float(reading.as_units()));
        fields.insert(
            "raw".to_string(),
            FieldValue::Integer(i64::from(reading.value)),
        );
        fields.insert(
            "overweight".to_string(),
            FieldValue::Boolean(reading.is_overweight),
        );
        fields
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, event: &Event, timestamp: SystemTime) -> Option<String> {
        let Event::Weight(reading) = event else {
            return None;
        };

        let data_point = DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: Self::tag_set(reading),
            field_set: Self::field_set(reading),
            timestamp: Some(timestamp),
        };
        Some(data_point.to_string())
    }
}
