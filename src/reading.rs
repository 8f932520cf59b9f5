//! Weight reading data structure.

use std::fmt;

/// Display unit reported by the scale.
///
/// Only grams and ounces are decoded. The scale firmware knows other unit
/// codes, but they are folded into the default (grams).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WeightUnit {
    #[default]
    Grams,
    Ounces,
}

impl WeightUnit {
    /// Stable lowercase name used in notifications and output.
    pub fn as_str(self) -> &'static str {
        match self {
            WeightUnit::Grams => "grams",
            WeightUnit::Ounces => "ounces",
        }
    }
}

impl fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded weight observation.
///
/// `value` is fixed point in hundredths of the display unit, so `10000` with
/// [`WeightUnit::Grams`] means 100 g. An overweight reading always carries a
/// value of zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WeightReading {
    /// Weight in hundredths of `unit`
    pub value: u32,
    /// Display unit the scale is set to
    pub unit: WeightUnit,
    /// The load exceeds the scale capacity
    pub is_overweight: bool,
}

impl WeightReading {
    /// An idle reading (nothing on the scale) in the given unit.
    pub const fn idle(unit: WeightUnit) -> Self {
        Self {
            value: 0,
            unit,
            is_overweight: false,
        }
    }

    /// An overweight reading. The magnitude is always dropped.
    pub const fn overweight(unit: WeightUnit) -> Self {
        Self {
            value: 0,
            unit,
            is_overweight: true,
        }
    }

    /// Weight as a floating point number of display units.
    pub fn as_units(&self) -> f64 {
        f64::from(self.value) / 100.0
    }
}

impl fmt::Display for WeightReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_overweight {
            write!(f, "overweight ({})", self.unit)
        } else {
            write!(f, "{}.{:02} {}", self.value / 100, self.value % 100, self.unit)
        }
    }
}
