//! Sentinel-aware readings
//!
//! The assimilation system writes reserved literals for values it did not
//! compute. A decoded value is either a real measurement or a tagged missing
//! marker that remembers which literal was seen, so re-encoding is exact.

use serde::{Deserialize, Serialize};

/// Reserved "not computed" literals found in diagnostic files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentinel {
    /// `1.0e9`
    E9,
    /// `1.0e11`
    E11,
    /// `1.0e17`
    E17,
    /// `2.938736e-39` (denormal written for unset inverse errors)
    Tiny,
    /// `NaN`
    NaN,
    /// Column not present in this file's layout.
    Absent,
}

const TINY: f32 = 2.938_736e-39;

impl Sentinel {
    /// Sentinels recognised on decode, in detection order.
    pub const RECOGNISED: [Self; 4] = [Self::E9, Self::E11, Self::E17, Self::Tiny];

    /// Literal written to the file for this sentinel.
    ///
    /// `Absent` has no literal; it encodes as `0.0` and is never emitted for
    /// columns the layout actually carries.
    #[must_use]
    pub const fn literal(self) -> f32 {
        match self {
            Self::E9 => 1.0e9,
            Self::E11 => 1.0e11,
            Self::E17 => 1.0e17,
            Self::Tiny => TINY,
            Self::NaN => f32::NAN,
            Self::Absent => 0.0,
        }
    }

    /// Detect a sentinel in a raw file value.
    #[must_use]
    pub fn detect(raw: f32) -> Option<Self> {
        if raw.is_nan() {
            return Some(Self::NaN);
        }
        Self::RECOGNISED.into_iter().find(|s| {
            let lit = f64::from(s.literal());
            (f64::from(raw) - lit).abs() <= lit.abs() * 1e-5
        })
    }
}

/// One decoded field value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Reading {
    /// A real measurement or flag value
    Value(f64),
    /// Field not computed upstream
    Missing(Sentinel),
}

impl Reading {
    /// Classify a raw real from the file.
    #[must_use]
    pub fn from_raw(raw: f32) -> Self {
        Sentinel::detect(raw).map_or(Self::Value(f64::from(raw)), Self::Missing)
    }

    /// Classify a raw integer from the file (channel table entries).
    #[must_use]
    pub fn from_int(raw: i32) -> Self {
        Self::Value(f64::from(raw))
    }

    /// The numeric value, `None` when missing.
    #[must_use]
    pub const fn value(self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(v),
            Self::Missing(_) => None,
        }
    }

    /// Whether the reading is a missing marker.
    #[must_use]
    pub const fn is_missing(self) -> bool {
        matches!(self, Self::Missing(_))
    }

    /// Raw real to write back to the file.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn to_raw(self) -> f32 {
        match self {
            Self::Value(v) => v as f32,
            Self::Missing(s) => s.literal(),
        }
    }

    /// Raw integer to write back to the file.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn to_int(self) -> i32 {
        match self {
            Self::Value(v) => v.round() as i32,
            Self::Missing(_) => 0,
        }
    }
}

impl From<f64> for Reading {
    fn from(v: f64) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        Self::from_raw(v as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_every_sentinel() {
        assert_eq!(Sentinel::detect(1.0e9), Some(Sentinel::E9));
        assert_eq!(Sentinel::detect(1.0e11), Some(Sentinel::E11));
        assert_eq!(Sentinel::detect(1.0e17), Some(Sentinel::E17));
        assert_eq!(Sentinel::detect(2.938_736e-39), Some(Sentinel::Tiny));
        assert_eq!(Sentinel::detect(f32::NAN), Some(Sentinel::NaN));
    }

    #[test]
    fn test_ordinary_values_are_not_sentinels() {
        for v in [0.0_f32, -1.0, 1.0e8, 273.15, 1.0e-30, -1.0e11] {
            assert_eq!(Sentinel::detect(v), None, "{v} flagged as sentinel");
        }
    }

    #[test]
    fn test_missing_reading_has_no_value() {
        let r = Reading::from_raw(1.0e11);
        assert!(r.is_missing());
        assert_eq!(r.value(), None);
        assert_eq!(r.to_raw().to_bits(), 1.0e11_f32.to_bits());
    }

    #[test]
    fn test_tiny_sentinel_survives_reencode() {
        let r = Reading::from_raw(2.938_736e-39);
        assert_eq!(Reading::from_raw(r.to_raw()), r);
    }
}
