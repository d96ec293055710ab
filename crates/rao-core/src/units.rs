//! Physical units used by monitored elements and remedial actions.
//!
//! Thresholds, reference flows and setpoints are plain `f64` values inside the
//! optimizer, tagged with a [`Unit`] wherever the value leaves or enters the data
//! model. The newtype wrappers below exist for the few places where mixing
//! quantities would be a silent bug (flow conversions, tap angles).
//!
//! # Usage
//!
//! ```
//! use rao_core::units::{Amperes, Kilovolts, Megawatts};
//!
//! let imax = Amperes(1000.0);
//! let p = imax.to_megawatts(Kilovolts(400.0));
//! assert!((p.value() - 692.82).abs() < 1e-2);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Macro to implement common arithmetic operations for unit types
macro_rules! impl_unit_ops {
    ($type:ty, $unit_name:literal) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $type {
            type Output = Self;
            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl fmt::Display for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:.2} {}", self.0, $unit_name)
            }
        }

        impl $type {
            /// Create a new value
            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            /// Get the raw numeric value
            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }

            /// Absolute value
            #[inline]
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }
        }
    };
}

/// Active power in MW.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Megawatts(pub f64);
impl_unit_ops!(Megawatts, "MW");

/// Current in A.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Amperes(pub f64);
impl_unit_ops!(Amperes, "A");

/// Voltage magnitude in kV.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Kilovolts(pub f64);
impl_unit_ops!(Kilovolts, "kV");

/// Angle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Degrees(pub f64);
impl_unit_ops!(Degrees, "°");

impl Amperes {
    /// Convert a current to the active power carried at unit power factor
    /// on a three-phase element: `P = sqrt(3) * U * I / 1000`.
    pub fn to_megawatts(self, nominal_voltage: Kilovolts) -> Megawatts {
        Megawatts(self.0 * nominal_voltage.0 * 3f64.sqrt() / 1000.0)
    }
}

impl Megawatts {
    /// Inverse of [`Amperes::to_megawatts`].
    pub fn to_amperes(self, nominal_voltage: Kilovolts) -> Amperes {
        Amperes(self.0 * 1000.0 / (nominal_voltage.0 * 3f64.sqrt()))
    }
}

/// Unit tag attached to thresholds, margins and reported values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Megawatt,
    Ampere,
    /// Percentage of the element's permanent admissible current.
    PercentImax,
    Kilovolt,
    Degree,
    /// PST tap position (dimensionless)
    Tap,
}

impl Unit {
    /// Whether values in this unit describe a branch flow.
    pub fn is_flow(&self) -> bool {
        matches!(self, Unit::Megawatt | Unit::Ampere | Unit::PercentImax)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Unit::Megawatt => "MW",
            Unit::Ampere => "A",
            Unit::PercentImax => "%Imax",
            Unit::Kilovolt => "kV",
            Unit::Degree => "°",
            Unit::Tap => "tap",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mw" | "megawatt" => Ok(Unit::Megawatt),
            "a" | "ampere" => Ok(Unit::Ampere),
            "%imax" | "percent_imax" => Ok(Unit::PercentImax),
            "kv" | "kilovolt" => Ok(Unit::Kilovolt),
            "deg" | "degree" => Ok(Unit::Degree),
            "tap" => Ok(Unit::Tap),
            other => Err(format!("Unknown unit: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ampere_megawatt_roundtrip() {
        let u = Kilovolts(225.0);
        let i = Amperes(1500.0);
        let p = i.to_megawatts(u);
        assert!((p.to_amperes(u).value() - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_unit_arithmetic() {
        let a = Megawatts(100.0) + Megawatts(20.0) - Megawatts(10.0);
        assert_eq!(a, Megawatts(110.0));
        assert_eq!(-a, Megawatts(-110.0));
        assert_eq!((a * 2.0).value(), 220.0);
    }

    #[test]
    fn test_unit_display() {
        assert_eq!(format!("{}", Megawatts(12.345)), "12.35 MW");
        assert_eq!(Unit::PercentImax.to_string(), "%Imax");
    }

    #[test]
    fn test_unit_from_str() {
        assert_eq!("MW".parse::<Unit>().unwrap(), Unit::Megawatt);
        assert_eq!("kv".parse::<Unit>().unwrap(), Unit::Kilovolt);
        assert!("furlong".parse::<Unit>().is_err());
        assert!(Unit::Ampere.is_flow());
        assert!(!Unit::Degree.is_flow());
    }
}
