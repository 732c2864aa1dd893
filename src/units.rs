//! Unit conversion for physical quantities at the system edges.
//!
//! Scan geometry arrives in whatever unit a driver or config file declares
//! (`nm`, `um`, `mV`, ...). Conversion is explicit: an unknown unit string is
//! an error, and converting across dimensions (say `nm` to `ms`) is an error.
//! Nothing in the core assumes a unit silently.

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Length,
    Time,
    Voltage,
    Current,
    Frequency,
    Angle,
}

impl Dimension {
    fn base_symbol(self) -> &'static str {
        match self {
            Dimension::Length => "m",
            Dimension::Time => "s",
            Dimension::Voltage => "V",
            Dimension::Current => "A",
            Dimension::Frequency => "Hz",
            Dimension::Angle => "rad",
        }
    }
}

/// A parsed unit: dimension plus scale factor relative to the base unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unit {
    pub dimension: Dimension,
    pub factor: f64,
}

const BASES: [(&str, Dimension); 6] = [
    ("m", Dimension::Length),
    ("s", Dimension::Time),
    ("V", Dimension::Voltage),
    ("A", Dimension::Current),
    ("Hz", Dimension::Frequency),
    ("rad", Dimension::Angle),
];

const PREFIXES: [(&str, f64); 9] = [
    ("p", 1e-12),
    ("n", 1e-9),
    ("u", 1e-6),
    ("\u{b5}", 1e-6), // micro sign
    ("m", 1e-3),
    ("c", 1e-2),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
];

/// Parse a unit string such as `nm`, `um`, `mV`, `kHz` or a bare base unit.
pub fn parse(unit: &str) -> Result<Unit> {
    let unit = unit.trim();
    if unit.is_empty() {
        return Err(Error::UndefinedUnit(String::from("(empty)")));
    }

    // Special-case angstrom, common in SPM geometry.
    if unit == "angstrom" || unit == "\u{212b}" || unit == "\u{c5}" {
        return Ok(Unit { dimension: Dimension::Length, factor: 1e-10 });
    }

    for (base, dimension) in BASES {
        if unit == base {
            return Ok(Unit { dimension, factor: 1.0 });
        }
        if let Some(prefix) = unit.strip_suffix(base) {
            // "m" stripped from "mm" leaves the milli prefix; "ms" leaves "m".
            for (sym, factor) in PREFIXES {
                if prefix == sym {
                    return Ok(Unit { dimension, factor });
                }
            }
        }
    }
    Err(Error::UndefinedUnit(unit.to_string()))
}

/// Convert `value` from `unit` into `desired_unit`.
///
/// Fails with `UndefinedUnit` when either unit string is unknown, and with
/// `Dimensionality` when the units do not share a dimension.
pub fn convert(value: f64, unit: &str, desired_unit: &str) -> Result<f64> {
    let from = parse(unit)?;
    let to = parse(desired_unit)?;
    if from.dimension != to.dimension {
        return Err(Error::Dimensionality {
            from: unit.to_string(),
            to: desired_unit.to_string(),
        });
    }
    Ok(value * from.factor / to.factor)
}

/// Conversion factor from `unit` into the dimension's base unit.
pub fn to_base(value: f64, unit: &str) -> Result<(f64, &'static str)> {
    let parsed = parse(unit)?;
    Ok((value * parsed.factor, parsed.dimension.base_symbol()))
}
