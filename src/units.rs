//! Page dimension parsing and named paper sizes.
//!
//! Every length the print driver hands to the browser is expressed in
//! inches. User-facing strings carry an explicit unit suffix: `mm`, `cm` or
//! `in` (for example `"10mm"`, `"2.54cm"`, `"0.5in"`).

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

const MM_PER_INCH: f64 = 25.4;
const CM_PER_INCH: f64 = 2.54;

/// Length units accepted in page geometry strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Millimeter,
    Centimeter,
    Inch,
}

impl Unit {
    fn suffix(self) -> &'static str {
        match self {
            Unit::Millimeter => "mm",
            Unit::Centimeter => "cm",
            Unit::Inch => "in",
        }
    }
}

/// A non-negative length with its unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Length {
    pub value: f64,
    pub unit: Unit,
}

impl Length {
    /// Convert to inches (mm / 25.4, cm / 2.54, in unchanged)
    pub fn to_inches(self) -> f64 {
        match self.unit {
            Unit::Millimeter => self.value / MM_PER_INCH,
            Unit::Centimeter => self.value / CM_PER_INCH,
            Unit::Inch => self.value,
        }
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

impl FromStr for Length {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (number, unit) = [Unit::Millimeter, Unit::Centimeter, Unit::Inch]
            .into_iter()
            .find_map(|unit| trimmed.strip_suffix(unit.suffix()).map(|n| (n, unit)))
            .ok_or_else(|| format!("invalid unit in {:?} (expected mm, cm or in)", s))?;

        let value: f64 = number
            .trim()
            .parse()
            .map_err(|e| format!("invalid number in {:?}: {}", s, e))?;

        if !value.is_finite() {
            return Err(format!("{:?} is not a finite length", s));
        }
        if value < 0.0 {
            return Err(format!("{:?} is negative", s));
        }

        Ok(Length { value, unit })
    }
}

/// Parse a length string and convert it to inches.
///
/// `field` names the option being parsed and is included in the error.
pub fn parse_inches(field: &str, value: &str) -> Result<f64> {
    value
        .parse::<Length>()
        .map(Length::to_inches)
        .map_err(|e| Error::ConfigError(format!("invalid {}: {}", field, e)))
}

/// Named paper sizes understood by `PrintOptions::page_size`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaperSize {
    A3,
    #[default]
    A4,
    A5,
    Letter,
    Legal,
    Tabloid,
}

impl PaperSize {
    /// Case-insensitive lookup; `None` for unknown names
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        [
            PaperSize::A3,
            PaperSize::A4,
            PaperSize::A5,
            PaperSize::Letter,
            PaperSize::Legal,
            PaperSize::Tabloid,
        ]
        .into_iter()
        .find(|size| size.name().eq_ignore_ascii_case(name))
    }

    /// Lookup that falls back to A4 for empty or unknown names
    pub fn from_name_or_default(name: &str) -> Self {
        match Self::from_name(name) {
            Some(size) => size,
            None => {
                if !name.trim().is_empty() {
                    log::debug!("unknown page size {:?}, using A4", name);
                }
                PaperSize::default()
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PaperSize::A3 => "A3",
            PaperSize::A4 => "A4",
            PaperSize::A5 => "A5",
            PaperSize::Letter => "Letter",
            PaperSize::Legal => "Legal",
            PaperSize::Tabloid => "Tabloid",
        }
    }

    /// Portrait (width, height) in inches
    pub fn dimensions(self) -> (f64, f64) {
        match self {
            PaperSize::A3 => (11.69, 16.54),
            PaperSize::A4 => (8.27, 11.69),
            PaperSize::A5 => (5.83, 8.27),
            PaperSize::Letter => (8.5, 11.0),
            PaperSize::Legal => (8.5, 14.0),
            PaperSize::Tabloid => (11.0, 17.0),
        }
    }
}
