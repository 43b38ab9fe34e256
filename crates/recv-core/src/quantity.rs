//! Parsed quantities and the closed set of recognised units.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed rational quantity (e.g. `"1/2"` cases, `12` each).
///
/// Kept as an exact `numerator/denominator` pair rather than a float so that
/// downstream inventory increments are exact and reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qty {
    /// Numerator.
    pub num: i64,
    /// Denominator; always `> 0`.
    pub den: i64,
}

impl Qty {
    /// Construct a whole-number quantity.
    #[must_use]
    pub fn whole(n: i64) -> Self {
        Self { num: n, den: 1 }
    }

    /// Construct and reduce a rational quantity. Panics if `den == 0`.
    #[must_use]
    pub fn new(num: i64, den: i64) -> Self {
        assert!(den != 0, "Qty denominator must be non-zero");
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1);
        Self {
            num: num / g as i64,
            den: den / g as i64,
        }
    }

    /// Whether this quantity is strictly positive (the `qty > 0` invariant).
    #[must_use]
    pub fn is_positive(&self) -> bool {
        (self.num > 0) == (self.den > 0) && self.num != 0
    }

    /// Lossy floating-point view, for scoring/heuristics only — never for
    /// inventory math.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Closed set of normalised units of measure.
///
/// A unit string that does not map onto any of these is represented as
/// `None` at the call site (the `unit?` of the row-parser output), never as
/// a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// Individual units.
    Each,
    /// Box.
    Box,
    /// Case.
    Case,
    /// Pieces (synonym bucket for "each"-like counts that use "pcs").
    Pcs,
    /// Kilograms.
    Kg,
    /// Grams.
    G,
    /// Pounds.
    Lb,
    /// Meters.
    M,
    /// Feet.
    Ft,
    /// Gallons.
    Gal,
    /// Liters.
    L,
}

impl Unit {
    /// Parse a free-text unit token (case-insensitive) into a closed [`Unit`],
    /// or `None` if it does not match any recognised synonym.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let t = token.trim().to_ascii_lowercase();
        Some(match t.as_str() {
            "ea" | "each" | "unit" | "units" => Unit::Each,
            "box" | "boxes" | "bx" => Unit::Box,
            "case" | "cs" | "cases" => Unit::Case,
            "pcs" | "pc" | "piece" | "pieces" => Unit::Pcs,
            "kg" | "kgs" | "kilogram" | "kilograms" => Unit::Kg,
            "g" | "gram" | "grams" => Unit::G,
            "lb" | "lbs" | "pound" | "pounds" => Unit::Lb,
            "m" | "meter" | "meters" | "metre" | "metres" => Unit::M,
            "ft" | "feet" | "foot" => Unit::Ft,
            "gal" | "gallon" | "gallons" => Unit::Gal,
            "l" | "lt" | "liter" | "liters" | "litre" | "litres" => Unit::L,
            _ => return None,
        })
    }

    /// Canonical lowercase wire token for this unit.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Each => "each",
            Unit::Box => "box",
            Unit::Case => "case",
            Unit::Pcs => "pcs",
            Unit::Kg => "kg",
            Unit::G => "g",
            Unit::Lb => "lb",
            Unit::M => "m",
            Unit::Ft => "ft",
            Unit::Gal => "gal",
            Unit::L => "l",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
