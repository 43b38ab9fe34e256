//! Multilingual keyword lexicons used by header detection and row
//! filtering (§4.6 steps 2 and 5).

use recv_core::Unit;

/// Header keywords recognised across English, Spanish, and German packing
/// slips, used as a coarse "is this a header row" signal alongside the more
/// specific per-column keyword mapping.
pub(crate) const HEADER_KEYWORDS: &[&str] = &[
    "qty", "quantity", "unit", "uom", "description", "desc", "item", "part", "partno", "part#",
    "sku", "code", "price", "each", "total", "no", "number", "cantidad", "unidad", "descripcion",
    "descripción", "pieza", "precio", "menge", "artikel", "preis",
];

/// Keywords that mark a row as a total/subtotal/tax summary rather than a
/// content line, dropped before the coverage denominator (§4.6 step 5).
pub(crate) const TOTAL_KEYWORDS: &[&str] =
    &["subtotal", "sub-total", "total", "tax", "amount due", "balance due", "shipping", "grand total"];

/// `(substring, inferred unit)` pairs used to infer a unit from free
/// description text when no explicit unit token is present (§4.6 step 3,
/// `<qty><ws><desc>` pattern).
pub(crate) const UNIT_HINT_WORDS: &[(&str, Unit)] = &[
    ("case", Unit::Case),
    ("box", Unit::Box),
    ("piece", Unit::Pcs),
    ("kilogram", Unit::Kg),
    ("pound", Unit::Lb),
    ("gallon", Unit::Gal),
    ("liter", Unit::L),
    ("litre", Unit::L),
    ("meter", Unit::M),
    ("metre", Unit::M),
    ("foot", Unit::Ft),
    ("feet", Unit::Ft),
];
