//! Deterministic row parser (C6).
//!
//! Turns an [`OCRResult`] into a [`ParseResult`]: a set of [`ParsedLine`]s
//! plus the `coverage` and `structure_conf` scores the cost-budget planner
//! (`recv-budget`) reads to decide whether an LLM call is warranted. Pure
//! and deterministic given its inputs and the pattern bank, which is
//! versioned (`recv_config::ParserConfig::pattern_bank_version`) and
//! recorded on every produced line for repeatability.
//!
//! [`recv_core::OCRLine`] carries one bounding box per recognised line, not
//! per word, so "column-geometry" alignment (§4.6 step 3) is approximated
//! here with each content row's *character offsets*, measured against the
//! header row's token start offsets, rather than true pixel geometry. This
//! is a deliberate simplification of the line-level OCR contract, not a
//! guess at missing behaviour — see `DESIGN.md`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use recv_config::ParserConfig;
use recv_core::{OCRLine, OCRResult, Qty, Unit};

mod lexicon;

use lexicon::{HEADER_KEYWORDS, TOTAL_KEYWORDS, UNIT_HINT_WORDS};

/// How a [`ParsedLine`]'s fields were determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOrigin {
    /// Fields came from aligning the row's tokens against header-derived
    /// column anchors.
    AnchorAligned,
    /// Fields came from one of the ordered regex-free token patterns.
    PatternFallback,
}

/// A single parsed candidate line item.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// Parsed quantity.
    pub qty: Qty,
    /// Normalised unit, or `None` if no recognised synonym matched.
    pub unit: Option<Unit>,
    /// Free-text description.
    pub description: String,
    /// Candidate part code, if a part-code-shaped token was found.
    pub part_code: Option<String>,
    /// Index of the source row within the clustered row list.
    pub raw_source_idx: usize,
    /// Confidence in this row's interpretation, in `[0, 1]`.
    pub parse_confidence: f64,
    /// How this row's fields were determined.
    pub origin: MatchOrigin,
}

/// Output of parsing one [`OCRResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    /// Parsed line items, in row order.
    pub lines: Vec<ParsedLine>,
    /// `rows_parsed / rows_content`, in `[0, 1]`.
    pub coverage: f64,
    /// Fraction of parsed rows that were anchor-aligned rather than
    /// pattern-fallback, in `[0, 1]`.
    pub structure_conf: f64,
    /// Pattern-bank version this result was produced with.
    pub pattern_bank_version: String,
}

// ---------------------------------------------------------------------------
// Row grouping
// ---------------------------------------------------------------------------

/// One clustered row: the OCR lines whose baselines fell in the same band,
/// concatenated in left-to-right (original) order.
#[derive(Debug, Clone)]
struct Row {
    text: String,
    source_indices: Vec<usize>,
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Cluster `lines` into rows by baseline y-coordinate, using a bandwidth
/// equal to the median line height (§4.6 step 1).
fn group_rows(lines: &[OCRLine]) -> Vec<Row> {
    if lines.is_empty() {
        return Vec::new();
    }
    let bandwidth = median(lines.iter().map(|l| l.bbox.h).collect()).max(1.0);

    let mut ordered: Vec<(usize, &OCRLine)> = lines.iter().enumerate().collect();
    ordered.sort_by(|(_, a), (_, b)| {
        a.bbox.baseline_y().partial_cmp(&b.bbox.baseline_y()).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut rows: Vec<Row> = Vec::new();
    let mut current_baseline = f64::NEG_INFINITY;
    for (idx, line) in ordered {
        let baseline = line.bbox.baseline_y();
        if rows.is_empty() || (baseline - current_baseline).abs() > bandwidth {
            rows.push(Row { text: line.text.clone(), source_indices: vec![idx] });
            current_baseline = baseline;
        } else {
            let row = rows.last_mut().expect("just checked non-empty");
            row.text.push(' ');
            row.text.push_str(&line.text);
            row.source_indices.push(idx);
            current_baseline = baseline;
        }
    }
    rows
}

// ---------------------------------------------------------------------------
// Header detection and column anchors
// ---------------------------------------------------------------------------

/// A column anchor: the character offset a header keyword started at.
#[derive(Debug, Clone, Copy)]
struct ColumnAnchor {
    kind: AnchorKind,
    offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnchorKind {
    Qty,
    Unit,
    Desc,
    Part,
    Price,
}

fn classify_header_keyword(word: &str) -> Option<AnchorKind> {
    let w = word.to_ascii_lowercase();
    match w.as_str() {
        "qty" | "quantity" | "cantidad" | "menge" => Some(AnchorKind::Qty),
        "unit" | "uom" | "unidad" => Some(AnchorKind::Unit),
        "description" | "desc" | "item" | "descripcion" | "descripción" | "artikel" => {
            Some(AnchorKind::Desc)
        }
        "part" | "partno" | "part#" | "sku" | "code" | "pieza" => Some(AnchorKind::Part),
        "price" | "each" | "total" | "precio" | "preis" => Some(AnchorKind::Price),
        _ => None,
    }
}

/// Find the header row among `rows` (the first with >= 2 recognised header
/// keywords), returning its index and derived column anchors.
fn detect_header(rows: &[Row]) -> Option<(usize, Vec<ColumnAnchor>)> {
    for (idx, row) in rows.iter().enumerate() {
        let mut anchors = Vec::new();
        let mut offset = 0usize;
        for word in row.text.split_whitespace() {
            if classify_header_keyword(word).is_some() || HEADER_KEYWORDS.contains(&word.to_ascii_lowercase().as_str())
            {
                if let Some(kind) = classify_header_keyword(word) {
                    anchors.push(ColumnAnchor { kind, offset });
                }
            }
            offset += word.len() + 1;
        }
        if anchors.len() >= 2 {
            return Some((idx, anchors));
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Row classification (filtering)
// ---------------------------------------------------------------------------

fn is_purely_non_alphanumeric(text: &str) -> bool {
    !text.chars().any(|c| c.is_alphanumeric())
}

fn looks_like_page_number(text: &str) -> bool {
    let lower = text.trim().to_ascii_lowercase();
    lower.starts_with("page ") || (lower.contains("page") && lower.chars().any(|c| c.is_ascii_digit()))
}

fn looks_like_total_row(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    TOTAL_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Whether `row` counts toward the coverage denominator: not the header, not
/// a page number, not a total/subtotal/tax row, and not purely
/// non-alphanumeric (§4.6 step 4-5).
fn is_content_row(row: &Row, header_idx: Option<usize>, idx: usize) -> bool {
    if Some(idx) == header_idx {
        return false;
    }
    if is_purely_non_alphanumeric(&row.text) {
        return false;
    }
    if looks_like_page_number(&row.text) {
        return false;
    }
    if looks_like_total_row(&row.text) {
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// Qty / part-code token recognition
// ---------------------------------------------------------------------------

/// Parse a leading quantity token: a whole number or an `n/d` fraction.
fn parse_qty_token(token: &str) -> Option<Qty> {
    if let Some((num_s, den_s)) = token.split_once('/') {
        let num: i64 = num_s.parse().ok()?;
        let den: i64 = den_s.parse().ok()?;
        if den == 0 {
            return None;
        }
        let q = Qty::new(num, den);
        return q.is_positive().then_some(q);
    }
    let n: i64 = token.parse().ok()?;
    let q = Qty::whole(n);
    q.is_positive().then_some(q)
}

/// A part-code-shaped token: contains both a digit and an uppercase letter,
/// at least 4 characters.
fn looks_like_part_code(token: &str) -> bool {
    let cleaned = token.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
    cleaned.len() >= 4
        && cleaned.chars().any(|c| c.is_ascii_digit())
        && cleaned.chars().any(|c| c.is_ascii_uppercase())
}

fn infer_unit_from_description(description: &str) -> Option<Unit> {
    let lower = description.to_ascii_lowercase();
    UNIT_HINT_WORDS
        .iter()
        .find(|(word, _)| lower.contains(*word))
        .map(|(_, unit)| *unit)
}

// ---------------------------------------------------------------------------
// Pattern bank
// ---------------------------------------------------------------------------

/// Attempt `<qty><ws><unit><ws><desc><ws><part>`.
fn try_pattern_qty_unit_desc_part(tokens: &[&str]) -> Option<(Qty, Option<Unit>, String, Option<String>, f64)> {
    if tokens.len() < 3 {
        return None;
    }
    let qty = parse_qty_token(tokens[0])?;
    let unit = Unit::parse(tokens[1]);
    unit?;
    // The part code can land anywhere among the post-unit tokens (e.g. right
    // after the unit, as in "12 ea MTU-OF-4568 MTU Oil Filter"), not only at
    // the end, so scan left to right for the first code-shaped token rather
    // than assuming it trails the description.
    let rest = &tokens[2..];
    let code_idx = rest.iter().position(|t| looks_like_part_code(t));
    let (part_code, desc_tokens): (Option<String>, Vec<&str>) = match code_idx {
        Some(idx) => (
            Some(rest[idx].trim_matches(|c: char| !c.is_alphanumeric() && c != '-').to_string()),
            rest.iter().enumerate().filter(|(i, _)| *i != idx).map(|(_, t)| *t).collect(),
        ),
        None => (None, rest.to_vec()),
    };
    if desc_tokens.is_empty() {
        return None;
    }
    let description = desc_tokens.join(" ");
    let confidence = if part_code.is_some() { 0.95 } else { 0.85 };
    Some((qty, unit, description, part_code, confidence))
}

/// Attempt `<part><sep><desc><paren><qty><ws><unit><endparen>`, e.g.
/// `MTU-OF-4568 - MTU Oil Filter (12 ea)`.
fn try_pattern_part_desc_paren_qty(text: &str) -> Option<(Qty, Option<Unit>, String, Option<String>, f64)> {
    let open = text.find('(')?;
    let close = text[open..].find(')').map(|i| i + open)?;
    let inner = text[open + 1..close].trim();
    let mut inner_tokens = inner.split_whitespace();
    let qty = parse_qty_token(inner_tokens.next()?)?;
    let unit = inner_tokens.next().and_then(Unit::parse);

    let head = text[..open].trim();
    let head = head.trim_end_matches(['-', ':']).trim();
    let mut head_tokens = head.split_whitespace();
    let first = head_tokens.next()?;
    if !looks_like_part_code(first) {
        return None;
    }
    let part_code = first.trim_matches(|c: char| !c.is_alphanumeric() && c != '-').to_string();
    let description: String = head_tokens.collect::<Vec<_>>().join(" ");
    if description.is_empty() {
        return None;
    }
    Some((qty, unit, description, Some(part_code), 0.9))
}

/// Attempt `<qty><ws><desc>` with unit inferred from the description lexicon.
fn try_pattern_qty_desc(tokens: &[&str]) -> Option<(Qty, Option<Unit>, String, Option<String>, f64)> {
    if tokens.len() < 2 {
        return None;
    }
    let qty = parse_qty_token(tokens[0])?;
    let rest = tokens[1..].join(" ");
    let unit = infer_unit_from_description(&rest);
    let last = tokens[tokens.len() - 1];
    let (part_code, description) = if looks_like_part_code(last) && tokens.len() > 2 {
        (
            Some(last.trim_matches(|c: char| !c.is_alphanumeric() && c != '-').to_string()),
            tokens[1..tokens.len() - 1].join(" "),
        )
    } else {
        (None, rest)
    };
    if description.is_empty() {
        return None;
    }
    Some((qty, unit, description, part_code, 0.6))
}

/// Attempt anchor-aligned tabular parsing using the header's column offsets
/// as a proxy for geometric columns.
fn try_anchor_aligned(row: &Row, anchors: &[ColumnAnchor]) -> Option<(Qty, Option<Unit>, String, Option<String>, f64)> {
    if anchors.is_empty() {
        return None;
    }
    let mut qty_region = None;
    let mut desc_region = None;
    let mut part_region = None;

    let mut offset = 0usize;
    let tokens: Vec<(&str, usize)> = row
        .text
        .split_whitespace()
        .map(|tok| {
            let start = offset;
            offset += tok.len() + 1;
            (tok, start)
        })
        .collect();

    for &(tok, start) in &tokens {
        let nearest = anchors.iter().min_by_key(|a| (a.offset as i64 - start as i64).unsigned_abs())?;
        match nearest.kind {
            AnchorKind::Qty if qty_region.is_none() => qty_region = parse_qty_token(tok),
            AnchorKind::Part if part_region.is_none() && looks_like_part_code(tok) => {
                part_region = Some(tok.trim_matches(|c: char| !c.is_alphanumeric() && c != '-').to_string());
            }
            AnchorKind::Desc => {
                desc_region.get_or_insert_with(String::new).push_str(tok);
                desc_region.as_mut().unwrap().push(' ');
            }
            _ => {}
        }
    }

    let qty = qty_region?;
    let description = desc_region?.trim().to_string();
    if description.is_empty() {
        return None;
    }
    let unit = infer_unit_from_description(&description);
    Some((qty, unit, description, part_region, 0.8))
}

/// Try every pattern against `row` and keep the highest-scoring
/// interpretation, preferring anchor alignment when it succeeds (§4.6 step 3).
fn parse_row(row: &Row, header_anchors: Option<&[ColumnAnchor]>) -> Option<(Qty, Option<Unit>, String, Option<String>, f64, MatchOrigin)> {
    if let Some(anchors) = header_anchors
        && let Some((qty, unit, desc, part, conf)) = try_anchor_aligned(row, anchors)
    {
        return Some((qty, unit, desc, part, conf, MatchOrigin::AnchorAligned));
    }

    let tokens: Vec<&str> = row.text.split_whitespace().collect();

    if let Some(result) = try_pattern_qty_unit_desc_part(&tokens) {
        return Some((result.0, result.1, result.2, result.3, result.4, MatchOrigin::PatternFallback));
    }
    if let Some(result) = try_pattern_part_desc_paren_qty(&row.text) {
        return Some((result.0, result.1, result.2, result.3, result.4, MatchOrigin::PatternFallback));
    }
    if let Some(result) = try_pattern_qty_desc(&tokens) {
        return Some((result.0, result.1, result.2, result.3, result.4, MatchOrigin::PatternFallback));
    }
    None
}

// ---------------------------------------------------------------------------
// Top-level entry point
// ---------------------------------------------------------------------------

/// Parse `ocr` into a [`ParseResult`] per the row-parser algorithm (§4.6).
#[must_use]
pub fn parse(ocr: &OCRResult, config: &ParserConfig) -> ParseResult {
    let rows = group_rows(&ocr.lines);
    let header = detect_header(&rows);
    let header_idx = header.as_ref().map(|(idx, _)| *idx);
    let anchors = header.as_ref().map(|(_, a)| a.as_slice());

    let mut lines = Vec::new();
    let mut rows_content = 0usize;

    for (idx, row) in rows.iter().enumerate() {
        if !is_content_row(row, header_idx, idx) {
            continue;
        }
        rows_content += 1;

        if let Some((qty, unit, description, part_code, parse_confidence, origin)) = parse_row(row, anchors) {
            lines.push(ParsedLine {
                qty,
                unit,
                description,
                part_code,
                raw_source_idx: row.source_indices[0],
                parse_confidence,
                origin,
            });
        }
    }

    let coverage = if rows_content == 0 { 0.0 } else { lines.len() as f64 / rows_content as f64 };
    let structure_conf = if lines.is_empty() {
        0.0
    } else {
        lines.iter().filter(|l| l.origin == MatchOrigin::AnchorAligned).count() as f64 / lines.len() as f64
    };

    ParseResult {
        lines,
        coverage,
        structure_conf,
        pattern_bank_version: config.pattern_bank_version.clone(),
    }
}
