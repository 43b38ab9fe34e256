//! OCR results and engine capability declarations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Axis-aligned bounding box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub w: f64,
    /// Height.
    pub h: f64,
}

impl BBox {
    /// Vertical center, used to cluster OCR lines into rows by baseline.
    #[must_use]
    pub fn baseline_y(&self) -> f64 {
        self.y + self.h
    }
}

/// A single recognised line of text with its location and confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OCRLine {
    /// Recognised text.
    pub text: String,
    /// Bounding box in source pixel coordinates.
    pub bbox: BBox,
    /// Per-line confidence in `[0, 1]`.
    pub confidence: f64,
}

/// One OCR attempt against a single artifact by a single engine.
///
/// Append-only: multiple results per artifact are allowed (re-try with a
/// stronger engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OCRResult {
    /// Artifact this result was produced from.
    pub artifact_id: Uuid,
    /// Engine that produced this result (or `"pdf-text"` for the embedded
    /// text path).
    pub engine_id: String,
    /// Full recognised text, lines joined by newline in reading order.
    pub text: String,
    /// Mean confidence across all lines, in `[0, 1]`.
    pub mean_confidence: f64,
    /// Ordered line records.
    pub lines: Vec<OCRLine>,
    /// Total word count.
    pub word_count: u32,
    /// Wall-clock runtime of the OCR call.
    pub runtime_ms: u64,
    /// When this result was produced.
    pub finished_at: DateTime<Utc>,
}

impl OCRResult {
    /// Engine id used for the embedded-PDF-text fast path (§4.5).
    pub const PDF_TEXT_ENGINE_ID: &'static str = "pdf-text";

    /// Whether this result came from the embedded-text path rather than OCR.
    #[must_use]
    pub fn is_pdf_text(&self) -> bool {
        self.engine_id == Self::PDF_TEXT_ENGINE_ID
    }
}

/// Capabilities an OCR engine declares at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Stable engine identifier.
    pub engine_id: String,
    /// Coarse accuracy tier; higher is more accurate. Used for ranking.
    pub accuracy_tier: u8,
    /// Peak memory the engine needs to process one page.
    pub memory_envelope_mib: u32,
    /// Typical single-page latency, used to size the invocation timeout.
    pub typical_latency_ms: u32,
    /// Estimated cost per page in USD.
    pub cost_per_page: f64,
    /// Whether this engine can accept rasterised PDF pages.
    pub supports_pdf_raster: bool,
    /// Whether this engine is currently eligible for selection.
    pub enabled: bool,
}
