//! Embedded PDF text path (C5).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::Utc;
use recv_config::OcrConfig;
use recv_core::{BBox, OCRLine, OCRResult};
use recv_error::PipelineError;
use uuid::Uuid;

/// Height, in synthetic pixel units, assigned to each text-layer line so
/// that the row parser's baseline-clustering bandwidth still groups lines
/// the same way it would for a rasterised-and-OCR'd page.
const SYNTHETIC_LINE_HEIGHT: f64 = 20.0;

/// The engine id recorded on an [`OCRResult`] produced by this path.
pub const PDF_TEXT_ENGINE_ID: &str = "pdf-text";

/// Extracts per-page embedded text from a PDF's raw bytes.
///
/// The concrete PDF parser is outside this workspace, exactly like
/// [`recv_core::BlobStore`] or [`recv_core::OCREngine`]: this crate owns the
/// qualification and synthesis logic, not byte-level PDF parsing.
#[async_trait]
pub trait PdfPageTextExtractor: Send + Sync {
    /// Return the embedded text of each page, in page order. An empty
    /// string for a page means no text layer (e.g. a scanned image page).
    async fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, PipelineError>;
}

/// Count of non-whitespace characters in `text`.
fn non_whitespace_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Whether `text` contains at least one line-item-style token: a digit
/// sequence immediately followed by a unit word, or a digit-letter part-code
/// pattern (letters and digits separated by `-`/`_` with at least one of
/// each).
fn has_line_item_token(text: &str) -> bool {
    const UNIT_WORDS: &[&str] = &["ea", "each", "box", "case", "pcs", "kg", "g", "lb", "m", "ft", "gal", "l"];

    for token in text.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_alphanumeric());
        if token.is_empty() {
            continue;
        }
        let digits: String = token.chars().take_while(char::is_ascii_digit).collect();
        if !digits.is_empty() {
            let rest = &token[digits.len()..];
            if UNIT_WORDS.contains(&rest.to_lowercase().as_str()) {
                return true;
            }
        }
        if looks_like_part_code(token) {
            return true;
        }
    }
    false
}

/// A part-code-shaped token: contains both a digit and an uppercase letter.
fn looks_like_part_code(token: &str) -> bool {
    token.len() >= 4
        && token.chars().any(|c| c.is_ascii_digit())
        && token.chars().any(|c| c.is_ascii_alphabetic())
}

/// Whether `page_text` qualifies for the embedded-text fast path.
#[must_use]
pub fn page_qualifies(page_text: &str, config: &OcrConfig) -> bool {
    non_whitespace_len(page_text) >= config.pdf_text_min_chars && has_line_item_token(page_text)
}

/// Synthesize an [`OCRResult`] from qualifying pages' embedded text.
fn synthesize_result(artifact_id: Uuid, pages: &[String]) -> OCRResult {
    let mut lines = Vec::new();
    let mut idx: f64 = 0.0;
    for page in pages {
        for raw_line in page.lines() {
            let trimmed = raw_line.trim();
            if trimmed.is_empty() {
                continue;
            }
            lines.push(OCRLine {
                text: trimmed.to_string(),
                bbox: BBox { x: 0.0, y: idx * SYNTHETIC_LINE_HEIGHT, w: 0.0, h: SYNTHETIC_LINE_HEIGHT },
                confidence: 1.0,
            });
            idx += 1.0;
        }
    }
    let text = lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n");
    let word_count = text.split_whitespace().count() as u32;

    OCRResult {
        artifact_id,
        engine_id: PDF_TEXT_ENGINE_ID.to_string(),
        text,
        mean_confidence: 1.0,
        lines,
        word_count,
        runtime_ms: 0,
        finished_at: Utc::now(),
    }
}

/// Attempt the embedded-text fast path for `bytes`.
///
/// Returns `Ok(Some(result))` if at least one page qualifies (§4.5): the
/// caller should use this result directly instead of invoking the OCR
/// registry. Returns `Ok(None)` if no page qualifies, meaning the caller
/// should rasterise and fall through to `recv-ocr`.
///
/// # Errors
///
/// Propagates any error from the underlying [`PdfPageTextExtractor`].
pub async fn try_embedded_text(
    extractor: &dyn PdfPageTextExtractor,
    artifact_id: Uuid,
    bytes: &[u8],
    config: &OcrConfig,
) -> Result<Option<OCRResult>, PipelineError> {
    let pages = extractor.extract_pages(bytes).await?;
    if pages.iter().any(|p| page_qualifies(p, config)) {
        Ok(Some(synthesize_result(artifact_id, &pages)))
    } else {
        Ok(None)
    }
}
