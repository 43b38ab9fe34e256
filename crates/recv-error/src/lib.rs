//! Unified error taxonomy with stable error codes for the receiving pipeline.
//!
//! Every [`PipelineError`] carries an [`ErrorCode`] (a machine-readable,
//! stable string tag), a human-readable message, an optional cause chain,
//! and arbitrary key-value context. The closed set of codes mirrors the
//! error table of the receiving pipeline: each failure path surfaces
//! exactly one.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Admission-gate rejections (mime, size, decode, dimensions, quality).
    Admission,
    /// Per-tenant rate/quota errors.
    Quota,
    /// Content-addressed deduplication outcomes.
    Dedup,
    /// OCR engine invocation failures.
    Ocr,
    /// LLM normalisation failures.
    Normalisation,
    /// Cost/attempt budget errors.
    Budget,
    /// Auth/authorization errors.
    Auth,
    /// Session state machine violations.
    Session,
    /// Commit-engine errors.
    Commit,
    /// Transient errors safe to retry.
    Transient,
    /// Orchestrator admission back-pressure (bounded per-tenant work queue).
    Backpressure,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Admission => "admission",
            Self::Quota => "quota",
            Self::Dedup => "dedup",
            Self::Ocr => "ocr",
            Self::Normalisation => "normalisation",
            Self::Budget => "budget",
            Self::Auth => "auth",
            Self::Session => "session",
            Self::Commit => "commit",
            Self::Transient => "transient",
            Self::Backpressure => "backpressure",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases. One-to-one with the
/// closed set of error kinds the receiving pipeline can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Admission --
    /// Mime/format not in the kind-specific allow-list.
    UnsupportedMime,
    /// Byte length exceeds the configured maximum.
    TooLarge,
    /// Decode probe failed or magic number mismatched the declared mime.
    DecodeFailed,
    /// Image dimensions fall below the configured floor.
    TooSmall,
    /// Quality score fell below the admission threshold.
    LowQuality,

    // -- Quota --
    /// Per-tenant rolling-window upload quota exceeded.
    QuotaExceeded,

    // -- Dedup --
    /// Upload matches an existing, non-deleted artifact for this tenant.
    Duplicate,

    // -- OCR --
    /// All engines exhausted or below the confidence floor with no useful text.
    OcrFailed,

    // -- Normalisation --
    /// LLM output failed schema validation.
    NormalisationFailed,

    // -- Budget --
    /// Session cost/attempt budget exhausted; partial result kept for review.
    BudgetExhausted,

    // -- Auth --
    /// `AuthContext` missing or malformed.
    Unauthorised,
    /// Actor lacks the capability required for a state transition.
    Forbidden,

    // -- Session --
    /// Requested operation is invalid for the session's current state.
    SessionStateViolation,
    /// Session was already committed; idempotent retry returns the existing event.
    AlreadyCommitted,

    // -- Commit --
    /// Guarded stock decrement would have gone negative.
    InsufficientStock,

    // -- Transient --
    /// Serialisation failure; safe to retry the transaction.
    Conflict,

    // -- Backpressure --
    /// Per-tenant bounded work queue is full; the caller, not the orchestrator, owns retry policy.
    QueueFull,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedMime | Self::TooLarge | Self::DecodeFailed | Self::TooSmall
            | Self::LowQuality => ErrorCategory::Admission,
            Self::QuotaExceeded => ErrorCategory::Quota,
            Self::Duplicate => ErrorCategory::Dedup,
            Self::OcrFailed => ErrorCategory::Ocr,
            Self::NormalisationFailed => ErrorCategory::Normalisation,
            Self::BudgetExhausted => ErrorCategory::Budget,
            Self::Unauthorised | Self::Forbidden => ErrorCategory::Auth,
            Self::SessionStateViolation | Self::AlreadyCommitted => ErrorCategory::Session,
            Self::InsufficientStock => ErrorCategory::Commit,
            Self::Conflict => ErrorCategory::Transient,
            Self::QueueFull => ErrorCategory::Backpressure,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g. `"TOO_LARGE"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedMime => "UNSUPPORTED_MIME",
            Self::TooLarge => "TOO_LARGE",
            Self::DecodeFailed => "DECODE_FAILED",
            Self::TooSmall => "TOO_SMALL",
            Self::LowQuality => "LOW_QUALITY",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::Duplicate => "DUPLICATE",
            Self::OcrFailed => "OCR_FAILED",
            Self::NormalisationFailed => "NORMALISATION_FAILED",
            Self::BudgetExhausted => "BUDGET_EXHAUSTED",
            Self::Unauthorised => "UNAUTHORISED",
            Self::Forbidden => "FORBIDDEN",
            Self::SessionStateViolation => "SESSION_STATE_VIOLATION",
            Self::AlreadyCommitted => "ALREADY_COMMITTED",
            Self::InsufficientStock => "INSUFFICIENT_STOCK",
            Self::Conflict => "CONFLICT",
            Self::QueueFull => "QUEUE_FULL",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether a caller may usefully retry the operation that produced this
    /// code (possibly after waiting, re-capturing, or backing off).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedMime
                | Self::TooLarge
                | Self::DecodeFailed
                | Self::TooSmall
                | Self::LowQuality
                | Self::QuotaExceeded
                | Self::OcrFailed
                | Self::Conflict
                | Self::QueueFull
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Unified pipeline error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context (e.g.
/// the sub-scores behind a [`ErrorCode::LowQuality`], or the
/// `retry_after_secs` for a [`ErrorCode::QuotaExceeded`]).
///
/// # Examples
///
/// ```
/// use recv_error::{PipelineError, ErrorCode};
///
/// let err = PipelineError::new(ErrorCode::QuotaExceeded, "50 uploads in the last hour")
///     .with_context("retry_after_secs", 120);
/// assert_eq!(err.code.as_str(), "QUOTA_EXCEEDED");
/// ```
pub struct PipelineError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl PipelineError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("PipelineError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Serialisable snapshot of a [`PipelineError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&PipelineError> for PipelineErrorDto {
    fn from(err: &PipelineError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<PipelineErrorDto> for PipelineError {
    fn from(dto: PipelineErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}
