//! Configuration loading, validation, and merging for the receiving pipeline.
//!
//! [`PipelineConfig`] collects every tunable called out as a default
//! elsewhere in this workspace: quality-score weights, admission
//! thresholds, OCR timeouts, the parser pattern-bank version, cost caps and
//! model prices, reconciliation boost weights, and session TTL.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors and warnings
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or validating a [`PipelineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },
    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },
    /// Semantic validation failed.
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level configuration issues that do not prevent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A deprecated field was present in the source TOML.
    DeprecatedField {
        /// Name of the deprecated field.
        field: String,
    },
    /// A recommended model price entry is missing, so cost estimation for
    /// that model will fail at call time rather than at load time.
    MissingModelPrice {
        /// Model identifier with no registered price.
        model_id: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeprecatedField { field } => write!(f, "deprecated field '{field}'"),
            Self::MissingModelPrice { model_id } => {
                write!(f, "no price registered for model '{model_id}'")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

/// Weights and saturation points for the content-hash quality heuristic (C1).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct QualityConfig {
    /// Weight applied to the blur sub-score.
    pub blur_weight: f64,
    /// Weight applied to the glare sub-score.
    pub glare_weight: f64,
    /// Weight applied to the contrast sub-score.
    pub contrast_weight: f64,
    /// Laplacian variance at or below which blur scores 0.
    pub blur_floor: f64,
    /// Laplacian variance at or above which blur scores 100.
    pub blur_ceiling: f64,
    /// Glare pixel fraction (0..1) at or above which glare scores 0.
    pub glare_floor_fraction: f64,
    /// Glare pixel fraction (0..1) at or below which glare scores 100.
    pub glare_ceiling_fraction: f64,
    /// Luminance stddev at or below which contrast scores 0.
    pub contrast_floor: f64,
    /// Luminance stddev at or above which contrast scores 100.
    pub contrast_ceiling: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            blur_weight: 0.4,
            glare_weight: 0.3,
            contrast_weight: 0.3,
            blur_floor: 20.0,
            blur_ceiling: 500.0,
            glare_floor_fraction: 0.05,
            glare_ceiling_fraction: 0.005,
            contrast_floor: 10.0,
            contrast_ceiling: 60.0,
        }
    }
}

/// Admission gate thresholds (C2).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum accepted upload size, in bytes.
    pub max_upload_bytes: u64,
    /// Minimum accepted image width, in pixels.
    pub min_width_px: u32,
    /// Minimum accepted image height, in pixels.
    pub min_height_px: u32,
    /// Quality score floor for image kinds (same scale as [`QualityConfig`] output).
    pub min_quality_score: f64,
    /// Rolling quota window, in seconds.
    pub quota_window_secs: u64,
    /// Maximum non-deleted uploads within the window for a non-privileged role.
    pub quota_max_uploads: u32,
    /// Multiplier applied to `quota_max_uploads` for roles whose
    /// [`recv_core`]-style quota multiplier is greater than 1 (e.g. HOD).
    pub hod_quota_multiplier: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 15 * 1024 * 1024,
            min_width_px: 800,
            min_height_px: 600,
            min_quality_score: 70.0,
            quota_window_secs: 3600,
            quota_max_uploads: 50,
            hod_quota_multiplier: 2,
        }
    }
}

/// OCR engine registry timing and confidence thresholds (C4).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct OcrConfig {
    /// Multiplier applied to an engine's declared `typical_latency_ms` to
    /// derive its per-call timeout.
    pub timeout_multiplier: u32,
    /// Lower bound on a per-call timeout, in milliseconds, regardless of
    /// `timeout_multiplier * typical_latency_ms`.
    pub min_timeout_ms: u64,
    /// Mean confidence below which an OCR result is flagged `low_ocr_confidence`.
    pub confidence_floor: f64,
    /// Minimum non-whitespace character count for the PDF embedded-text path
    /// to short-circuit rasterisation (C5).
    pub pdf_text_min_chars: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            timeout_multiplier: 3,
            min_timeout_ms: 5_000,
            confidence_floor: 0.50,
            pdf_text_min_chars: 40,
        }
    }
}

/// Row-parser pattern-bank identity (C6).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ParserConfig {
    /// Version tag recorded on every draft line, for reproducibility.
    pub pattern_bank_version: String,
    /// Coverage threshold at or above which, combined with
    /// `structure_conf_accept_threshold`, the planner accepts without LLM escalation.
    pub coverage_accept_threshold: f64,
    /// Structure-confidence threshold paired with `coverage_accept_threshold`.
    pub structure_conf_accept_threshold: f64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            pattern_bank_version: "pattern-bank-2026.1".to_string(),
            coverage_accept_threshold: 0.80,
            structure_conf_accept_threshold: 0.70,
        }
    }
}

/// Per-model token pricing used to estimate the cost of a prospective LLM call.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ModelPrice {
    /// USD per input token.
    pub input_price_per_token: f64,
    /// USD per output token.
    pub output_price_per_token: f64,
}

/// Per-session cost budget and registered model prices (C7).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct BudgetConfig {
    /// Hard cap on LLM calls per session.
    pub max_llm_calls: u32,
    /// Hard cap on money spent per session, in USD.
    pub max_money_spent: f64,
    /// Hard cap on combined input+output tokens per session.
    pub max_total_tokens: u64,
    /// Confidence below which a first `mini` attempt escalates to `strong`.
    pub escalation_confidence_floor: f64,
    /// Registered prices, keyed by model id (e.g. `"mini"`, `"strong"`).
    pub model_prices: BTreeMap<String, ModelPrice>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let mut model_prices = BTreeMap::new();
        model_prices.insert(
            "mini".to_string(),
            ModelPrice {
                input_price_per_token: 0.00000015,
                output_price_per_token: 0.0000006,
            },
        );
        model_prices.insert(
            "strong".to_string(),
            ModelPrice {
                input_price_per_token: 0.000003,
                output_price_per_token: 0.000015,
            },
        );
        Self {
            max_llm_calls: 3,
            max_money_spent: 0.50,
            max_total_tokens: 10_000,
            escalation_confidence_floor: 0.60,
            model_prices,
        }
    }
}

/// Part reconciliation boost weights and suggestion threshold (C9).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Additive boost for a match on an open shopping list.
    pub shopping_list_boost: f64,
    /// Additive boost for a match received on a recent PO.
    pub recent_po_boost: f64,
    /// Lookback window, in days, for "recent" POs.
    pub recent_po_lookback_days: i64,
    /// Score at or above which a candidate qualifies as a suggestion.
    pub suggestion_threshold: f64,
    /// Number of alternatives retained alongside the primary match.
    pub max_alternatives: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            shopping_list_boost: 0.15,
            recent_po_boost: 0.10,
            recent_po_lookback_days: 90,
            suggestion_threshold: 0.80,
            max_alternatives: 3,
        }
    }
}

/// Session lifecycle tunables (C10).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Draft sessions idle for longer than this are eligible for
    /// auto-abandonment, in seconds.
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_secs: 72 * 3600 }
    }
}

/// Pipeline orchestrator concurrency and phase-deadline tuning (C13).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Bounded per-tenant in-flight artifact count. A request that would
    /// exceed this returns `QUEUE_FULL` immediately rather than queuing.
    pub max_concurrent_per_tenant: usize,
    /// Process memory headroom, in MiB, passed to the OCR registry's
    /// candidate filter.
    pub available_memory_mib: u32,
    /// Deadline for the admission-gate phase, in milliseconds.
    pub admission_deadline_ms: u64,
    /// Deadline for the embedded-PDF-text extraction phase, in milliseconds.
    pub pdf_text_deadline_ms: u64,
    /// Deadline for the deterministic row-parse phase, in milliseconds.
    pub parse_deadline_ms: u64,
    /// Deadline for a single LLM normalisation call, in seconds.
    pub llm_call_deadline_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_tenant: 4,
            available_memory_mib: 2_048,
            admission_deadline_ms: 50,
            pdf_text_deadline_ms: 5_000,
            parse_deadline_ms: 1_000,
            llm_call_deadline_secs: 30,
        }
    }
}

/// Top-level configuration for the receiving ingestion pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Quality heuristic tuning (C1).
    pub quality: QualityConfig,
    /// Admission gate tuning (C2).
    pub admission: AdmissionConfig,
    /// OCR registry tuning (C4).
    pub ocr: OcrConfig,
    /// Row parser tuning (C6).
    pub parser: ParserConfig,
    /// Cost budget tuning (C7).
    pub budget: BudgetConfig,
    /// Reconciliation tuning (C9).
    pub reconcile: ReconcileConfig,
    /// Session lifecycle tuning (C10).
    pub session: SessionConfig,
    /// Orchestrator concurrency and phase-deadline tuning (C13).
    pub orchestrator: OrchestratorConfig,
}

impl PipelineConfig {
    /// Load configuration from `path`, or return [`PipelineConfig::default`]
    /// if `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileNotFound`] or [`ConfigError::ParseError`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                    path: p.display().to_string(),
                })?;
                Self::parse_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse a TOML string into a [`PipelineConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] on malformed TOML.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })
    }

    /// Validate numeric ranges and cross-field invariants, returning
    /// advisory warnings for soft issues.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any hard constraint is
    /// violated (negative cost caps, weights outside `[0,1]`, thresholds
    /// outside `[0,1]`, an empty model price table).
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut errors = Vec::new();
        let warnings = Vec::new();

        let weight_sum =
            self.quality.blur_weight + self.quality.glare_weight + self.quality.contrast_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            errors.push(format!("quality weights must sum to 1.0, got {weight_sum}"));
        }
        if self.budget.max_money_spent < 0.0 {
            errors.push("budget.max_money_spent must be non-negative".to_string());
        }
        if self.budget.max_llm_calls == 0 {
            errors.push("budget.max_llm_calls must be at least 1".to_string());
        }
        if self.budget.model_prices.is_empty() {
            errors.push("budget.model_prices must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.reconcile.suggestion_threshold) {
            errors.push("reconcile.suggestion_threshold must be in [0,1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.parser.coverage_accept_threshold) {
            errors.push("parser.coverage_accept_threshold must be in [0,1]".to_string());
        }
        if self.admission.max_upload_bytes == 0 {
            errors.push("admission.max_upload_bytes must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(ConfigError::ValidationError { reasons: errors })
        }
    }
}
