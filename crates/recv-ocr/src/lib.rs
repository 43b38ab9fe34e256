//! OCR engine registry (C4).
//!
//! Engines are registered objects declaring [`EngineCapabilities`]; the
//! registry computes an ordered candidate list and invokes candidates in
//! turn, under a per-call timeout, until one clears the confidence floor.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use recv_config::OcrConfig;
use recv_core::interfaces::OCREngine;
use recv_core::{EngineCapabilities, OCRResult};
use recv_error::{ErrorCode, PipelineError};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A registry of [`OCREngine`] implementations, selected by declared capability.
#[derive(Default)]
pub struct EngineRegistry {
    engines: Vec<Arc<dyn OCREngine>>,
}

impl EngineRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine.
    pub fn register(&mut self, engine: Arc<dyn OCREngine>) {
        self.engines.push(engine);
    }

    /// Ordered candidate list for a call with `available_mib` of process
    /// memory headroom: enabled engines whose memory envelope fits,
    /// descending accuracy tier, ties broken by ascending cost then
    /// ascending latency.
    #[must_use]
    pub fn candidates(&self, available_mib: u32) -> Vec<Arc<dyn OCREngine>> {
        let mut candidates: Vec<(EngineCapabilities, Arc<dyn OCREngine>)> = self
            .engines
            .iter()
            .map(|e| (e.describe(), Arc::clone(e)))
            .filter(|(caps, _)| caps.enabled && caps.memory_envelope_mib <= available_mib)
            .collect();

        candidates.sort_by(|(a, _), (b, _)| {
            b.accuracy_tier
                .cmp(&a.accuracy_tier)
                .then_with(|| a.cost_per_page.partial_cmp(&b.cost_per_page).unwrap_or(Ordering::Equal))
                .then_with(|| a.typical_latency_ms.cmp(&b.typical_latency_ms))
        });

        candidates.into_iter().map(|(_, e)| e).collect()
    }

    /// Per-call timeout for an engine, per the `3 * typical_latency_ms`
    /// rule with a configured floor.
    #[must_use]
    pub fn timeout_for(caps: &EngineCapabilities, config: &OcrConfig) -> Duration {
        let computed_ms = u64::from(caps.typical_latency_ms) * u64::from(config.timeout_multiplier);
        Duration::from_millis(computed_ms.max(config.min_timeout_ms))
    }
}

/// Outcome of running the registry's candidate list against one artifact.
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    /// The winning (or best-scoring, if none cleared the floor) result.
    pub result: OCRResult,
    /// Set if no candidate cleared `config.confidence_floor`.
    pub low_confidence: bool,
    /// Engine ids attempted, in order.
    pub attempted_engine_ids: Vec<String>,
}

/// Run the candidate list in order until one clears the confidence floor.
///
/// # Errors
///
/// Returns [`ErrorCode::OcrFailed`] only if every candidate call itself
/// errors (timeout or engine failure); a low-but-present confidence result
/// is returned successfully with `low_confidence = true`.
pub async fn run_selection(
    registry: &EngineRegistry,
    bytes: &[u8],
    mime: &str,
    available_mib: u32,
    config: &OcrConfig,
) -> Result<SelectionOutcome, PipelineError> {
    let candidates = registry.candidates(available_mib);
    if candidates.is_empty() {
        return Err(PipelineError::new(ErrorCode::OcrFailed, "no eligible OCR engine"));
    }

    let mut best: Option<OCRResult> = None;
    let mut attempted = Vec::new();

    for engine in &candidates {
        let caps = engine.describe();
        let timeout = EngineRegistry::timeout_for(&caps, config);
        attempted.push(caps.engine_id.clone());

        let outcome = tokio::time::timeout(timeout, engine.run(bytes, mime, timeout)).await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(engine_id = %caps.engine_id, error = %e, "ocr engine call failed");
                continue;
            }
            Err(_) => {
                warn!(engine_id = %caps.engine_id, timeout_ms = %timeout.as_millis(), "ocr engine call timed out");
                continue;
            }
        };

        debug!(engine_id = %caps.engine_id, confidence = result.mean_confidence, "ocr candidate result");
        if result.mean_confidence >= config.confidence_floor {
            return Ok(SelectionOutcome { result, low_confidence: false, attempted_engine_ids: attempted });
        }

        best = match best {
            Some(current) if current.mean_confidence >= result.mean_confidence => Some(current),
            _ => Some(result),
        };
    }

    match best {
        Some(result) => Ok(SelectionOutcome { result, low_confidence: true, attempted_engine_ids: attempted }),
        None => Err(PipelineError::new(ErrorCode::OcrFailed, "every candidate engine failed or timed out")
            .with_context("attempted_engines", attempted)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    struct FixedEngine {
        caps: EngineCapabilities,
        confidence: f64,
        delay: Duration,
    }

    #[async_trait]
    impl OCREngine for FixedEngine {
        fn describe(&self) -> EngineCapabilities {
            self.caps.clone()
        }

        async fn run(&self, _bytes: &[u8], _mime: &str, _deadline: Duration) -> Result<OCRResult, PipelineError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(OCRResult {
                artifact_id: Uuid::nil(),
                engine_id: self.caps.engine_id.clone(),
                text: "1 ea widget ABC123".to_string(),
                mean_confidence: self.confidence,
                lines: vec![],
                word_count: 4,
                runtime_ms: 10,
                finished_at: Utc::now(),
            })
        }
    }

    fn caps(id: &str, tier: u8, mib: u32, latency_ms: u32, cost: f64) -> EngineCapabilities {
        EngineCapabilities {
            engine_id: id.to_string(),
            accuracy_tier: tier,
            memory_envelope_mib: mib,
            typical_latency_ms: latency_ms,
            cost_per_page: cost,
            supports_pdf_raster: true,
            enabled: true,
        }
    }

    #[test]
    fn candidates_sort_by_tier_then_cost_then_latency() {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(FixedEngine { caps: caps("cheap-tier1", 1, 128, 500, 0.001), confidence: 0.9, delay: Duration::ZERO }));
        registry.register(Arc::new(FixedEngine { caps: caps("strong-tier3", 3, 512, 1000, 0.01), confidence: 0.9, delay: Duration::ZERO }));
        registry.register(Arc::new(FixedEngine { caps: caps("mid-tier2", 2, 256, 700, 0.005), confidence: 0.9, delay: Duration::ZERO }));

        let ordered = registry.candidates(1024);
        let ids: Vec<String> = ordered.iter().map(|e| e.describe().engine_id).collect();
        assert_eq!(ids, vec!["strong-tier3", "mid-tier2", "cheap-tier1"]);
    }

    #[test]
    fn candidates_excludes_disabled_and_over_budget_engines() {
        let mut registry = EngineRegistry::new();
        let mut disabled = caps("disabled", 3, 128, 500, 0.001);
        disabled.enabled = false;
        registry.register(Arc::new(FixedEngine { caps: disabled, confidence: 0.9, delay: Duration::ZERO }));
        registry.register(Arc::new(FixedEngine { caps: caps("too-big", 3, 4096, 500, 0.001), confidence: 0.9, delay: Duration::ZERO }));
        registry.register(Arc::new(FixedEngine { caps: caps("fits", 1, 128, 500, 0.001), confidence: 0.9, delay: Duration::ZERO }));

        let ordered = registry.candidates(1024);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].describe().engine_id, "fits");
    }

    #[tokio::test]
    async fn first_engine_clearing_the_floor_wins() {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(FixedEngine { caps: caps("strong", 3, 128, 10, 0.01), confidence: 0.95, delay: Duration::ZERO }));
        registry.register(Arc::new(FixedEngine { caps: caps("weak", 1, 128, 10, 0.001), confidence: 0.2, delay: Duration::ZERO }));

        let config = OcrConfig::default();
        let outcome = run_selection(&registry, b"x", "image/png", 1024, &config).await.unwrap();
        assert_eq!(outcome.result.engine_id, "strong");
        assert!(!outcome.low_confidence);
        assert_eq!(outcome.attempted_engine_ids, vec!["strong".to_string()]);
    }

    #[tokio::test]
    async fn falls_through_to_best_scoring_when_all_below_floor() {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(FixedEngine { caps: caps("a", 3, 128, 10, 0.01), confidence: 0.2, delay: Duration::ZERO }));
        registry.register(Arc::new(FixedEngine { caps: caps("b", 2, 128, 10, 0.01), confidence: 0.4, delay: Duration::ZERO }));

        let config = OcrConfig::default();
        let outcome = run_selection(&registry, b"x", "image/png", 1024, &config).await.unwrap();
        assert!(outcome.low_confidence);
        assert_eq!(outcome.result.engine_id, "b");
        assert_eq!(outcome.attempted_engine_ids.len(), 2);
    }

    #[test]
    fn timeout_floor_applies_below_min() {
        let config = OcrConfig::default();
        let caps = caps("fast", 1, 128, 100, 0.001);
        assert_eq!(EngineRegistry::timeout_for(&caps, &config), Duration::from_millis(5_000));
    }

    #[test]
    fn timeout_scales_above_min() {
        let config = OcrConfig::default();
        let caps = caps("slow", 1, 128, 3000, 0.001);
        assert_eq!(EngineRegistry::timeout_for(&caps, &config), Duration::from_millis(9_000));
    }
}
