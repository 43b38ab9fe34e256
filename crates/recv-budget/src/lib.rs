//! Cost budget and escalation planner (C7).
//!
//! [`plan`] is a pure function over the session's [`CostLedger`], the row
//! parser's coverage/structure-confidence scores, and how many LLM attempts
//! have already been spent on the current artifact. It never observes the
//! LLM itself — the caller increments the ledger with the call's actual
//! token/cost figures after each completion and before the next `plan`
//! call.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use recv_config::BudgetConfig;
use recv_core::CostLedger;

/// Model id used for the first, cheap normalisation attempt.
pub const MINI_MODEL: &str = "mini";
/// Model id used for the escalated, stronger attempt.
pub const STRONG_MODEL: &str = "strong";

const MINI_MAX_TOKENS: u32 = 2_000;
const MINI_TEMPERATURE: f64 = 0.1;
const STRONG_MAX_TOKENS: u32 = 3_000;
const STRONG_TEMPERATURE: f64 = 0.2;

/// Inputs the planner reads to make one decision (§4.7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanInput {
    /// Row-parser coverage, in `[0, 1]`.
    pub coverage: f64,
    /// Row-parser structure confidence, in `[0, 1]`.
    pub structure_conf: f64,
    /// Number of LLM attempts already spent on the current artifact.
    pub attempts_for_artifact: u32,
    /// Confidence reported by the most recent LLM call against this
    /// artifact, if any (the C8 `"high"|"med"|"low"` label mapped to a
    /// numeric value by the caller: high ~0.9, med ~0.75, low ~0.4).
    pub last_llm_confidence: Option<f64>,
    /// Conservative estimate of input tokens a prospective call would
    /// consume (derived from the OCR text the caller would send).
    pub estimated_input_tokens: u64,
}

/// One planner decision (§9 design notes: a closed sum type, not an
/// untyped dictionary).
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Deterministic parse was good enough; no LLM call needed.
    Accept,
    /// Issue a first, cheap normalisation call.
    Normalise {
        /// Model id to call.
        model: String,
        /// Max output tokens to request.
        max_tokens: u32,
        /// Sampling temperature.
        temperature: f64,
    },
    /// Issue a stronger, escalated call after a weak first attempt.
    Escalate {
        /// Model id to call.
        model: String,
        /// Max output tokens to request.
        max_tokens: u32,
        /// Sampling temperature.
        temperature: f64,
    },
    /// Keep the best-so-far result and flag it for manual review; no
    /// further LLM calls fit the remaining budget or attempt count.
    AcceptPartial,
}

impl Decision {
    /// A short label suitable for [`recv_core::PlannerDecisionRecord::decision`].
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Decision::Accept => "accept".to_string(),
            Decision::Normalise { model, .. } => format!("normalise:{model}"),
            Decision::Escalate { model, .. } => format!("escalate:{model}"),
            Decision::AcceptPartial => "accept_partial".to_string(),
        }
    }
}

/// Estimate the USD cost of a prospective call against `model_id` given
/// `input_tokens` observed/estimated plus `output_tokens` requested,
/// returning `None` if no price is registered for `model_id`.
#[must_use]
pub fn estimate_cost(config: &BudgetConfig, model_id: &str, input_tokens: u64, output_tokens: u64) -> Option<f64> {
    let price = config.model_prices.get(model_id)?;
    Some(
        input_tokens as f64 * price.input_price_per_token
            + output_tokens as f64 * price.output_price_per_token,
    )
}

/// Whether issuing a call against `model_id` with `max_tokens` output would
/// keep the session's ledger within every hard cap (§4.7 ledger caps).
#[must_use]
pub fn budget_allows(
    config: &BudgetConfig,
    ledger: &CostLedger,
    model_id: &str,
    estimated_input_tokens: u64,
    max_tokens: u32,
) -> bool {
    if ledger.llm_calls >= config.max_llm_calls {
        return false;
    }
    let Some(projected_cost) = estimate_cost(config, model_id, estimated_input_tokens, u64::from(max_tokens)) else {
        return false;
    };
    if ledger.money_spent + projected_cost > config.max_money_spent {
        return false;
    }
    if ledger.total_tokens() + estimated_input_tokens + u64::from(max_tokens) > config.max_total_tokens {
        return false;
    }
    true
}

/// Decide the next action for an artifact given its parse result and the
/// session's running ledger (§4.7 decision function).
#[must_use]
pub fn plan(
    input: &PlanInput,
    ledger: &CostLedger,
    config: &BudgetConfig,
    coverage_accept_threshold: f64,
    structure_conf_accept_threshold: f64,
) -> Decision {
    if input.coverage >= coverage_accept_threshold && input.structure_conf >= structure_conf_accept_threshold {
        return Decision::Accept;
    }

    if input.attempts_for_artifact == 0
        && budget_allows(config, ledger, MINI_MODEL, input.estimated_input_tokens, MINI_MAX_TOKENS)
    {
        return Decision::Normalise {
            model: MINI_MODEL.to_string(),
            max_tokens: MINI_MAX_TOKENS,
            temperature: MINI_TEMPERATURE,
        };
    }

    if input.attempts_for_artifact == 1
        && input.last_llm_confidence.is_some_and(|c| c < config.escalation_confidence_floor)
        && budget_allows(config, ledger, STRONG_MODEL, input.estimated_input_tokens, STRONG_MAX_TOKENS)
    {
        return Decision::Escalate {
            model: STRONG_MODEL.to_string(),
            max_tokens: STRONG_MAX_TOKENS,
            temperature: STRONG_TEMPERATURE,
        };
    }

    Decision::AcceptPartial
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(coverage: f64, structure_conf: f64, attempts: u32, last_conf: Option<f64>) -> PlanInput {
        PlanInput {
            coverage,
            structure_conf,
            attempts_for_artifact: attempts,
            last_llm_confidence: last_conf,
            estimated_input_tokens: 500,
        }
    }

    #[test]
    fn high_coverage_and_structure_accepts_without_llm() {
        let decision = plan(&input(0.9, 0.8, 0, None), &CostLedger::default(), &BudgetConfig::default(), 0.80, 0.70);
        assert_eq!(decision, Decision::Accept);
    }

    #[test]
    fn low_coverage_first_attempt_issues_mini_call() {
        let decision = plan(&input(0.55, 0.60, 0, None), &CostLedger::default(), &BudgetConfig::default(), 0.80, 0.70);
        assert!(matches!(decision, Decision::Normalise { ref model, .. } if model == MINI_MODEL));
    }

    #[test]
    fn weak_mini_result_escalates_to_strong() {
        let decision = plan(
            &input(0.55, 0.60, 1, Some(0.4)),
            &CostLedger::default(),
            &BudgetConfig::default(),
            0.80,
            0.70,
        );
        assert!(matches!(decision, Decision::Escalate { ref model, .. } if model == STRONG_MODEL));
    }

    #[test]
    fn confident_mini_result_does_not_escalate() {
        let decision = plan(
            &input(0.55, 0.60, 1, Some(0.9)),
            &CostLedger::default(),
            &BudgetConfig::default(),
            0.80,
            0.70,
        );
        assert_eq!(decision, Decision::AcceptPartial);
    }

    #[test]
    fn exhausted_attempts_fall_back_to_accept_partial() {
        let decision = plan(
            &input(0.55, 0.60, 2, Some(0.4)),
            &CostLedger::default(),
            &BudgetConfig::default(),
            0.80,
            0.70,
        );
        assert_eq!(decision, Decision::AcceptPartial);
    }

    #[test]
    fn budget_exhausted_session_accepts_partial_instead_of_normalising() {
        let config = BudgetConfig::default();
        let mut ledger = CostLedger::default();
        ledger.llm_calls = config.max_llm_calls;
        let decision = plan(&input(0.4, 0.3, 0, None), &ledger, &config, 0.80, 0.70);
        assert_eq!(decision, Decision::AcceptPartial);
    }

    #[test]
    fn near_cap_money_spent_blocks_a_new_call_that_would_exceed_it() {
        let config = BudgetConfig::default();
        let ledger = CostLedger::default().record_call(100, 100, config.max_money_spent - 0.000001);
        assert!(!budget_allows(&config, &ledger, MINI_MODEL, 500, MINI_MAX_TOKENS));
    }

    #[test]
    fn ledger_never_exceeds_call_cap_across_plan_calls() {
        let config = BudgetConfig::default();
        let mut ledger = CostLedger::default();
        for _ in 0..10 {
            let decision = plan(&input(0.3, 0.3, 0, None), &ledger, &config, 0.80, 0.70);
            if let Decision::Normalise { .. } = decision {
                ledger = ledger.record_call(500, 200, 0.001);
            } else {
                break;
            }
        }
        assert!(ledger.llm_calls <= config.max_llm_calls);
    }

    proptest::proptest! {
        #[test]
        fn plan_never_panics_on_arbitrary_inputs(
            coverage in 0.0f64..=1.0,
            structure_conf in 0.0f64..=1.0,
            attempts in 0u32..5,
            last_conf in 0.0f64..=1.0,
        ) {
            let _ = plan(
                &input(coverage, structure_conf, attempts, Some(last_conf)),
                &CostLedger::default(),
                &BudgetConfig::default(),
                0.80,
                0.70,
            );
        }
    }
}
