//! LLM normaliser (C8).
//!
//! Two fixed prompts, both demanding strict JSON back: one to normalise OCR
//! text into line items, one to extract shipping-label metadata. Every
//! response is validated against its declared schema before being handed
//! back to the caller — the cost planner (component C7) only ever sees a
//! clean, typed result or a [`recv_error::PipelineError`] with
//! `NormalisationFailed`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use recv_core::LLMClient;
use recv_error::{ErrorCategory, ErrorCode, PipelineError};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Confidence label an LLM attaches to an extracted line (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Model is confident the extraction is correct.
    High,
    /// Model extracted a plausible value but flagged some uncertainty.
    Med,
    /// Model extracted a low-confidence guess.
    Low,
}

impl Confidence {
    /// Map the label to a numeric value the budget planner compares against
    /// `escalation_confidence_floor` (§4.7: "mini returns confidence 'low'
    /// (mapped ≤ 0.60)").
    #[must_use]
    pub fn as_numeric(self) -> f64 {
        match self {
            Confidence::High => 0.9,
            Confidence::Med => 0.75,
            Confidence::Low => 0.4,
        }
    }
}

/// One normalised line item, as returned by the line-items prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NormalisedLine {
    /// 1-based line number within the response.
    pub line_no: u32,
    /// Quantity as a decimal (converted to [`recv_core::Qty`] by the caller).
    pub qty: f64,
    /// Free-text unit, if the model recognised one.
    pub unit: Option<String>,
    /// Free-text description.
    pub description: String,
    /// Candidate part code, if present on the line.
    pub part_code: Option<String>,
    /// The model's self-reported confidence in this line.
    pub confidence: Confidence,
}

/// Full response body for the line-items prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LineItemsResponse {
    /// Extracted lines, in document order.
    pub lines: Vec<NormalisedLine>,
    /// Free-text notes the model wanted to surface (ambiguities, etc).
    #[serde(default)]
    pub notes: Option<String>,
}

/// Full response body for the shipping-label prompt. Every field is
/// optional: a failed/partial extraction still returns this shape with
/// nulls rather than an error (§4.8).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ShippingLabelResponse {
    /// Carrier name, if legible.
    pub carrier: Option<String>,
    /// Tracking number, if legible.
    pub tracking_number: Option<String>,
    /// Purchase order number, if present.
    pub po_number: Option<String>,
    /// Ship-to address block, if present.
    pub ship_to: Option<String>,
    /// Ship-from address block, if present.
    pub ship_from: Option<String>,
    /// Ship date, as written on the label.
    pub ship_date: Option<String>,
    /// Service type (e.g. "ground", "overnight"), if present.
    pub service_type: Option<String>,
}

/// Sampling parameters for one normalisation attempt, as decided by the
/// budget planner.
#[derive(Debug, Clone, PartialEq)]
pub struct CallParams {
    /// Model id to invoke ("mini" or "strong").
    pub model: String,
    /// Max output tokens requested.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Outcome of one successful normalisation call: the typed body plus the
/// billing figures the caller folds into the session's [`recv_core::CostLedger`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormaliseOutcome<T> {
    /// Schema-validated, deserialised response body.
    pub body: T,
    /// Input tokens billed.
    pub tokens_in: u64,
    /// Output tokens billed.
    pub tokens_out: u64,
    /// Cost in USD for this call.
    pub cost: f64,
}

/// At most one retry on a transient transport error (§4.8: "the normaliser
/// owns retries (at most 1) on transient transport errors").
const MAX_RETRIES: u32 = 1;
const BASE_BACKOFF: Duration = Duration::from_millis(200);

fn is_retryable(err: &PipelineError) -> bool {
    err.category() == ErrorCategory::Transient
}

fn build_prompt(preamble: &str, ocr_text: &str) -> String {
    format!("{preamble}\n\n---\n{ocr_text}\n---")
}

/// Extract and validate line items from `ocr_text` (§4.8 line-items prompt).
///
/// Temperature and max tokens come from `params`, which the budget planner
/// (C7) decides. On a schema mismatch this raises
/// [`ErrorCode::NormalisationFailed`] without retrying; on a transient
/// transport error it retries once with backoff before giving up.
pub async fn normalise_line_items(
    client: &dyn LLMClient,
    ocr_text: &str,
    params: &CallParams,
    deadline: Duration,
) -> Result<NormaliseOutcome<LineItemsResponse>, PipelineError> {
    let prompt = build_prompt(
        "Extract every line item from this receiving document as strict JSON matching the \
         declared schema. Each line needs a 1-based line_no, a numeric qty, an optional unit, \
         a description, an optional part_code, and a confidence of \"high\", \"med\", or \"low\".",
        ocr_text,
    );
    let schema = serde_json::to_value(schema_for!(LineItemsResponse))
        .map_err(|e| PipelineError::new(ErrorCode::NormalisationFailed, "failed to serialise line-items schema").with_source(e))?;
    call_with_retry(client, params, &prompt, &schema, deadline).await
}

/// Extract shipping-label metadata from `ocr_text` (§4.8 shipping-label
/// prompt). This is a single "mini" call with no escalation path; a schema
/// failure returns the all-`None` default body with partial, nulled-out
/// fields rather than propagating an error.
pub async fn normalise_shipping_label(
    client: &dyn LLMClient,
    ocr_text: &str,
    deadline: Duration,
) -> NormaliseOutcome<ShippingLabelResponse> {
    let params = CallParams {
        model: "mini".to_string(),
        max_tokens: 800,
        temperature: 0.1,
    };
    let prompt = build_prompt(
        "Extract shipping-label metadata as strict JSON matching the declared schema. Use null \
         for any field you cannot read.",
        ocr_text,
    );
    let schema = match serde_json::to_value(schema_for!(ShippingLabelResponse)) {
        Ok(schema) => schema,
        Err(e) => {
            warn!(error = %e, "failed to serialise shipping-label schema");
            return NormaliseOutcome { body: ShippingLabelResponse::default(), tokens_in: 0, tokens_out: 0, cost: 0.0 };
        }
    };

    match call_with_retry::<ShippingLabelResponse>(client, &params, &prompt, &schema, deadline).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(error = %err, "shipping-label extraction failed, returning partial nulls");
            NormaliseOutcome { body: ShippingLabelResponse::default(), tokens_in: 0, tokens_out: 0, cost: 0.0 }
        }
    }
}

async fn call_with_retry<T>(
    client: &dyn LLMClient,
    params: &CallParams,
    prompt: &str,
    schema: &serde_json::Value,
    deadline: Duration,
) -> Result<NormaliseOutcome<T>, PipelineError>
where
    T: for<'de> Deserialize<'de>,
{
    let mut attempt = 0u32;
    loop {
        match client.complete(&params.model, prompt, schema, deadline).await {
            Ok(completion) => {
                return validate_and_parse(schema, completion.json, completion.tokens_in, completion.tokens_out, completion.cost);
            }
            Err(err) if is_retryable(&err) && attempt < MAX_RETRIES => {
                let delay = BASE_BACKOFF * 2u32.pow(attempt);
                warn!(model = %params.model, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying transient LLM transport error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn validate_and_parse<T>(
    schema: &serde_json::Value,
    json: serde_json::Value,
    tokens_in: u64,
    tokens_out: u64,
    cost: f64,
) -> Result<NormaliseOutcome<T>, PipelineError>
where
    T: for<'de> Deserialize<'de>,
{
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| PipelineError::new(ErrorCode::NormalisationFailed, "failed to compile response schema").with_source(e))?;
    if let Err(first) = validator.validate(&json) {
        let detail = first.to_string();
        return Err(PipelineError::new(ErrorCode::NormalisationFailed, "LLM response failed schema validation")
            .with_context("schema_error", detail));
    }
    let body = serde_json::from_value(json)
        .map_err(|e| PipelineError::new(ErrorCode::NormalisationFailed, "LLM response did not deserialise into the expected type").with_source(e))?;
    debug!(tokens_in, tokens_out, cost, "LLM call validated");
    Ok(NormaliseOutcome { body, tokens_in, tokens_out, cost })
}
