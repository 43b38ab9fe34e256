//! External collaborator interfaces (§6).
//!
//! These traits are the entire surface the core exposes to the transport,
//! storage, and vendor layers, which this workspace treats as external
//! collaborators rather than something to implement. The core never
//! accepts "look up by id alone" — every method takes the tenant
//! explicitly, so an adapter cannot forget to scope a query.

use crate::artifact::Artifact;
use crate::catalog::{PartRow, RecentPo, ShoppingListLine};
use crate::ocr::{EngineCapabilities, OCRResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recv_error::PipelineError;
use std::time::Duration;
use uuid::Uuid;

/// Content-addressed blob storage. Opaque to the core beyond strong
/// consistency for put -> get within a single artifact.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `blob_ref`. Idempotent: a put of an existing ref
    /// with identical bytes is a no-op.
    async fn put(&self, blob_ref: &str, bytes: &[u8], mime: &str) -> Result<(), PipelineError>;

    /// Fetch the bytes stored under `blob_ref`.
    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, PipelineError>;

    /// Produce a time-limited signed URL for `blob_ref`.
    async fn sign(&self, blob_ref: &str, ttl: Duration) -> Result<String, PipelineError>;

    /// Remove the blob stored under `blob_ref`.
    async fn delete(&self, blob_ref: &str) -> Result<(), PipelineError>;
}

/// Read-mostly access to a tenant's parts catalog and procurement state.
///
/// Every method takes `tenant_id` explicitly; an implementation's adapter is
/// responsible for enforcing that scope (row-level policy or an obligatory
/// filter parameter) — the core never trusts an id alone.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Parts catalog, optionally pinned to a specific snapshot for
    /// deterministic re-ranking.
    async fn lookup_parts(
        &self,
        tenant_id: Uuid,
        snapshot_id: Option<Uuid>,
    ) -> Result<Vec<PartRow>, PipelineError>;

    /// Open shopping-list lines with outstanding quantity.
    async fn shopping_list_open(&self, tenant_id: Uuid) -> Result<Vec<ShoppingListLine>, PipelineError>;

    /// Purchase orders received on or after `since`.
    async fn recent_pos(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<RecentPo>, PipelineError>;
}

/// A single OCR engine. Implementations must be side-effect free; the
/// registry (component C4) owns timeouts and cancellation.
#[async_trait]
pub trait OCREngine: Send + Sync {
    /// Declared capabilities used for registry selection.
    fn describe(&self) -> EngineCapabilities;

    /// Run OCR against `bytes`, aborting if `deadline` elapses first.
    async fn run(&self, bytes: &[u8], mime: &str, deadline: Duration) -> Result<OCRResult, PipelineError>;
}

/// Result of a single structured LLM completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct LLMCompletion {
    /// Parsed JSON response body.
    pub json: serde_json::Value,
    /// Input tokens billed.
    pub tokens_in: u64,
    /// Output tokens billed.
    pub tokens_out: u64,
    /// Cost in USD for this call.
    pub cost: f64,
}

/// A vendor-agnostic LLM completion client.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Issue one structured-JSON completion request against `model_id`,
    /// validating the response against `schema`.
    async fn complete(
        &self,
        model_id: &str,
        prompt: &str,
        schema: &serde_json::Value,
        deadline: Duration,
    ) -> Result<LLMCompletion, PipelineError>;
}

/// Outcome of a successful admission decision (§6 inbound contract).
#[derive(Debug, Clone, PartialEq)]
pub enum AdmitDecision {
    /// A genuinely new artifact was admitted and should be persisted/stored.
    New {
        /// The artifact record to persist.
        artifact: Artifact,
    },
    /// The upload matches an existing, non-deleted artifact; no blob write
    /// occurs. Not an error: a distinct, accepted outcome.
    Duplicate {
        /// The pre-existing artifact's id.
        existing_artifact_id: Uuid,
    },
}
