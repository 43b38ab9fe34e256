//! Pipeline orchestrator (C13).
//!
//! Owns the one thing no other crate in this workspace owns: the order of
//! calls across components C1-C10 for a single artifact, and the per-tenant
//! admission control that decides whether a new artifact may even start.
//!
//! Every collaborator (blob storage, catalog, OCR registry, PDF text
//! extractor, LLM client, artifact/session persistence) is injected as a
//! trait object, exactly like [`recv_core::interfaces`] and
//! [`recv_admission::ArtifactLedger`] are elsewhere in this workspace — this
//! crate has no transport or storage dependency of its own.
//!
//! Per-artifact work is strictly linear (§5: "per-artifact pipeline phases
//! run linearly"); independent artifacts and independent tenants progress
//! concurrently, bounded only by [`queue::TenantQueues`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod queue;

pub use queue::{TenantPermit, TenantQueues};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recv_admission::{ArtifactLedger, Upload};
use recv_budget::{Decision, PlanInput};
use recv_config::PipelineConfig;
use recv_core::{
    Artifact, ArtifactKind, AuthContext, BlobStore, Catalog, DraftLine, LLMClient,
    PlannerDecisionRecord, Qty, Session, Unit,
};
use recv_core::interfaces::AdmitDecision;
use recv_error::{ErrorCode, PipelineError};
use recv_llm::{CallParams, NormalisedLine, ShippingLabelResponse};
use recv_ocr::EngineRegistry;
use recv_pdftext::PdfPageTextExtractor;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Per-tenant artifact persistence the orchestrator needs beyond the
/// read-only lookups [`recv_admission::ArtifactLedger`] already declares:
/// recording the artifact row itself once admission accepts it.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Count non-deleted artifacts uploaded by `tenant_id` at or after `since`.
    async fn count_recent_uploads(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<u32, PipelineError>;

    /// The upload timestamp of the oldest non-deleted artifact counted
    /// toward `tenant_id`'s rolling window (i.e. uploaded at or after
    /// `since`), or `None` if none are counted.
    async fn oldest_counted_upload_at(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, PipelineError>;

    /// Find a non-deleted artifact for `tenant_id` with the given content hash.
    async fn find_by_content_hash(&self, tenant_id: Uuid, content_hash: &str) -> Result<Option<Uuid>, PipelineError>;

    /// Persist a newly admitted artifact.
    async fn save_artifact(&self, artifact: &Artifact) -> Result<(), PipelineError>;
}

/// Thin forwarding wrapper so an [`ArtifactStore`] can be passed anywhere
/// [`recv_admission::admit`] expects an [`ArtifactLedger`], without
/// requiring trait-object upcasting.
struct LedgerAdapter<'a>(&'a dyn ArtifactStore);

#[async_trait]
impl ArtifactLedger for LedgerAdapter<'_> {
    async fn count_recent_uploads(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<u32, PipelineError> {
        self.0.count_recent_uploads(tenant_id, since).await
    }

    async fn oldest_counted_upload_at(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, PipelineError> {
        self.0.oldest_counted_upload_at(tenant_id, since).await
    }

    async fn find_by_content_hash(&self, tenant_id: Uuid, content_hash: &str) -> Result<Option<Uuid>, PipelineError> {
        self.0.find_by_content_hash(tenant_id, content_hash).await
    }
}

/// Session and draft-line persistence. Like [`ArtifactStore`], a deployment
/// backs this with whatever database it chooses; this workspace only
/// defines the contract the orchestrator calls under the session's lock
/// (§5: "a session's draft-line list is mutated only under a per-session
/// lock" — the lock itself is this trait implementation's responsibility).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session by id.
    async fn load(&self, session_id: Uuid) -> Result<Option<Session>, PipelineError>;

    /// Persist a session, overwriting any previous row.
    async fn save(&self, session: &Session) -> Result<(), PipelineError>;

    /// The next `line_no` to assign within `session_id`, reflecting every
    /// artifact already appended to this session in upload order.
    async fn next_line_no(&self, session_id: Uuid) -> Result<u32, PipelineError>;

    /// Append `lines` to their owning session's draft-line list.
    async fn append_draft_lines(&self, lines: &[DraftLine]) -> Result<(), PipelineError>;
}

/// Outcome of [`Orchestrator::ingest_artifact`].
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The upload matched an existing artifact; nothing new was stored.
    Duplicate {
        /// The pre-existing artifact's id.
        existing_artifact_id: Uuid,
    },
    /// A packing slip was admitted, extracted, and reconciled into draft
    /// lines appended to the session.
    LineItems {
        /// The newly admitted artifact.
        artifact_id: Uuid,
        /// Session the draft lines were appended to.
        session_id: Uuid,
        /// Draft lines produced from this artifact, in upload order.
        draft_lines: Vec<DraftLine>,
        /// Whether the winning OCR result was below the registry's
        /// confidence floor (§4.4).
        low_ocr_confidence: bool,
        /// Whether the cost-budget planner exhausted its attempts/budget
        /// before a line met both accept thresholds.
        needs_manual_review: bool,
    },
    /// A shipping label was admitted and its metadata extracted. No
    /// reconciliation and no draft lines: a degenerate path that reuses
    /// admission, OCR, and the cost ledger only.
    ShippingLabel {
        /// The newly admitted artifact.
        artifact_id: Uuid,
        /// Session the extraction cost was billed against.
        session_id: Uuid,
        /// Extracted metadata, with `None` fields for anything illegible.
        label: ShippingLabelResponse,
    },
    /// A discrepancy photo or part photo was admitted and attached to a
    /// session with no content extraction.
    Attached {
        /// The newly admitted artifact.
        artifact_id: Uuid,
        /// Session the artifact was attached to.
        session_id: Uuid,
    },
}

/// A deterministic-parse or LLM-normalised line item, unified into the
/// shape [`recv_reconcile::reconcile`] and [`DraftLine`] both need —
/// regardless of whether it came from [`recv_parser::parse`] or from
/// [`recv_llm::normalise_line_items`], which return structurally different
/// types for the same underlying concept.
struct ExtractedLine {
    qty: Qty,
    unit: Option<Unit>,
    description: String,
    part_code: Option<String>,
}

fn extracted_from_parsed(lines: &[recv_parser::ParsedLine]) -> Vec<ExtractedLine> {
    lines
        .iter()
        .map(|l| ExtractedLine {
            qty: l.qty,
            unit: l.unit,
            description: l.description.clone(),
            part_code: l.part_code.clone(),
        })
        .collect()
}

/// Convert an LLM-reported decimal quantity into an exact [`Qty`], rounding
/// to the nearest hundredth (finer precision than any receiving unit this
/// workspace recognises, per [`Unit`]). `None` for non-finite or
/// non-positive values, which [`recv_parser`]'s own `qty > 0` invariant
/// also excludes.
fn qty_from_f64(value: f64) -> Option<Qty> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let scaled = (value * 100.0).round() as i64;
    if scaled <= 0 {
        return None;
    }
    Some(Qty::new(scaled, 100))
}

fn extracted_from_normalised(lines: &[NormalisedLine]) -> Vec<ExtractedLine> {
    lines
        .iter()
        .filter_map(|l| {
            let qty = qty_from_f64(l.qty)?;
            Some(ExtractedLine {
                qty,
                unit: l.unit.as_deref().and_then(Unit::parse),
                description: l.description.clone(),
                part_code: l.part_code.clone(),
            })
        })
        .collect()
}

fn mean_line_confidence(lines: &[NormalisedLine]) -> f64 {
    if lines.is_empty() {
        return 0.0;
    }
    lines.iter().map(|l| l.confidence.as_numeric()).sum::<f64>() / lines.len() as f64
}

/// Conservative token estimate for a prospective LLM call: roughly 4
/// characters per token, the same rule of thumb [`recv_budget`]'s callers
/// are expected to supply as `estimated_input_tokens`.
fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64 / 4).max(1)
}

/// Orchestrates one artifact's pipeline run: admission, dedup, storage,
/// session attachment, extraction, escalation, and reconciliation.
pub struct Orchestrator {
    artifacts: Arc<dyn ArtifactStore>,
    sessions: Arc<dyn SessionStore>,
    blobs: Arc<dyn BlobStore>,
    catalog: Arc<dyn Catalog>,
    ocr_registry: Arc<EngineRegistry>,
    pdf_extractor: Arc<dyn PdfPageTextExtractor>,
    llm: Arc<dyn LLMClient>,
    config: PipelineConfig,
    queues: Arc<TenantQueues>,
}

impl Orchestrator {
    /// Wire up an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        sessions: Arc<dyn SessionStore>,
        blobs: Arc<dyn BlobStore>,
        catalog: Arc<dyn Catalog>,
        ocr_registry: Arc<EngineRegistry>,
        pdf_extractor: Arc<dyn PdfPageTextExtractor>,
        llm: Arc<dyn LLMClient>,
        config: PipelineConfig,
    ) -> Self {
        let queues = Arc::new(TenantQueues::new(config.orchestrator.max_concurrent_per_tenant));
        Self { artifacts, sessions, blobs, catalog, ocr_registry, pdf_extractor, llm, config, queues }
    }

    /// Current in-flight artifact count for `tenant_id`, exposed for
    /// monitoring and tests.
    pub async fn in_flight(&self, tenant_id: Uuid) -> usize {
        self.queues.in_flight_count(tenant_id).await
    }

    /// Run one artifact through the pipeline: admission through draft-line
    /// append (or the shipping-label/evidence degenerate paths).
    ///
    /// `session_id`, if `Some`, attaches this artifact to an existing
    /// non-terminal session; if `None`, a new session is created and owns
    /// this artifact as its first. `catalog_snapshot_id` pins part
    /// reconciliation to a specific catalog snapshot, for reproducibility.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::QueueFull`] if `auth.tenant_id` already has
    /// `max_concurrent_per_tenant` artifacts in flight, or any error
    /// surfaced by admission, storage, OCR, the LLM, or session lookup.
    pub async fn ingest_artifact(
        &self,
        auth: &AuthContext,
        upload: Upload,
        session_id: Option<Uuid>,
        catalog_snapshot_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, PipelineError> {
        let _permit = self.queues.acquire(auth.tenant_id).await?;

        let artifact = match self.admit(auth, &upload, now).await? {
            AdmitDecision::Duplicate { existing_artifact_id } => {
                return Ok(IngestOutcome::Duplicate { existing_artifact_id });
            }
            AdmitDecision::New { artifact } => artifact,
        };

        self.blobs.put(&artifact.blob_ref, &upload.bytes, &artifact.mime).await?;
        self.artifacts.save_artifact(&artifact).await?;

        let session_id = self.load_or_create_session(auth, artifact.artifact_id, session_id, now).await?;

        match artifact.kind {
            ArtifactKind::PackingSlip => {
                let (draft_lines, low_ocr_confidence, needs_manual_review) = self
                    .extract_line_items(auth, &artifact, &upload.bytes, session_id, catalog_snapshot_id, now)
                    .await?;
                Ok(IngestOutcome::LineItems {
                    artifact_id: artifact.artifact_id,
                    session_id,
                    draft_lines,
                    low_ocr_confidence,
                    needs_manual_review,
                })
            }
            ArtifactKind::ShippingLabel => {
                let label = self.extract_shipping_label(&artifact, &upload.bytes, session_id, now).await?;
                Ok(IngestOutcome::ShippingLabel { artifact_id: artifact.artifact_id, session_id, label })
            }
            ArtifactKind::DiscrepancyPhoto | ArtifactKind::PartPhoto => {
                Ok(IngestOutcome::Attached { artifact_id: artifact.artifact_id, session_id })
            }
        }
    }

    async fn admit(&self, auth: &AuthContext, upload: &Upload, now: DateTime<Utc>) -> Result<AdmitDecision, PipelineError> {
        let deadline = Duration::from_millis(self.config.orchestrator.admission_deadline_ms);
        let adapter = LedgerAdapter(self.artifacts.as_ref());
        tokio::time::timeout(deadline, recv_admission::admit(&adapter, &self.config.admission, auth, upload, now))
            .await
            .map_err(|_| PipelineError::new(ErrorCode::Internal, "admission gate exceeded its phase deadline"))?
    }

    async fn load_or_create_session(
        &self,
        auth: &AuthContext,
        artifact_id: Uuid,
        session_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Uuid, PipelineError> {
        match session_id {
            Some(id) => {
                let mut session = self
                    .sessions
                    .load(id)
                    .await?
                    .ok_or_else(|| PipelineError::new(ErrorCode::SessionStateViolation, format!("session {id} does not exist")))?;
                recv_session::attach_artifact(&mut session, artifact_id, now)?;
                self.sessions.save(&session).await?;
                Ok(session.session_id)
            }
            None => {
                let session = recv_session::create(Uuid::new_v4(), auth.tenant_id, auth.user_id, artifact_id, now);
                self.sessions.save(&session).await?;
                Ok(session.session_id)
            }
        }
    }

    /// Try the embedded-PDF-text fast path, falling through to the OCR
    /// registry if the artifact isn't a PDF or no page qualifies (§4.5).
    async fn obtain_ocr_result(&self, artifact: &Artifact, bytes: &[u8]) -> Result<(recv_core::OCRResult, bool), PipelineError> {
        if artifact.mime == "application/pdf" {
            let deadline = Duration::from_millis(self.config.orchestrator.pdf_text_deadline_ms);
            let embedded = tokio::time::timeout(
                deadline,
                recv_pdftext::try_embedded_text(self.pdf_extractor.as_ref(), artifact.artifact_id, bytes, &self.config.ocr),
            )
            .await
            .map_err(|_| PipelineError::new(ErrorCode::OcrFailed, "embedded PDF text extraction timed out"))??;
            if let Some(result) = embedded {
                return Ok((result, false));
            }
        }

        let outcome = recv_ocr::run_selection(
            &self.ocr_registry,
            bytes,
            &artifact.mime,
            self.config.orchestrator.available_memory_mib,
            &self.config.ocr,
        )
        .await?;
        Ok((outcome.result, outcome.low_confidence))
    }

    /// The full line-item path: OCR/pdftext, row parse, cost-budget
    /// escalation loop, reconciliation, and draft-line append (§4.6-§4.9).
    async fn extract_line_items(
        &self,
        auth: &AuthContext,
        artifact: &Artifact,
        bytes: &[u8],
        session_id: Uuid,
        catalog_snapshot_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Vec<DraftLine>, bool, bool), PipelineError> {
        let (ocr_result, low_ocr_confidence) = self.obtain_ocr_result(artifact, bytes).await?;

        // In-memory work is not a suspension point (§5); the phase deadline
        // is advisory and only ever logged, never enforced with a timeout.
        let parse_started = std::time::Instant::now();
        let parse_result = recv_parser::parse(&ocr_result, &self.config.parser);
        let parse_deadline = Duration::from_millis(self.config.orchestrator.parse_deadline_ms);
        if parse_started.elapsed() > parse_deadline {
            warn!(
                artifact_id = %artifact.artifact_id,
                elapsed_ms = parse_started.elapsed().as_millis() as u64,
                "row parser exceeded its phase deadline"
            );
        }

        let mut session = self
            .sessions
            .load(session_id)
            .await?
            .ok_or_else(|| PipelineError::new(ErrorCode::SessionStateViolation, format!("session {session_id} does not exist")))?;
        let mut ledger = session.ledger;

        let mut attempts_for_artifact = 0u32;
        let mut last_llm_confidence: Option<f64> = None;
        let mut planner_decisions: Vec<PlannerDecisionRecord> = Vec::new();
        let mut needs_manual_review = false;
        let mut coverage = parse_result.coverage;
        let mut structure_conf = parse_result.structure_conf;
        let mut extracted = extracted_from_parsed(&parse_result.lines);

        loop {
            let plan_input = PlanInput {
                coverage,
                structure_conf,
                attempts_for_artifact,
                last_llm_confidence,
                estimated_input_tokens: estimate_tokens(&ocr_result.text),
            };
            let decision = recv_budget::plan(
                &plan_input,
                &ledger,
                &self.config.budget,
                self.config.parser.coverage_accept_threshold,
                self.config.parser.structure_conf_accept_threshold,
            );
            planner_decisions.push(PlannerDecisionRecord {
                stage: "plan".to_string(),
                decision: decision.label(),
                ledger_snapshot: ledger,
            });

            match decision {
                Decision::Accept => break,
                Decision::Normalise { model, max_tokens, temperature } | Decision::Escalate { model, max_tokens, temperature } => {
                    let params = CallParams { model, max_tokens, temperature };
                    let deadline = Duration::from_secs(self.config.orchestrator.llm_call_deadline_secs);
                    match recv_llm::normalise_line_items(self.llm.as_ref(), &ocr_result.text, &params, deadline).await {
                        Ok(outcome) => {
                            ledger = ledger.record_call(outcome.tokens_in, outcome.tokens_out, outcome.cost);
                            structure_conf = mean_line_confidence(&outcome.body.lines);
                            coverage = 1.0;
                            last_llm_confidence = Some(structure_conf);
                            extracted = extracted_from_normalised(&outcome.body.lines);
                            attempts_for_artifact += 1;
                        }
                        Err(err) => {
                            warn!(
                                artifact_id = %artifact.artifact_id,
                                error = %err,
                                "LLM normalisation failed; keeping the best-effort parse and flagging for review"
                            );
                            needs_manual_review = true;
                            break;
                        }
                    }
                }
                Decision::AcceptPartial => {
                    needs_manual_review = true;
                    break;
                }
            }
        }

        let parts = self.catalog.lookup_parts(auth.tenant_id, Some(catalog_snapshot_id)).await?;
        let shopping_list = self.catalog.shopping_list_open(auth.tenant_id).await?;
        let lookback_start = now - chrono::Duration::days(self.config.reconcile.recent_po_lookback_days);
        let recent_pos = self.catalog.recent_pos(auth.tenant_id, lookback_start).await?;

        let mut next_line_no = self.sessions.next_line_no(session_id).await?;
        let mut draft_lines = Vec::with_capacity(extracted.len());
        for line in extracted {
            let reconciled = recv_reconcile::reconcile(
                line.part_code.as_deref(),
                &line.description,
                &parts,
                &shopping_list,
                &recent_pos,
                &self.config.reconcile,
                now,
            );
            draft_lines.push(DraftLine {
                line_id: Uuid::new_v4(),
                session_id,
                source_artifact_id: artifact.artifact_id,
                line_no: next_line_no,
                qty: line.qty,
                unit: line.unit,
                description: line.description,
                extracted_part_code: line.part_code,
                suggested_match: reconciled.primary,
                alternative_matches: reconciled.alternatives,
                verified: false,
                verified_by: None,
                verified_at: None,
                override_part_id: None,
                discrepancy: None,
                catalog_snapshot_id,
                parser_version: self.config.parser.pattern_bank_version.clone(),
                planner_decisions: planner_decisions.clone(),
                needs_manual_review,
            });
            next_line_no += 1;
        }

        self.sessions.append_draft_lines(&draft_lines).await?;

        session.ledger = ledger;
        session.updated_at = now;
        self.sessions.save(&session).await?;

        Ok((draft_lines, low_ocr_confidence, needs_manual_review))
    }

    /// The degenerate shipping-label path (§4.8, §1): admission, OCR, and a
    /// single mini LLM call billed against the session's ledger. No
    /// reconciliation, no draft lines, no commit.
    async fn extract_shipping_label(
        &self,
        artifact: &Artifact,
        bytes: &[u8],
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ShippingLabelResponse, PipelineError> {
        let (ocr_result, _low_confidence) = self.obtain_ocr_result(artifact, bytes).await?;
        let deadline = Duration::from_secs(self.config.orchestrator.llm_call_deadline_secs);
        let outcome = recv_llm::normalise_shipping_label(self.llm.as_ref(), &ocr_result.text, deadline).await;

        let mut session = self
            .sessions
            .load(session_id)
            .await?
            .ok_or_else(|| PipelineError::new(ErrorCode::SessionStateViolation, format!("session {session_id} does not exist")))?;
        session.ledger = session.ledger.record_call(outcome.tokens_in, outcome.tokens_out, outcome.cost);
        session.updated_at = now;
        self.sessions.save(&session).await?;

        Ok(outcome.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use recv_core::interfaces::{LLMCompletion, OCREngine};
    use recv_core::{BBox, EngineCapabilities, OCRLine, OCRResult, PartRow, RecentPo, Role, ShoppingListLine};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::sync::Notify;

    struct FakeArtifactStore {
        hashes: StdMutex<HashMap<(Uuid, String), Uuid>>,
        saved: StdMutex<Vec<Artifact>>,
    }

    impl FakeArtifactStore {
        fn new() -> Self {
            Self { hashes: StdMutex::new(HashMap::new()), saved: StdMutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ArtifactStore for FakeArtifactStore {
        async fn count_recent_uploads(&self, _tenant_id: Uuid, _since: DateTime<Utc>) -> Result<u32, PipelineError> {
            Ok(self.saved.lock().unwrap().len() as u32)
        }

        async fn oldest_counted_upload_at(&self, _tenant_id: Uuid, _since: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, PipelineError> {
            Ok(self.saved.lock().unwrap().iter().map(|a| a.uploaded_at).min())
        }

        async fn find_by_content_hash(&self, tenant_id: Uuid, content_hash: &str) -> Result<Option<Uuid>, PipelineError> {
            Ok(self.hashes.lock().unwrap().get(&(tenant_id, content_hash.to_string())).copied())
        }

        async fn save_artifact(&self, artifact: &Artifact) -> Result<(), PipelineError> {
            self.hashes
                .lock()
                .unwrap()
                .insert((artifact.tenant_id, artifact.content_hash.clone()), artifact.artifact_id);
            self.saved.lock().unwrap().push(artifact.clone());
            Ok(())
        }
    }

    struct FakeSessionStore {
        sessions: AsyncMutex<HashMap<Uuid, Session>>,
        lines: AsyncMutex<HashMap<Uuid, Vec<DraftLine>>>,
    }

    impl FakeSessionStore {
        fn new() -> Self {
            Self { sessions: AsyncMutex::new(HashMap::new()), lines: AsyncMutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl SessionStore for FakeSessionStore {
        async fn load(&self, session_id: Uuid) -> Result<Option<Session>, PipelineError> {
            Ok(self.sessions.lock().await.get(&session_id).cloned())
        }

        async fn save(&self, session: &Session) -> Result<(), PipelineError> {
            self.sessions.lock().await.insert(session.session_id, session.clone());
            Ok(())
        }

        async fn next_line_no(&self, session_id: Uuid) -> Result<u32, PipelineError> {
            Ok(self.lines.lock().await.get(&session_id).map_or(0, |lines| lines.len() as u32))
        }

        async fn append_draft_lines(&self, new_lines: &[DraftLine]) -> Result<(), PipelineError> {
            let mut lines = self.lines.lock().await;
            for line in new_lines {
                lines.entry(line.session_id).or_default().push(line.clone());
            }
            Ok(())
        }
    }

    struct FakeBlobStore {
        puts: AtomicU32,
    }

    #[async_trait]
    impl BlobStore for FakeBlobStore {
        async fn put(&self, _blob_ref: &str, _bytes: &[u8], _mime: &str) -> Result<(), PipelineError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn get(&self, _blob_ref: &str) -> Result<Vec<u8>, PipelineError> {
            Ok(Vec::new())
        }
        async fn sign(&self, blob_ref: &str, _ttl: Duration) -> Result<String, PipelineError> {
            Ok(format!("https://example.test/{blob_ref}"))
        }
        async fn delete(&self, _blob_ref: &str) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    struct EmptyCatalog;

    #[async_trait]
    impl Catalog for EmptyCatalog {
        async fn lookup_parts(&self, _tenant_id: Uuid, _snapshot_id: Option<Uuid>) -> Result<Vec<PartRow>, PipelineError> {
            Ok(Vec::new())
        }
        async fn shopping_list_open(&self, _tenant_id: Uuid) -> Result<Vec<ShoppingListLine>, PipelineError> {
            Ok(Vec::new())
        }
        async fn recent_pos(&self, _tenant_id: Uuid, _since: DateTime<Utc>) -> Result<Vec<RecentPo>, PipelineError> {
            Ok(Vec::new())
        }
    }

    struct FixedTextExtractor(Vec<String>);

    #[async_trait]
    impl PdfPageTextExtractor for FixedTextExtractor {
        async fn extract_pages(&self, _bytes: &[u8]) -> Result<Vec<String>, PipelineError> {
            Ok(self.0.clone())
        }
    }

    /// An OCR engine that blocks until `release` fires, letting tests pin a
    /// request mid-flight to exercise per-tenant back-pressure.
    struct GatedEngine {
        text: String,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl OCREngine for GatedEngine {
        fn describe(&self) -> EngineCapabilities {
            EngineCapabilities {
                engine_id: "gated".to_string(),
                accuracy_tier: 1,
                memory_envelope_mib: 128,
                typical_latency_ms: 100,
                cost_per_page: 0.001,
                supports_pdf_raster: true,
                enabled: true,
            }
        }

        async fn run(&self, _bytes: &[u8], _mime: &str, _deadline: Duration) -> Result<OCRResult, PipelineError> {
            self.release.notified().await;
            Ok(ocr_result_for(&self.text))
        }
    }

    struct FixedEngine(String);

    #[async_trait]
    impl OCREngine for FixedEngine {
        fn describe(&self) -> EngineCapabilities {
            EngineCapabilities {
                engine_id: "fixed".to_string(),
                accuracy_tier: 1,
                memory_envelope_mib: 128,
                typical_latency_ms: 10,
                cost_per_page: 0.001,
                supports_pdf_raster: true,
                enabled: true,
            }
        }

        async fn run(&self, _bytes: &[u8], _mime: &str, _deadline: Duration) -> Result<OCRResult, PipelineError> {
            Ok(ocr_result_for(&self.0))
        }
    }

    fn ocr_result_for(text: &str) -> OCRResult {
        let lines: Vec<OCRLine> = text
            .lines()
            .enumerate()
            .map(|(i, l)| OCRLine { text: l.to_string(), bbox: BBox { x: 0.0, y: f64::from(i as u32) * 20.0, w: 100.0, h: 20.0 }, confidence: 0.95 })
            .collect();
        OCRResult {
            artifact_id: Uuid::nil(),
            engine_id: "fixed".to_string(),
            text: text.to_string(),
            mean_confidence: 0.95,
            lines,
            word_count: text.split_whitespace().count() as u32,
            runtime_ms: 1,
            finished_at: Utc::now(),
        }
    }

    enum LlmBehavior {
        Success(serde_json::Value),
        Unreachable,
    }

    struct FakeLlmClient {
        responses: StdMutex<Vec<LlmBehavior>>,
    }

    #[async_trait]
    impl LLMClient for FakeLlmClient {
        async fn complete(
            &self,
            _model_id: &str,
            _prompt: &str,
            _schema: &serde_json::Value,
            _deadline: Duration,
        ) -> Result<LLMCompletion, PipelineError> {
            let mut responses = self.responses.lock().unwrap();
            match responses.remove(0) {
                LlmBehavior::Success(json) => Ok(LLMCompletion { json, tokens_in: 120, tokens_out: 60, cost: 0.0005 }),
                LlmBehavior::Unreachable => Err(PipelineError::new(ErrorCode::Internal, "vendor unreachable")),
            }
        }
    }

    fn auth() -> AuthContext {
        AuthContext::new(Uuid::new_v4(), Uuid::new_v4(), Role::Crew)
    }

    fn upload_pdf(bytes_tag: &str) -> Upload {
        Upload {
            kind: ArtifactKind::PackingSlip,
            declared_mime: "application/pdf".to_string(),
            bytes: format!("%PDF-1.4\n{bytes_tag}").into_bytes(),
        }
    }

    fn orchestrator_with(
        extractor_pages: Vec<String>,
        engine: Arc<dyn OCREngine>,
        llm: Arc<dyn LLMClient>,
        capacity: usize,
    ) -> (Arc<Orchestrator>, Arc<FakeArtifactStore>, Arc<FakeSessionStore>, Arc<FakeBlobStore>) {
        let artifacts = Arc::new(FakeArtifactStore::new());
        let sessions = Arc::new(FakeSessionStore::new());
        let blobs = Arc::new(FakeBlobStore { puts: AtomicU32::new(0) });
        let catalog = Arc::new(EmptyCatalog);
        let mut registry = EngineRegistry::new();
        registry.register(engine);
        let pdf_extractor = Arc::new(FixedTextExtractor(extractor_pages));
        let mut config = PipelineConfig::default();
        config.orchestrator.max_concurrent_per_tenant = capacity;

        let orchestrator = Arc::new(Orchestrator::new(
            artifacts.clone(),
            sessions.clone(),
            blobs.clone(),
            catalog,
            Arc::new(registry),
            pdf_extractor,
            llm,
            config,
        ));
        (orchestrator, artifacts, sessions, blobs)
    }

    fn clean_packing_slip_text() -> String {
        "Packing Slip\n12 ea MTU-OF-4568 MTU Oil Filter\n8 ea KOH-AF-9902 Kohler Air Filter\n15 ea MTU-FF-4569 MTU Fuel Filter".to_string()
    }

    #[tokio::test]
    async fn clean_packing_slip_accepts_without_any_llm_call() {
        let llm = Arc::new(FakeLlmClient { responses: StdMutex::new(Vec::new()) });
        let engine: Arc<dyn OCREngine> = Arc::new(FixedEngine(clean_packing_slip_text()));
        let (orchestrator, _artifacts, sessions, blobs) = orchestrator_with(vec![], engine, llm, 4);

        let a = auth();
        let outcome = orchestrator
            .ingest_artifact(&a, upload_pdf("clean"), None, Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        match outcome {
            IngestOutcome::LineItems { draft_lines, needs_manual_review, session_id, .. } => {
                assert_eq!(draft_lines.len(), 3);
                assert!(!needs_manual_review);
                let session = sessions.load(session_id).await.unwrap().unwrap();
                assert_eq!(session.ledger.llm_calls, 0);
            }
            other => panic!("expected LineItems, got {other:?}"),
        }
        assert_eq!(blobs.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_upload_short_circuits_without_new_blob_or_session() {
        let llm = Arc::new(FakeLlmClient { responses: StdMutex::new(Vec::new()) });
        let engine: Arc<dyn OCREngine> = Arc::new(FixedEngine(clean_packing_slip_text()));
        let (orchestrator, _artifacts, _sessions, blobs) = orchestrator_with(vec![], engine, llm, 4);

        let a = auth();
        let upload = upload_pdf("duplicate-me");
        let first = orchestrator.ingest_artifact(&a, upload.clone(), None, Uuid::new_v4(), Utc::now()).await.unwrap();
        let first_id = match first {
            IngestOutcome::LineItems { artifact_id, .. } => artifact_id,
            other => panic!("expected LineItems, got {other:?}"),
        };

        let second = orchestrator.ingest_artifact(&a, upload, None, Uuid::new_v4(), Utc::now()).await.unwrap();
        assert_eq!(second, IngestOutcome::Duplicate { existing_artifact_id: first_id });
        assert_eq!(blobs.puts.load(Ordering::SeqCst), 1, "duplicate must not write a second blob");
    }

    #[tokio::test]
    async fn low_coverage_escalates_then_accepts_on_confident_mini_result() {
        let llm = Arc::new(FakeLlmClient {
            responses: StdMutex::new(vec![LlmBehavior::Success(serde_json::json!({
                "lines": [
                    {"line_no": 1, "qty": 12.0, "unit": "ea", "description": "MTU Oil Filter", "part_code": "MTU-OF-4568", "confidence": "high"},
                ],
                "notes": null,
            }))]),
        });
        let engine: Arc<dyn OCREngine> = Arc::new(FixedEngine("garbled prose with no structure at all here".to_string()));
        let (orchestrator, _artifacts, sessions, _blobs) = orchestrator_with(vec![], engine, llm, 4);

        let a = auth();
        let outcome = orchestrator
            .ingest_artifact(&a, upload_pdf("messy"), None, Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        match outcome {
            IngestOutcome::LineItems { draft_lines, needs_manual_review, session_id, .. } => {
                assert_eq!(draft_lines.len(), 1);
                assert!(!needs_manual_review, "a confident mini result should not need review");
                let session = sessions.load(session_id).await.unwrap().unwrap();
                assert_eq!(session.ledger.llm_calls, 1);
            }
            other => panic!("expected LineItems, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn low_confidence_mini_result_escalates_to_strong_then_accepts() {
        let llm = Arc::new(FakeLlmClient {
            responses: StdMutex::new(vec![
                LlmBehavior::Success(serde_json::json!({
                    "lines": [{"line_no": 1, "qty": 12.0, "unit": "ea", "description": "Oil Filter", "part_code": "MTU-OF-4568", "confidence": "low"}],
                    "notes": null,
                })),
                LlmBehavior::Success(serde_json::json!({
                    "lines": [{"line_no": 1, "qty": 12.0, "unit": "ea", "description": "MTU Oil Filter", "part_code": "MTU-OF-4568", "confidence": "high"}],
                    "notes": null,
                })),
            ]),
        });
        let engine: Arc<dyn OCREngine> = Arc::new(FixedEngine("garbled prose with no structure at all here".to_string()));
        let (orchestrator, _artifacts, sessions, _blobs) = orchestrator_with(vec![], engine, llm, 4);

        let a = auth();
        let outcome = orchestrator
            .ingest_artifact(&a, upload_pdf("messy-2"), None, Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        match outcome {
            IngestOutcome::LineItems { draft_lines, session_id, .. } => {
                assert_eq!(draft_lines.len(), 1);
                let session = sessions.load(session_id).await.unwrap().unwrap();
                assert_eq!(session.ledger.llm_calls, 2);
            }
            other => panic!("expected LineItems, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn llm_failure_flags_for_manual_review_instead_of_failing_the_ingest() {
        let llm = Arc::new(FakeLlmClient { responses: StdMutex::new(vec![LlmBehavior::Unreachable]) });
        let engine: Arc<dyn OCREngine> = Arc::new(FixedEngine("garbled prose with no structure at all here".to_string()));
        let (orchestrator, _artifacts, _sessions, _blobs) = orchestrator_with(vec![], engine, llm, 4);

        let a = auth();
        let outcome = orchestrator
            .ingest_artifact(&a, upload_pdf("broken"), None, Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        match outcome {
            IngestOutcome::LineItems { needs_manual_review, .. } => assert!(needs_manual_review),
            other => panic!("expected LineItems, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_concurrent_artifact_for_same_tenant_hits_queue_full_at_capacity_one() {
        let llm = Arc::new(FakeLlmClient { responses: StdMutex::new(Vec::new()) });
        let release = Arc::new(Notify::new());
        let engine: Arc<dyn OCREngine> = Arc::new(GatedEngine { text: clean_packing_slip_text(), release: release.clone() });
        let (orchestrator, _artifacts, _sessions, _blobs) = orchestrator_with(vec![], engine, llm, 1);

        let a = auth();
        let orchestrator_bg = orchestrator.clone();
        let a_bg = a;
        let first = tokio::spawn(async move {
            orchestrator_bg.ingest_artifact(&a_bg, upload_pdf("first"), None, Uuid::new_v4(), Utc::now()).await
        });

        // Give the background task a chance to acquire its permit and block
        // inside the gated OCR call before we race a second upload.
        for _ in 0..100 {
            if orchestrator.in_flight(a.tenant_id).await == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(orchestrator.in_flight(a.tenant_id).await, 1);

        let second = orchestrator.ingest_artifact(&a, upload_pdf("second"), None, Uuid::new_v4(), Utc::now()).await;
        assert_eq!(second.unwrap_err().code, ErrorCode::QueueFull);

        release.notify_one();
        let first_outcome = first.await.unwrap().unwrap();
        assert!(matches!(first_outcome, IngestOutcome::LineItems { .. }));
    }

    #[tokio::test]
    async fn shipping_label_path_bills_the_session_and_skips_reconciliation() {
        let llm = Arc::new(FakeLlmClient {
            responses: StdMutex::new(vec![LlmBehavior::Success(serde_json::json!({
                "carrier": "UPS",
                "tracking_number": "1Z999",
                "po_number": null,
                "ship_to": null,
                "ship_from": null,
                "ship_date": null,
                "service_type": "ground",
            }))]),
        });
        let engine: Arc<dyn OCREngine> = Arc::new(FixedEngine("UPS ground shipment label text here".to_string()));
        let (orchestrator, _artifacts, sessions, _blobs) = orchestrator_with(vec![], engine, llm, 4);

        let a = auth();
        let upload = Upload {
            kind: ArtifactKind::ShippingLabel,
            declared_mime: "image/png".to_string(),
            bytes: white_png(),
        };
        let outcome = orchestrator.ingest_artifact(&a, upload, None, Uuid::new_v4(), Utc::now()).await.unwrap();

        match outcome {
            IngestOutcome::ShippingLabel { label, session_id, .. } => {
                assert_eq!(label.carrier.as_deref(), Some("UPS"));
                let session = sessions.load(session_id).await.unwrap().unwrap();
                assert_eq!(session.ledger.llm_calls, 1);
            }
            other => panic!("expected ShippingLabel, got {other:?}"),
        }
    }

    fn white_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(900, 700, image::Rgb([200, 200, 200]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }
}
