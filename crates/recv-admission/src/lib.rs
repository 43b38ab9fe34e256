//! Admission controller (C2).
//!
//! `admit` runs the ordered checks from the ingestion pipeline's admission
//! gate, short-circuiting on the first failure. A successful admission
//! decides *before* any blob write: it only establishes that the artifact
//! is legally stored, not that downstream extraction will succeed.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recv_config::AdmissionConfig;
use recv_core::{Artifact, ArtifactKind, AuthContext, Role};
use recv_core::interfaces::AdmitDecision;
use recv_error::{ErrorCode, PipelineError};
use uuid::Uuid;

/// A not-yet-persisted upload presented to the admission controller.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Declared artifact kind (determines the mime allow-list).
    pub kind: ArtifactKind,
    /// Mime type the caller claims for `bytes`.
    pub declared_mime: String,
    /// Raw upload body.
    pub bytes: Vec<u8>,
}

/// Per-tenant artifact state the admission controller needs to enforce
/// quota and deduplication. Backed by whatever concrete storage engine a
/// deployment chooses; this workspace only defines the contract.
#[async_trait]
pub trait ArtifactLedger: Send + Sync {
    /// Count non-deleted artifacts uploaded by `tenant_id` at or after `since`.
    async fn count_recent_uploads(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<u32, PipelineError>;

    /// The upload timestamp of the oldest non-deleted artifact counted
    /// toward `tenant_id`'s rolling window (i.e. uploaded at or after
    /// `since`), or `None` if none are counted. Used to compute how many
    /// seconds remain until that artifact ages out and the window admits
    /// one more upload (§7 `QuotaExceeded`'s `retry_after`).
    async fn oldest_counted_upload_at(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, PipelineError>;

    /// Find a non-deleted artifact for `tenant_id` with the given content hash.
    async fn find_by_content_hash(
        &self,
        tenant_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<Uuid>, PipelineError>;
}

/// Sniff `bytes` against `declared_mime` using magic-number prefixes.
///
/// Not a full format validator — only enough to catch a blatantly mismatched
/// or corrupt upload before the more expensive image decode.
fn decode_probe(bytes: &[u8], declared_mime: &str) -> Result<(), PipelineError> {
    let probe = &bytes[..bytes.len().min(65_536)];
    let looks_like = match declared_mime {
        "image/jpeg" => probe.starts_with(&[0xFF, 0xD8, 0xFF]),
        "image/png" => probe.starts_with(b"\x89PNG\r\n\x1a\n"),
        "image/heic" | "image/heif" => probe.len() >= 12 && &probe[4..8] == b"ftyp",
        "application/pdf" => probe.starts_with(b"%PDF-"),
        _ => false,
    };
    if looks_like {
        Ok(())
    } else {
        Err(PipelineError::new(
            ErrorCode::DecodeFailed,
            format!("upload body does not match declared mime '{declared_mime}'"),
        ))
    }
}

/// Run the ordered admission checks and decide whether to admit `upload`.
///
/// # Errors
///
/// Returns the first failing check's [`PipelineError`], whose
/// [`ErrorCode`] identifies which gate rejected the upload.
pub async fn admit(
    ledger: &dyn ArtifactLedger,
    config: &AdmissionConfig,
    auth: &AuthContext,
    upload: &Upload,
    now: DateTime<Utc>,
) -> Result<AdmitDecision, PipelineError> {
    // 1. Mime/format allow-list.
    if !upload.kind.allowed_mimes().contains(&upload.declared_mime.as_str()) {
        return Err(PipelineError::new(
            ErrorCode::UnsupportedMime,
            format!("mime '{}' not allowed for kind {:?}", upload.declared_mime, upload.kind),
        ));
    }

    // 2. Byte length.
    if upload.bytes.len() as u64 > config.max_upload_bytes {
        return Err(PipelineError::new(
            ErrorCode::TooLarge,
            format!(
                "upload is {} bytes, exceeds max of {} bytes",
                upload.bytes.len(),
                config.max_upload_bytes
            ),
        )
        .with_context("byte_len", upload.bytes.len() as u64)
        .with_context("max_bytes", config.max_upload_bytes));
    }

    // 3. Decode probe.
    decode_probe(&upload.bytes, &upload.declared_mime)?;

    let is_pdf = upload.declared_mime == "application/pdf";

    // 4 & 5: dimension floor and quality gate apply only to image kinds.
    let mut quality_score = None;
    if !is_pdf {
        let img = image::load_from_memory(&upload.bytes).map_err(|e| {
            PipelineError::new(ErrorCode::DecodeFailed, "could not decode image body").with_source(e)
        })?;
        use image::GenericImageView;
        let (w, h) = img.dimensions();
        if w < config.min_width_px || h < config.min_height_px {
            return Err(PipelineError::new(
                ErrorCode::TooSmall,
                format!("image is {w}x{h}, below floor of {}x{}", config.min_width_px, config.min_height_px),
            ));
        }

        let report = recv_hash::assess_quality(&upload.bytes, &recv_config::QualityConfig::default())?;
        if report.quality_score < config.min_quality_score {
            return Err(PipelineError::new(
                ErrorCode::LowQuality,
                format!("quality score {:.1} below threshold {:.1}", report.quality_score, config.min_quality_score),
            )
            .with_context("blur", report.sub_scores.blur)
            .with_context("glare", report.sub_scores.glare)
            .with_context("contrast", report.sub_scores.contrast));
        }
        quality_score = Some(report.quality_score.round().clamp(0.0, 255.0) as u8);
    }

    // 6. Per-tenant rolling quota.
    let window_start = now - chrono::Duration::seconds(config.quota_window_secs as i64);
    let recent = ledger.count_recent_uploads(auth.tenant_id, window_start).await?;
    let multiplier = if auth.role.quota_multiplier() > 1 {
        config.hod_quota_multiplier
    } else {
        1
    };
    let effective_max = config.quota_max_uploads * multiplier;
    if recent >= effective_max {
        // retry_after is how long until the oldest upload counted in this
        // window ages out, not the full window length (§7: "retry-after =
        // seconds until the oldest counted artifact leaves the window").
        let retry_after_secs = match ledger.oldest_counted_upload_at(auth.tenant_id, window_start).await? {
            Some(oldest) => {
                let age_secs = now.signed_duration_since(oldest).num_seconds().max(0) as u64;
                config.quota_window_secs.saturating_sub(age_secs)
            }
            None => config.quota_window_secs,
        };
        return Err(PipelineError::new(
            ErrorCode::QuotaExceeded,
            format!("{recent} uploads in the last {}s (max {effective_max})", config.quota_window_secs),
        )
        .with_context("retry_after_secs", retry_after_secs));
    }

    // 7. Dedup lookup.
    let content_hash = recv_hash::content_hash(&upload.bytes);
    if let Some(existing_artifact_id) = ledger.find_by_content_hash(auth.tenant_id, &content_hash).await? {
        return Ok(AdmitDecision::Duplicate { existing_artifact_id });
    }

    let artifact_id = Uuid::new_v4();
    let blob_ref = Artifact::blob_ref_for(auth.tenant_id, artifact_id, &upload.declared_mime);
    let (width, height) = if is_pdf {
        (None, None)
    } else {
        let img = image::load_from_memory(&upload.bytes).expect("decoded above");
        use image::GenericImageView;
        let (w, h) = img.dimensions();
        (Some(w), Some(h))
    };

    let artifact = Artifact {
        artifact_id,
        tenant_id: auth.tenant_id,
        uploader_id: auth.user_id,
        kind: upload.kind,
        content_hash,
        mime: upload.declared_mime.clone(),
        byte_len: upload.bytes.len() as u64,
        width,
        height,
        quality_score,
        blob_ref,
        uploaded_at: now,
        deleted_at: None,
    };

    Ok(AdmitDecision::New { artifact })
}

/// Convenience wrapper for [`Role::quota_multiplier`] kept here to document
/// the admission-specific reading of "HOD role multiplies N by 2": any role
/// whose multiplier is greater than 1 receives `config.hod_quota_multiplier`,
/// not the role's own multiplier value, since the quota knob is configured
/// independently of the auth-capability multiplier.
pub fn effective_quota(config: &AdmissionConfig, role: Role) -> u32 {
    if role.quota_multiplier() > 1 {
        config.quota_max_uploads * config.hod_quota_multiplier
    } else {
        config.quota_max_uploads
    }
}
