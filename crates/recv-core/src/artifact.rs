//! Artifacts: immutable uploaded files, content-addressed within a tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of document an uploaded artifact represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A packing slip: the primary input to the receiving ingestion pipeline.
    PackingSlip,
    /// A shipping label: metadata-only extraction, no reconciliation.
    ShippingLabel,
    /// Photographic evidence attached to a discrepancy.
    DiscrepancyPhoto,
    /// A photo of a physical part (not line-item bearing).
    PartPhoto,
}

impl ArtifactKind {
    /// Mime types accepted for this artifact kind (admission §4.2 step 1).
    ///
    /// Packing slips additionally accept PDF; the remaining kinds are
    /// image-only.
    #[must_use]
    pub fn allowed_mimes(self) -> &'static [&'static str] {
        match self {
            ArtifactKind::PackingSlip => &["image/jpeg", "image/png", "image/heic", "application/pdf"],
            ArtifactKind::ShippingLabel
            | ArtifactKind::DiscrepancyPhoto
            | ArtifactKind::PartPhoto => &["image/jpeg", "image/png", "image/heic"],
        }
    }

    /// Whether this kind is subject to the image dimension floor and quality
    /// gate (admission §4.2 steps 4-5). PDFs are exempt from both.
    #[must_use]
    pub fn is_image_kind_for(self, mime: &str) -> bool {
        mime != "application/pdf"
    }
}

/// An immutable uploaded file, identified by content hash within a tenant.
///
/// `(tenant_id, content_hash)` is unique among non-deleted artifacts.
/// `blob_ref` resolves iff `deleted_at` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique identifier.
    pub artifact_id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// User who performed the upload.
    pub uploader_id: Uuid,
    /// Document kind.
    pub kind: ArtifactKind,
    /// Lowercase hex SHA-256 of the raw byte stream.
    pub content_hash: String,
    /// Declared mime type, validated at admission time.
    pub mime: String,
    /// Raw byte length.
    pub byte_len: u64,
    /// Pixel width, for image kinds.
    pub width: Option<u32>,
    /// Pixel height, for image kinds.
    pub height: Option<u32>,
    /// Quality score in `[0, 100]`, for image kinds. `None` for PDF
    /// artifacts, which are exempt from the quality gate.
    pub quality_score: Option<u8>,
    /// Content-addressed blob reference (`{tenant_id}/{artifact_id}.{ext}`).
    pub blob_ref: String,
    /// When the artifact was accepted.
    pub uploaded_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Artifact {
    /// Whether this artifact is live (not soft-deleted).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// File extension derived from `mime`, used to build `blob_ref`.
    #[must_use]
    pub fn extension_for_mime(mime: &str) -> &'static str {
        match mime {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/heic" => "heic",
            "application/pdf" => "pdf",
            _ => "bin",
        }
    }

    /// Build the content-addressed blob ref for a tenant/artifact/mime triple.
    #[must_use]
    pub fn blob_ref_for(tenant_id: Uuid, artifact_id: Uuid, mime: &str) -> String {
        format!(
            "{tenant_id}/{artifact_id}.{}",
            Self::extension_for_mime(mime)
        )
    }
}
