//! Append-only, chained-hash audit entries (data model only).
//!
//! Chain construction and verification live in the `recv-audit` crate; this
//! module defines only the persisted shape, so that any crate holding a
//! `Vec<AuditEntry>` can be typed without depending on the chaining logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single append-only audit record.
///
/// `entry_hash = SHA256(prev_hash || payload_hash)`, where `prev_hash` is the
/// previous entry's `entry_hash` for the same tenant (or the all-zero hash
/// for the first entry). Any row update after insertion is a correctness bug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic per-tenant sequence number.
    pub seq: u64,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Actor who performed the audited action.
    pub actor_id: Uuid,
    /// Action name (e.g. `"session.commit"`, `"artifact.upload"`).
    pub action: String,
    /// Target entity identifier (e.g. a session or artifact id, as a string).
    pub target: String,
    /// Hex-encoded SHA-256 hash of the previous entry in this tenant's chain.
    pub prev_hash: String,
    /// Hex-encoded SHA-256 hash of the canonical action/actor/target/body/time payload.
    pub payload_hash: String,
    /// Hex-encoded SHA-256 of `prev_hash || payload_hash`.
    pub entry_hash: String,
    /// When this entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// The hash used as `prev_hash` for the first entry in a tenant's chain.
pub const ZERO_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";
