//! Append-only, chained-hash audit log (C12).
//!
//! Builds on [`recv_core::AuditEntry`], which defines only the persisted
//! shape. This crate owns the one thing that must never be gotten wrong:
//! `entry_hash = SHA256(prev_hash || payload_hash)`, chained per tenant.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use recv_core::{AuditEntry, ZERO_HASH};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Errors surfaced by [`AuditChain::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The chain has no entries.
    EmptyChain,
    /// An entry's recomputed payload hash does not match its stored one.
    PayloadHashMismatch {
        /// Sequence number of the offending entry.
        seq: u64,
    },
    /// An entry's `entry_hash` does not equal `SHA256(prev_hash || payload_hash)`.
    EntryHashMismatch {
        /// Sequence number of the offending entry.
        seq: u64,
    },
    /// An entry's `prev_hash` does not equal the previous entry's `entry_hash`.
    BrokenLink {
        /// Sequence number of the offending entry.
        seq: u64,
    },
    /// Sequence numbers are not contiguous starting at 1.
    NonContiguousSequence {
        /// Sequence number that broke contiguity.
        seq: u64,
    },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyChain => write!(f, "audit chain is empty"),
            Self::PayloadHashMismatch { seq } => write!(f, "payload hash mismatch at seq {seq}"),
            Self::EntryHashMismatch { seq } => write!(f, "entry hash mismatch at seq {seq}"),
            Self::BrokenLink { seq } => write!(f, "broken hash link at seq {seq}"),
            Self::NonContiguousSequence { seq } => write!(f, "non-contiguous sequence at seq {seq}"),
        }
    }
}

impl std::error::Error for ChainError {}

/// Hex-encoded SHA-256 of `data`.
fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Canonical payload hash for one audit action.
///
/// The payload is serialised with `serde_json`; callers are responsible for
/// passing a type whose field order is stable across the process (true for
/// any plain struct, since `serde_json` emits struct fields in declaration
/// order).
fn payload_hash(
    actor_id: Uuid,
    action: &str,
    target: &str,
    body: &impl Serialize,
    recorded_at: DateTime<Utc>,
) -> Result<String, serde_json::Error> {
    let body_json = serde_json::to_string(body)?;
    let combined = format!("{actor_id}|{action}|{target}|{body_json}|{}", recorded_at.to_rfc3339());
    Ok(sha256_hex(combined.as_bytes()))
}

/// Build the next entry in a tenant's chain given only its tail — the
/// sequence number and `entry_hash` of the previous entry (or `None` for
/// the first entry in the chain), without requiring the full entry history
/// in memory. [`AuditChain::append`] is built on top of this; callers that
/// only persist the latest entry per tenant (the common case for a
/// database-backed chain) can call it directly.
///
/// # Errors
///
/// Returns a `serde_json::Error` if `body` cannot be serialised.
pub fn next_entry(
    tenant_id: Uuid,
    tail: Option<(u64, &str)>,
    actor_id: Uuid,
    action: impl Into<String>,
    target: impl Into<String>,
    body: &impl Serialize,
    recorded_at: DateTime<Utc>,
) -> Result<AuditEntry, serde_json::Error> {
    let action = action.into();
    let target = target.into();
    let (seq, prev_hash) = match tail {
        Some((seq, hash)) => (seq + 1, hash.to_string()),
        None => (1, ZERO_HASH.to_string()),
    };
    let payload_hash = payload_hash(actor_id, &action, &target, body, recorded_at)?;
    let entry_hash = sha256_hex(format!("{prev_hash}{payload_hash}").as_bytes());

    Ok(AuditEntry {
        seq,
        tenant_id,
        actor_id,
        action,
        target,
        prev_hash,
        payload_hash,
        entry_hash,
        recorded_at,
    })
}

/// An ordered, per-tenant audit entry chain.
#[derive(Debug, Clone)]
pub struct AuditChain {
    tenant_id: Uuid,
    entries: Vec<AuditEntry>,
}

impl AuditChain {
    /// Create an empty chain for `tenant_id`.
    #[must_use]
    pub fn new(tenant_id: Uuid) -> Self {
        Self { tenant_id, entries: Vec::new() }
    }

    /// Rehydrate a chain from previously persisted entries, in order.
    ///
    /// Does not itself verify the chain; call [`AuditChain::verify`] after
    /// loading from storage if that guarantee is needed.
    #[must_use]
    pub fn from_entries(tenant_id: Uuid, entries: Vec<AuditEntry>) -> Self {
        Self { tenant_id, entries }
    }

    /// Append a new entry recording `actor_id` performing `action` against
    /// `target`, with `body` folded into the payload hash.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if `body` cannot be serialised.
    pub fn append(
        &mut self,
        actor_id: Uuid,
        action: impl Into<String>,
        target: impl Into<String>,
        body: &impl Serialize,
        recorded_at: DateTime<Utc>,
    ) -> Result<&AuditEntry, serde_json::Error> {
        let tail = self.entries.last().map(|e| (e.seq, e.entry_hash.as_str()));
        let entry = next_entry(self.tenant_id, tail, actor_id, action, target, body, recorded_at)?;
        self.entries.push(entry);
        Ok(self.entries.last().expect("just pushed"))
    }

    /// Verify hash-chain integrity and sequence contiguity.
    ///
    /// # Errors
    ///
    /// Returns the first [`ChainError`] encountered, in chain order.
    pub fn verify(&self) -> Result<(), ChainError> {
        if self.entries.is_empty() {
            return Err(ChainError::EmptyChain);
        }
        let mut expected_prev = ZERO_HASH.to_string();
        for (i, entry) in self.entries.iter().enumerate() {
            let expected_seq = i as u64 + 1;
            if entry.seq != expected_seq {
                return Err(ChainError::NonContiguousSequence { seq: entry.seq });
            }
            if entry.prev_hash != expected_prev {
                return Err(ChainError::BrokenLink { seq: entry.seq });
            }
            let recomputed_entry_hash =
                sha256_hex(format!("{}{}", entry.prev_hash, entry.payload_hash).as_bytes());
            if recomputed_entry_hash != entry.entry_hash {
                return Err(ChainError::EntryHashMismatch { seq: entry.seq });
            }
            expected_prev = entry.entry_hash.clone();
        }
        Ok(())
    }

    /// Number of entries in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the chain has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recently appended entry, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&AuditEntry> {
        self.entries.last()
    }

    /// Borrow all entries in chain order.
    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }
}
