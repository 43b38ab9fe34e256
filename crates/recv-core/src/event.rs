//! The immutable outcome of a session commit.

use crate::draft_line::DraftLine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The immutable outcome of committing a [`crate::session::Session`].
///
/// `session_id` is unique: at most one event exists per session, for life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivingEvent {
    /// Unique identifier.
    pub event_id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Session this event closes out. Unique across all events.
    pub session_id: Uuid,
    /// Actor who performed the commit.
    pub committed_by: Uuid,
    /// Commit timestamp.
    pub committed_at: DateTime<Utc>,
    /// Number of lines snapshotted.
    pub line_count: u32,
    /// Frozen copies of every verified, non-discrepancy line committed.
    pub line_snapshots: Vec<DraftLine>,
}
