//! Draft sessions: the unit of receiving work and its cost ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a [`Session`].
///
/// `committed` and `abandoned` are terminal; all mutations are rejected
/// once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepting artifacts and draft lines; no line verified yet.
    Draft,
    /// At least one line has been verified.
    Verifying,
    /// Committed to inventory/finance/audit state. Terminal.
    Committed,
    /// Cancelled explicitly or auto-abandoned after the TTL. Terminal.
    Abandoned,
}

impl SessionState {
    /// Whether the session accepts no further mutation.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Committed | SessionState::Abandoned)
    }
}

/// Per-session accumulator for LLM usage, enforced by the cost budget
/// planner (component C7). Never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostLedger {
    /// Number of LLM calls made so far this session.
    pub llm_calls: u32,
    /// Total input tokens consumed.
    pub input_tokens: u64,
    /// Total output tokens consumed.
    pub output_tokens: u64,
    /// Total spend in USD.
    pub money_spent: f64,
}

impl CostLedger {
    /// Record the outcome of one completed LLM call.
    #[must_use]
    pub fn record_call(mut self, input_tokens: u64, output_tokens: u64, cost: f64) -> Self {
        self.llm_calls += 1;
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.money_spent += cost;
        self
    }

    /// Total tokens consumed (input + output).
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A unit of receiving work, scoped to one tenant.
///
/// Links a set of artifacts and the draft lines derived from them. Sessions
/// exclusively own their draft lines; artifacts are referenced but owned by
/// the tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier.
    pub session_id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// User who created the session (via the first artifact upload).
    pub created_by: Uuid,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent mutation (used for TTL auto-abandonment).
    pub updated_at: DateTime<Utc>,
    /// Commit timestamp, once committed.
    pub committed_at: Option<DateTime<Utc>>,
    /// Actor who committed the session, once committed.
    pub committed_by: Option<Uuid>,
    /// LLM cost accumulator.
    pub ledger: CostLedger,
    /// Artifacts attached to this session, in upload order.
    pub artifact_ids: Vec<Uuid>,
}

impl Session {
    /// Create a brand-new session in the `draft` state, owning the first
    /// attached artifact.
    #[must_use]
    pub fn new(session_id: Uuid, tenant_id: Uuid, created_by: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            tenant_id,
            created_by,
            state: SessionState::Draft,
            created_at: now,
            updated_at: now,
            committed_at: None,
            committed_by: None,
            ledger: CostLedger::default(),
            artifact_ids: Vec::new(),
        }
    }

    /// Number of attempts already spent against a given artifact this
    /// session's lifetime is tracked by the caller (orchestrator); this
    /// only exposes whether the session itself is still mutable.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_reject_further_mutation() {
        assert!(SessionState::Committed.is_terminal());
        assert!(SessionState::Abandoned.is_terminal());
        assert!(!SessionState::Draft.is_terminal());
        assert!(!SessionState::Verifying.is_terminal());
    }

    #[test]
    fn ledger_accumulates_monotonically() {
        let ledger = CostLedger::default()
            .record_call(100, 50, 0.01)
            .record_call(200, 100, 0.02);
        assert_eq!(ledger.llm_calls, 2);
        assert_eq!(ledger.total_tokens(), 450);
        assert!((ledger.money_spent - 0.03).abs() < 1e-9);
    }
}
