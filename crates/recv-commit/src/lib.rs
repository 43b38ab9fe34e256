//! Atomic, exactly-once session commit (C11).
//!
//! `commit` re-expresses §4.11's seven-step transaction as two phases: a
//! pure [`plan_commit`] that turns a locked session's verified lines into a
//! data-only [`CommitPlan`] — the "check-then-act inventory updates ->
//! atomic guarded updates" and "dynamic request/response shapes -> closed
//! sum types" design notes applied together — and a single
//! [`CommitStore::execute`] call that an adapter applies as one
//! all-or-nothing database transaction. The core never performs a
//! check-then-act across two separate calls; `execute` receives the whole
//! write set at once.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recv_core::{AuditEntry, AuthContext, DraftLine, Qty, ReceivingEvent, Session, SessionState};
use recv_error::{ErrorCode, PipelineError};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// One atomic stock increment (§4.11 step 3, the receiving-path form; the
/// guarded decrement form for return/consumption paths is out of this
/// crate's primary scope, per spec §4.11 — see `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StockIncrement {
    /// Catalog part whose `on_hand_qty` increases.
    pub part_id: Uuid,
    /// Exact quantity to add.
    pub qty: Qty,
}

/// One finance transaction keyed by `(event_id, line_no)` (§4.11 step 4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinanceEntry {
    /// Line number within the committing session.
    pub line_no: u32,
    /// Catalog part the line resolved to.
    pub part_id: Uuid,
    /// Quantity received.
    pub qty: Qty,
    /// Unit price in USD at commit time.
    pub unit_price: f64,
}

/// One shopping-list receipt update (§4.11 step 5). The store closes the
/// line when `received_qty` reaches its outstanding quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShoppingListReceipt {
    /// Catalog part matched against an open shopping-list line.
    pub part_id: Uuid,
    /// Quantity to apply toward the outstanding amount.
    pub qty: Qty,
}

/// The complete, data-only write set for one commit attempt. An adapter's
/// [`CommitStore::execute`] applies every field atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitPlan {
    /// The event this commit will produce.
    pub event: ReceivingEvent,
    /// Inventory increments to apply.
    pub stock_increments: Vec<StockIncrement>,
    /// Finance transactions to append.
    pub finance_entries: Vec<FinanceEntry>,
    /// Shopping-list receipts to record.
    pub shopping_list_receipts: Vec<ShoppingListReceipt>,
}

/// Build the data-only write set for committing `session`, given its
/// current `lines` and a price/shopping-list snapshot. Performs every
/// precondition check from [`recv_session::check_commit_preconditions`]
/// but does not itself mutate `session` or touch storage.
///
/// # Errors
///
/// Propagates [`recv_session::check_commit_preconditions`]'s errors
/// ([`ErrorCode::Forbidden`], [`ErrorCode::SessionStateViolation`]).
pub fn plan_commit(
    session: &Session,
    lines: &[DraftLine],
    actor_role: recv_core::Role,
    unit_prices: &HashMap<Uuid, f64>,
    shopping_list_open_parts: &HashSet<Uuid>,
    event_id: Uuid,
    committed_by: Uuid,
    now: DateTime<Utc>,
) -> Result<CommitPlan, PipelineError> {
    recv_session::check_commit_preconditions(session, lines, actor_role)?;

    let committable: Vec<&DraftLine> = lines.iter().filter(|l| l.verified && l.discrepancy.is_none()).collect();

    let mut stock_increments = Vec::with_capacity(committable.len());
    let mut finance_entries = Vec::new();
    let mut shopping_list_receipts = Vec::new();

    for line in &committable {
        let Some(part_id) = line.resolved_part_id() else { continue };
        if !line.qty.is_positive() {
            continue;
        }
        stock_increments.push(StockIncrement { part_id, qty: line.qty });
        if let Some(&unit_price) = unit_prices.get(&part_id) {
            finance_entries.push(FinanceEntry { line_no: line.line_no, part_id, qty: line.qty, unit_price });
        }
        if shopping_list_open_parts.contains(&part_id) {
            shopping_list_receipts.push(ShoppingListReceipt { part_id, qty: line.qty });
        }
    }

    let line_snapshots: Vec<DraftLine> = committable.into_iter().cloned().collect();
    let event = ReceivingEvent {
        event_id,
        tenant_id: session.tenant_id,
        session_id: session.session_id,
        committed_by,
        committed_at: now,
        line_count: line_snapshots.len() as u32,
        line_snapshots,
    };

    Ok(CommitPlan { event, stock_increments, finance_entries, shopping_list_receipts })
}

/// The transactional collaborator the commit engine writes through. An
/// adapter implementation is responsible for row locks and atomicity; the
/// core never performs a check then a separate act across two calls.
#[async_trait]
pub trait CommitStore: Send + Sync {
    /// Acquire the session's row lock and return its current state plus its
    /// draft lines. Held (by the adapter, not by this trait's type system)
    /// until the matching [`CommitStore::execute`] call completes.
    async fn lock_and_load(&self, tenant_id: Uuid, session_id: Uuid) -> Result<(Session, Vec<DraftLine>), PipelineError>;

    /// Look up the (unique) event already recorded for `session_id`, if any.
    async fn existing_event(&self, tenant_id: Uuid, session_id: Uuid) -> Result<Option<ReceivingEvent>, PipelineError>;

    /// The tail of the tenant's audit chain: `(seq, entry_hash)` of the
    /// most recent entry, or `None` if the chain is empty.
    async fn audit_tail(&self, tenant_id: Uuid) -> Result<Option<(u64, String)>, PipelineError>;

    /// Apply `plan` and persist `committed_session` and `audit_entry`
    /// atomically: all-or-nothing, and exactly-once per `plan.event.session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Conflict`] if a concurrent commit for the same
    /// session won the race (safe to retry — the retrying caller will
    /// observe the session as already committed on its next
    /// [`CommitStore::lock_and_load`]). Returns
    /// [`ErrorCode::InsufficientStock`] if a guarded decrement in `plan`
    /// would have gone negative.
    async fn execute(&self, plan: &CommitPlan, committed_session: &Session, audit_entry: &AuditEntry) -> Result<(), PipelineError>;
}

/// Outcome of a successful [`commit`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    /// The session's (unique, lifetime) receiving event.
    pub event: ReceivingEvent,
    /// Whether this call found the session already committed and returned
    /// the existing event without any side effects.
    pub already_committed: bool,
}

const MAX_CONFLICT_RETRIES: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(50);

/// Commit `session_id` on behalf of `auth`, retrying up to three times with
/// jitter on a serialisation [`ErrorCode::Conflict`] (§7 "DB serialisation
/// conflicts on commit retry up to three times with jitter").
///
/// `unit_prices` and `shopping_list_open_parts` are a snapshot the caller
/// reads from the `Catalog`-adjacent collaborators before calling `commit`;
/// they are folded into the plan but never mutated here.
///
/// # Errors
///
/// See [`CommitStore::execute`] and [`plan_commit`] for the error kinds
/// this can surface; a [`ErrorCode::Conflict`] that survives all retries is
/// returned to the caller to retry at a higher level.
pub async fn commit(
    store: &dyn CommitStore,
    auth: &AuthContext,
    session_id: Uuid,
    unit_prices: &HashMap<Uuid, f64>,
    shopping_list_open_parts: &HashSet<Uuid>,
    now: DateTime<Utc>,
) -> Result<CommitOutcome, PipelineError> {
    let mut attempt = 0u32;
    loop {
        match commit_once(store, auth, session_id, unit_prices, shopping_list_open_parts, now).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) if err.code == ErrorCode::Conflict && attempt < MAX_CONFLICT_RETRIES => {
                let jitter_ms = u64::from(rand::random::<u16>() % 25);
                let delay = BASE_BACKOFF * 2u32.pow(attempt) + Duration::from_millis(jitter_ms);
                warn!(attempt, delay_ms = delay.as_millis() as u64, %session_id, "retrying commit after serialisation conflict");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn commit_once(
    store: &dyn CommitStore,
    auth: &AuthContext,
    session_id: Uuid,
    unit_prices: &HashMap<Uuid, f64>,
    shopping_list_open_parts: &HashSet<Uuid>,
    now: DateTime<Utc>,
) -> Result<CommitOutcome, PipelineError> {
    let (session, lines) = store.lock_and_load(auth.tenant_id, session_id).await?;

    if session.tenant_id != auth.tenant_id {
        return Err(PipelineError::new(ErrorCode::Forbidden, "session does not belong to the authenticated tenant"));
    }

    if session.state == SessionState::Committed {
        let event = store
            .existing_event(auth.tenant_id, session_id)
            .await?
            .ok_or_else(|| PipelineError::new(ErrorCode::Internal, "session marked committed but no event on record"))?;
        return Ok(CommitOutcome { event, already_committed: true });
    }

    let event_id = Uuid::new_v4();
    let plan = plan_commit(&session, &lines, auth.role, unit_prices, shopping_list_open_parts, event_id, auth.user_id, now)?;

    let tail = store.audit_tail(auth.tenant_id).await?;
    let audit_entry = recv_audit::next_entry(
        auth.tenant_id,
        tail.as_ref().map(|(seq, hash)| (*seq, hash.as_str())),
        auth.user_id,
        "session.commit",
        session_id.to_string(),
        &serde_json::json!({"event_id": plan.event.event_id, "line_count": plan.event.line_count}),
        now,
    )
    .map_err(|e| PipelineError::new(ErrorCode::Internal, "failed to build audit entry").with_source(e))?;

    let mut committed_session = session;
    recv_session::transition_to_committed(&mut committed_session, auth.user_id, now)?;

    store.execute(&plan, &committed_session, &audit_entry).await?;

    Ok(CommitOutcome { event: plan.event, already_committed: false })
}
