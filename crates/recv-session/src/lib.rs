//! Draft session lifecycle and state machine (C10).
//!
//! ```text
//!             +----------------- abandon -----------------+
//!             v                                            |
//! [none] --create--> draft --first-verify--> verifying --commit--> committed
//!                      ^  |                      |
//!                      +--+ attach-artifact       +-- more verifications
//! ```
//!
//! This crate owns the *decision* of whether a transition is legal; it does
//! not itself persist anything or acquire locks — a caller (typically
//! `recv-orchestrator` or `recv-commit`) holds the session row lock around
//! whichever of these functions it calls, per §5's "mutated only under a
//! per-session lock" rule.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use recv_config::SessionConfig;
use recv_core::{DraftLine, Role, Session, SessionState};
use recv_error::{ErrorCode, PipelineError};
use uuid::Uuid;

/// Create a brand-new session owning `artifact_id` as its first artifact.
#[must_use]
pub fn create(session_id: Uuid, tenant_id: Uuid, created_by: Uuid, artifact_id: Uuid, now: DateTime<Utc>) -> Session {
    let mut session = Session::new(session_id, tenant_id, created_by, now);
    session.artifact_ids.push(artifact_id);
    session
}

/// Attach another artifact to an existing, non-terminal session.
///
/// # Errors
///
/// Returns [`ErrorCode::SessionStateViolation`] if the session is
/// `committed` or `abandoned`.
pub fn attach_artifact(session: &mut Session, artifact_id: Uuid, now: DateTime<Utc>) -> Result<(), PipelineError> {
    require_mutable(session)?;
    session.artifact_ids.push(artifact_id);
    session.updated_at = now;
    Ok(())
}

/// Record that a line in this session has just been verified, promoting
/// `draft -> verifying` on the *first* such call. Idempotent once already
/// `verifying`.
///
/// # Errors
///
/// Returns [`ErrorCode::SessionStateViolation`] if the session is terminal.
pub fn record_line_verified(session: &mut Session, now: DateTime<Utc>) -> Result<(), PipelineError> {
    require_mutable(session)?;
    if session.state == SessionState::Draft {
        session.state = SessionState::Verifying;
    }
    session.updated_at = now;
    Ok(())
}

/// Explicitly cancel a non-terminal session.
///
/// # Errors
///
/// Returns [`ErrorCode::SessionStateViolation`] if the session is already
/// terminal.
pub fn abandon(session: &mut Session, now: DateTime<Utc>) -> Result<(), PipelineError> {
    require_mutable(session)?;
    session.state = SessionState::Abandoned;
    session.updated_at = now;
    Ok(())
}

/// Whether a `draft`/`verifying` session has been idle past
/// [`SessionConfig::ttl_secs`] and is eligible for auto-abandonment.
#[must_use]
pub fn is_ttl_expired(session: &Session, config: &SessionConfig, now: DateTime<Utc>) -> bool {
    !session.state.is_terminal()
        && now.signed_duration_since(session.updated_at) >= chrono::Duration::seconds(config.ttl_secs as i64)
}

/// Auto-abandon `session` if it has exceeded its idle TTL, returning
/// whether the transition was applied.
pub fn auto_abandon_if_expired(session: &mut Session, config: &SessionConfig, now: DateTime<Utc>) -> bool {
    if is_ttl_expired(session, config, now) {
        session.state = SessionState::Abandoned;
        session.updated_at = now;
        true
    } else {
        false
    }
}

fn require_mutable(session: &Session) -> Result<(), PipelineError> {
    if session.state.is_terminal() {
        Err(PipelineError::new(
            ErrorCode::SessionStateViolation,
            format!("session {} is {:?} and accepts no further mutation", session.session_id, session.state),
        ))
    } else {
        Ok(())
    }
}

/// Validate that `session` and `lines` satisfy every precondition §4.10/§4.11
/// impose on a commit, *without* mutating or persisting anything. The
/// commit engine calls this under the session's row lock before performing
/// the atomic transaction.
///
/// Preconditions, in order:
/// 1. `actor_role` holds the commit capability ([`Role::can_commit`]).
/// 2. The session is already `committed` (idempotent retry — returns Ok so
///    the caller can short-circuit to `AlreadyCommitted` handling) or is
///    exactly `verifying`.
/// 3. At least one line is verified.
/// 4. Every discrepancy requiring evidence (`damaged`/`missing`) has it.
///
/// # Errors
///
/// Returns [`ErrorCode::Forbidden`] if the actor lacks the commit
/// capability, or [`ErrorCode::SessionStateViolation`] if the session is
/// not in a committable state, has no verified lines, or a discrepancy
/// gate fails.
pub fn check_commit_preconditions(session: &Session, lines: &[DraftLine], actor_role: Role) -> Result<(), PipelineError> {
    if !actor_role.can_commit() {
        return Err(PipelineError::new(
            ErrorCode::Forbidden,
            format!("role {actor_role:?} does not hold the commit capability"),
        ));
    }

    match session.state {
        SessionState::Committed => return Ok(()),
        SessionState::Verifying => {}
        other => {
            return Err(PipelineError::new(
                ErrorCode::SessionStateViolation,
                format!("cannot commit a session in state {other:?}"),
            ));
        }
    }

    if !lines.iter().any(|l| l.verified) {
        return Err(PipelineError::new(
            ErrorCode::SessionStateViolation,
            "session has no verified lines",
        ));
    }

    if let Some(blocking) = lines.iter().find(|l| l.verified && l.blocks_commit()) {
        return Err(PipelineError::new(
            ErrorCode::SessionStateViolation,
            format!("line {} has a discrepancy requiring evidence with none attached", blocking.line_id),
        ));
    }

    Ok(())
}

/// Apply the `verifying -> committed` transition. Callers must have already
/// run [`check_commit_preconditions`] (and hold the row lock) — this
/// function only mutates fields, it re-derives nothing.
///
/// # Errors
///
/// Returns [`ErrorCode::SessionStateViolation`] if `session` is not
/// `verifying`.
pub fn transition_to_committed(session: &mut Session, committed_by: Uuid, now: DateTime<Utc>) -> Result<(), PipelineError> {
    if session.state != SessionState::Verifying {
        return Err(PipelineError::new(
            ErrorCode::SessionStateViolation,
            format!("cannot transition session {} to committed from {:?}", session.session_id, session.state),
        ));
    }
    session.state = SessionState::Committed;
    session.committed_at = Some(now);
    session.committed_by = Some(committed_by);
    session.updated_at = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recv_core::{Discrepancy, DiscrepancyKind, Qty, Unit};

    fn new_session(state: SessionState) -> Session {
        let mut s = create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        s.state = state;
        s
    }

    fn verified_line(discrepancy: Option<Discrepancy>) -> DraftLine {
        DraftLine {
            line_id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            source_artifact_id: Uuid::nil(),
            line_no: 0,
            qty: Qty::whole(1),
            unit: Some(Unit::Each),
            description: "widget".into(),
            extracted_part_code: None,
            suggested_match: None,
            alternative_matches: vec![],
            verified: true,
            verified_by: Some(Uuid::new_v4()),
            verified_at: Some(Utc::now()),
            override_part_id: None,
            discrepancy,
            catalog_snapshot_id: Uuid::nil(),
            parser_version: "v1".into(),
            planner_decisions: vec![],
            needs_manual_review: false,
        }
    }

    #[test]
    fn first_verification_promotes_draft_to_verifying() {
        let mut session = new_session(SessionState::Draft);
        record_line_verified(&mut session, Utc::now()).unwrap();
        assert_eq!(session.state, SessionState::Verifying);
    }

    #[test]
    fn second_verification_is_a_no_op_transition() {
        let mut session = new_session(SessionState::Verifying);
        record_line_verified(&mut session, Utc::now()).unwrap();
        assert_eq!(session.state, SessionState::Verifying);
    }

    #[test]
    fn terminal_sessions_reject_attach_and_verify() {
        let mut committed = new_session(SessionState::Committed);
        assert_eq!(attach_artifact(&mut committed, Uuid::new_v4(), Utc::now()).unwrap_err().code, ErrorCode::SessionStateViolation);
        let mut abandoned = new_session(SessionState::Abandoned);
        assert_eq!(record_line_verified(&mut abandoned, Utc::now()).unwrap_err().code, ErrorCode::SessionStateViolation);
    }

    #[test]
    fn ttl_expiry_abandons_idle_draft_session() {
        let mut session = new_session(SessionState::Draft);
        session.updated_at = Utc::now() - chrono::Duration::hours(73);
        let config = SessionConfig::default();
        assert!(auto_abandon_if_expired(&mut session, &config, Utc::now()));
        assert_eq!(session.state, SessionState::Abandoned);
    }

    #[test]
    fn ttl_not_yet_expired_leaves_session_untouched() {
        let mut session = new_session(SessionState::Draft);
        session.updated_at = Utc::now();
        let config = SessionConfig::default();
        assert!(!auto_abandon_if_expired(&mut session, &config, Utc::now()));
        assert_eq!(session.state, SessionState::Draft);
    }

    #[test]
    fn non_hod_cannot_satisfy_commit_preconditions() {
        let session = new_session(SessionState::Verifying);
        let lines = vec![verified_line(None)];
        let err = check_commit_preconditions(&session, &lines, Role::Crew).unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
    }

    #[test]
    fn draft_session_cannot_commit() {
        let session = new_session(SessionState::Draft);
        let lines = vec![verified_line(None)];
        let err = check_commit_preconditions(&session, &lines, Role::Hod).unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionStateViolation);
    }

    #[test]
    fn no_verified_lines_blocks_commit() {
        let session = new_session(SessionState::Verifying);
        let mut line = verified_line(None);
        line.verified = false;
        let err = check_commit_preconditions(&session, &[line], Role::Hod).unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionStateViolation);
    }

    #[test]
    fn damaged_discrepancy_without_evidence_blocks_commit() {
        let session = new_session(SessionState::Verifying);
        let lines = vec![verified_line(Some(Discrepancy {
            kind: DiscrepancyKind::Damaged,
            note: "dented box".into(),
            evidence_artifact_ids: vec![],
        }))];
        let err = check_commit_preconditions(&session, &lines, Role::Hod).unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionStateViolation);
    }

    #[test]
    fn damaged_discrepancy_with_evidence_allows_commit() {
        let session = new_session(SessionState::Verifying);
        let lines = vec![verified_line(Some(Discrepancy {
            kind: DiscrepancyKind::Damaged,
            note: "dented box".into(),
            evidence_artifact_ids: vec![Uuid::new_v4()],
        }))];
        assert!(check_commit_preconditions(&session, &lines, Role::Hod).is_ok());
    }

    #[test]
    fn wrong_item_discrepancy_commits_without_evidence() {
        let session = new_session(SessionState::Verifying);
        let lines = vec![verified_line(Some(Discrepancy {
            kind: DiscrepancyKind::WrongItem,
            note: "wrong filter".into(),
            evidence_artifact_ids: vec![],
        }))];
        assert!(check_commit_preconditions(&session, &lines, Role::Hod).is_ok());
    }

    #[test]
    fn already_committed_session_is_idempotently_ok() {
        let session = new_session(SessionState::Committed);
        assert!(check_commit_preconditions(&session, &[], Role::Hod).is_ok());
    }

    #[test]
    fn transition_to_committed_sets_fields_and_rejects_wrong_state() {
        let mut session = new_session(SessionState::Verifying);
        let actor = Uuid::new_v4();
        let now = Utc::now();
        transition_to_committed(&mut session, actor, now).unwrap();
        assert_eq!(session.state, SessionState::Committed);
        assert_eq!(session.committed_by, Some(actor));
        assert_eq!(session.committed_at, Some(now));

        let err = transition_to_committed(&mut session, actor, now).unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionStateViolation);
    }
}
