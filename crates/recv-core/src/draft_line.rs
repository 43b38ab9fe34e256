//! Draft lines: candidate inventory lines awaiting user verification.

use crate::quantity::{Qty, Unit};
use crate::session::CostLedger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a reconciliation [`Match`] was proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Normalised part code matched a catalog row exactly.
    ExactCode,
    /// Fuzzy part-code similarity was the best-scoring signal.
    FuzzyCode,
    /// Fuzzy description similarity was the best-scoring signal.
    FuzzyDesc,
    /// Boosted because the part appears on an open shopping list.
    ShoppingListBoost,
    /// Boosted because the part was received on a recent purchase order.
    RecentPoBoost,
}

/// A candidate catalog match produced by reconciliation (component C9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Catalog part identifier.
    pub part_id: Uuid,
    /// Combined score in `[0, 1]`.
    pub score: f64,
    /// Signals that contributed to this match.
    pub reason_codes: Vec<ReasonCode>,
}

/// Discrepancy kind recorded against a draft line.
///
/// Only `damaged` and `missing` require evidence before commit; `wrong_item`
/// may commit without evidence (§9 Open Questions — tightened, not loosened,
/// from the ambiguous source behaviour).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Part arrived damaged.
    Damaged,
    /// Part was expected but not present in the shipment.
    Missing,
    /// A different part arrived than what was ordered/described.
    WrongItem,
}

impl DiscrepancyKind {
    /// Whether this kind requires at least one evidence artifact before the
    /// owning session may commit.
    #[must_use]
    pub fn requires_evidence(self) -> bool {
        matches!(self, DiscrepancyKind::Damaged | DiscrepancyKind::Missing)
    }
}

/// A discrepancy attached to a draft line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Discrepancy kind.
    pub kind: DiscrepancyKind,
    /// Free-text note from the verifying user.
    pub note: String,
    /// Evidence photos attached to support the claim.
    pub evidence_artifact_ids: Vec<Uuid>,
}

impl Discrepancy {
    /// Whether this discrepancy satisfies the commit-time evidence gate.
    #[must_use]
    pub fn satisfies_evidence_gate(&self) -> bool {
        !self.kind.requires_evidence() || !self.evidence_artifact_ids.is_empty()
    }
}

/// One planner decision recorded for reproducibility (§6 persisted formats).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerDecisionRecord {
    /// Pipeline stage that produced the decision (e.g. `"parse"`, `"plan"`).
    pub stage: String,
    /// Human-readable decision label (e.g. `"accept"`, `"normalise:mini"`).
    pub decision: String,
    /// Ledger snapshot immediately after this decision was applied.
    pub ledger_snapshot: CostLedger,
}

/// A candidate inventory line awaiting user verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftLine {
    /// Unique identifier.
    pub line_id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Artifact this line was extracted from.
    pub source_artifact_id: Uuid,
    /// Append order within the session (reflects upload order across
    /// artifacts; never globally renumbered).
    pub line_no: u32,
    /// Parsed quantity. Invariant: always `> 0`.
    pub qty: Qty,
    /// Normalised unit, or `None` if it could not be mapped to the closed set.
    pub unit: Option<Unit>,
    /// Free-text description as extracted.
    pub description: String,
    /// Part code as extracted, prior to reconciliation normalisation.
    pub extracted_part_code: Option<String>,
    /// Best catalog match, if any qualified (`score >= 0.80`).
    pub suggested_match: Option<Match>,
    /// Up to 3 next-best catalog matches.
    pub alternative_matches: Vec<Match>,
    /// Whether a user has verified this line.
    pub verified: bool,
    /// User who verified this line.
    pub verified_by: Option<Uuid>,
    /// When this line was verified.
    pub verified_at: Option<DateTime<Utc>>,
    /// User-selected override, superseding `suggested_match`.
    pub override_part_id: Option<Uuid>,
    /// Discrepancy, if the verifying user flagged one.
    pub discrepancy: Option<Discrepancy>,
    /// Catalog snapshot this line was reconciled against.
    pub catalog_snapshot_id: Uuid,
    /// Row-parser pattern-bank version used to produce this line.
    pub parser_version: String,
    /// Compact trail of planner decisions, for reproducibility.
    pub planner_decisions: Vec<PlannerDecisionRecord>,
    /// Set by the cost-budget planner when `AcceptPartial` was chosen.
    pub needs_manual_review: bool,
}

impl DraftLine {
    /// The catalog part id this line would commit against: the user's
    /// override if present, otherwise the reconciled suggestion.
    #[must_use]
    pub fn resolved_part_id(&self) -> Option<Uuid> {
        self.override_part_id
            .or_else(|| self.suggested_match.as_ref().map(|m| m.part_id))
    }

    /// Whether this line carries a discrepancy that blocks commit in the
    /// absence of evidence.
    #[must_use]
    pub fn blocks_commit(&self) -> bool {
        self.discrepancy
            .as_ref()
            .is_some_and(|d| !d.satisfies_evidence_gate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Qty;

    fn base_line() -> DraftLine {
        DraftLine {
            line_id: Uuid::nil(),
            session_id: Uuid::nil(),
            source_artifact_id: Uuid::nil(),
            line_no: 0,
            qty: Qty::whole(1),
            unit: Some(Unit::Each),
            description: "widget".into(),
            extracted_part_code: None,
            suggested_match: None,
            alternative_matches: vec![],
            verified: false,
            verified_by: None,
            verified_at: None,
            override_part_id: None,
            discrepancy: None,
            catalog_snapshot_id: Uuid::nil(),
            parser_version: "v1".into(),
            planner_decisions: vec![],
            needs_manual_review: false,
        }
    }

    #[test]
    fn damaged_without_evidence_blocks_commit() {
        let mut line = base_line();
        line.discrepancy = Some(Discrepancy {
            kind: DiscrepancyKind::Damaged,
            note: "dented".into(),
            evidence_artifact_ids: vec![],
        });
        assert!(line.blocks_commit());

        line.discrepancy.as_mut().unwrap().evidence_artifact_ids.push(Uuid::new_v4());
        assert!(!line.blocks_commit());
    }

    #[test]
    fn wrong_item_never_requires_evidence() {
        let mut line = base_line();
        line.discrepancy = Some(Discrepancy {
            kind: DiscrepancyKind::WrongItem,
            note: "got the wrong filter".into(),
            evidence_artifact_ids: vec![],
        });
        assert!(!line.blocks_commit());
    }

    #[test]
    fn override_wins_over_suggestion() {
        let mut line = base_line();
        let suggested = Uuid::new_v4();
        let overridden = Uuid::new_v4();
        line.suggested_match = Some(Match {
            part_id: suggested,
            score: 0.9,
            reason_codes: vec![ReasonCode::ExactCode],
        });
        assert_eq!(line.resolved_part_id(), Some(suggested));
        line.override_part_id = Some(overridden);
        assert_eq!(line.resolved_part_id(), Some(overridden));
    }
}
