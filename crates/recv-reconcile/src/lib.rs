//! Part reconciliation (C9).
//!
//! [`reconcile`] matches one parsed line's candidate part code/description
//! against a tenant catalog snapshot, boosts the base fuzzy score with
//! shopping-list and recent-PO signals, and ranks the result. It is a pure
//! function of its inputs: for a fixed catalog snapshot, shopping list,
//! recent-PO list, and candidate fields, the result is stable (§8
//! "Deterministic reconciliation").

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use recv_config::ReconcileConfig;
use recv_core::{Match, PartRow, ReasonCode, RecentPo, ShoppingListLine};
use uuid::Uuid;

/// Uppercase `s` and strip every non-alphanumeric character, so that
/// `MTU-OF-4568`, `mtu of 4568`, and `MTUOF4568` collide (§4.9 step 1).
#[must_use]
pub fn normalise_code(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Lowercase `s`, split on whitespace, strip leading/trailing punctuation
/// from each token, sort the tokens, and rejoin — a *token-sort* normal
/// form so that word-reordered text still compares favourably.
fn token_sort_key(s: &str) -> String {
    let mut tokens: Vec<String> = s
        .to_lowercase()
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|t| !t.is_empty())
        .collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Token-sort similarity ratio in `[0, 1]`: normalised Levenshtein distance
/// between the two strings' token-sorted forms. A rapid, substring-aware
/// fuzzy metric in the sense that reordered and partially-overlapping
/// token sets still score highly, without the cost of real alignment.
#[must_use]
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let (ka, kb) = (token_sort_key(a), token_sort_key(b));
    if ka.is_empty() && kb.is_empty() {
        return 1.0;
    }
    strsim::normalized_levenshtein(&ka, &kb)
}

/// Which base signal produced the highest score for one catalog candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoredCandidate {
    part_id: Uuid,
    base_score: f64,
    base_reason: ReasonCode,
}

/// Result of reconciling one parsed line against a catalog snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconcileOutcome {
    /// The single best-scoring candidate, if it cleared
    /// [`ReconcileConfig::suggestion_threshold`].
    pub primary: Option<Match>,
    /// Up to [`ReconcileConfig::max_alternatives`] next-best candidates
    /// (including `primary`'s runners-up; `primary` itself is excluded).
    pub alternatives: Vec<Match>,
}

/// Score one catalog row against the candidate code/description, returning
/// the best base signal and which [`ReasonCode`] produced it.
fn score_row(candidate_code: Option<&str>, candidate_description: &str, row: &PartRow) -> (f64, ReasonCode) {
    let fuzzy_desc = token_sort_ratio(candidate_description, &row.description);

    let Some(code) = candidate_code else {
        return (fuzzy_desc, ReasonCode::FuzzyDesc);
    };

    let normalised_candidate = normalise_code(code);
    let normalised_row = normalise_code(&row.code);

    let exact_code = if !normalised_candidate.is_empty() && normalised_candidate == normalised_row {
        1.0
    } else {
        0.0
    };
    let fuzzy_code = token_sort_ratio(&normalised_candidate, &normalised_row);

    let mut best = (exact_code, ReasonCode::ExactCode);
    if fuzzy_code > best.0 {
        best = (fuzzy_code, ReasonCode::FuzzyCode);
    }
    if fuzzy_desc > best.0 {
        best = (fuzzy_desc, ReasonCode::FuzzyDesc);
    }
    best
}

/// Match one parsed line's candidate code/description against a catalog
/// snapshot, boosting scores with shopping-list and recent-PO signals.
///
/// `now` and `config.recent_po_lookback_days` bound which `recent_pos`
/// entries count as "recent"; callers typically pre-filter `recent_pos` via
/// [`recv_core::interfaces::Catalog::recent_pos`] and may pass the full
/// list here regardless, since out-of-window entries are re-checked.
#[must_use]
pub fn reconcile(
    candidate_code: Option<&str>,
    candidate_description: &str,
    parts: &[PartRow],
    shopping_list: &[ShoppingListLine],
    recent_pos: &[RecentPo],
    config: &ReconcileConfig,
    now: DateTime<Utc>,
) -> ReconcileOutcome {
    let lookback_start = now - chrono::Duration::days(config.recent_po_lookback_days);
    let on_shopping_list: std::collections::HashSet<Uuid> =
        shopping_list.iter().filter(|l| l.outstanding_qty > 0.0).map(|l| l.part_id).collect();
    let on_recent_po: std::collections::HashSet<Uuid> = recent_pos
        .iter()
        .filter(|po| po.received_at >= lookback_start)
        .map(|po| po.part_id)
        .collect();

    let mut scored: Vec<ScoredCandidate> = parts
        .iter()
        .map(|row| {
            let (base_score, base_reason) = score_row(candidate_code, candidate_description, row);
            ScoredCandidate { part_id: row.part_id, base_score, base_reason }
        })
        .collect();

    // Stable order by part_id first so that equal-score, equal-recency ties
    // resolve deterministically regardless of catalog iteration order.
    scored.sort_by(|a, b| a.part_id.cmp(&b.part_id));

    let recency_by_id: std::collections::HashMap<Uuid, Option<DateTime<Utc>>> =
        parts.iter().map(|r| (r.part_id, r.last_stock_movement_at)).collect();

    let mut matches: Vec<Match> = scored
        .into_iter()
        .map(|c| {
            let mut score = c.base_score;
            let mut reason_codes = vec![c.base_reason];
            if on_shopping_list.contains(&c.part_id) {
                score += config.shopping_list_boost;
                reason_codes.push(ReasonCode::ShoppingListBoost);
            }
            if on_recent_po.contains(&c.part_id) {
                score += config.recent_po_boost;
                reason_codes.push(ReasonCode::RecentPoBoost);
            }
            Match { part_id: c.part_id, score: score.min(1.0), reason_codes }
        })
        .collect();

    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let ra = recency_by_id.get(&a.part_id).copied().flatten();
                let rb = recency_by_id.get(&b.part_id).copied().flatten();
                rb.cmp(&ra)
            })
            .then_with(|| a.part_id.cmp(&b.part_id))
    });

    let primary = matches
        .first()
        .filter(|m| m.score >= config.suggestion_threshold)
        .cloned();

    let alternatives: Vec<Match> = matches
        .into_iter()
        .filter(|m| primary.as_ref().is_none_or(|p| p.part_id != m.part_id))
        .take(config.max_alternatives)
        .collect();

    ReconcileOutcome { primary, alternatives }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(code: &str, description: &str) -> PartRow {
        PartRow {
            part_id: Uuid::new_v4(),
            code: code.to_string(),
            description: description.to_string(),
            last_stock_movement_at: None,
        }
    }

    #[test]
    fn normalise_code_collides_dashes_spaces_and_case() {
        assert_eq!(normalise_code("MTU-OF-4568"), normalise_code("mtu of 4568"));
        assert_eq!(normalise_code("MTU-OF-4568"), normalise_code("MTUOF4568"));
    }

    #[test]
    fn exact_normalised_code_match_scores_one() {
        let catalog = vec![row("MTU-OF-4568", "MTU Oil Filter")];
        let outcome = reconcile(
            Some("mtu of 4568"),
            "Oil Filter",
            &catalog,
            &[],
            &[],
            &ReconcileConfig::default(),
            Utc::now(),
        );
        let primary = outcome.primary.expect("should qualify");
        assert_eq!(primary.part_id, catalog[0].part_id);
        assert!((primary.score - 1.0).abs() < 1e-9);
        assert!(primary.reason_codes.contains(&ReasonCode::ExactCode));
    }

    #[test]
    fn fuzzy_description_match_without_code() {
        let catalog = vec![row("KOH-AF-9902", "Kohler Air Filter"), row("MTU-FF-4569", "MTU Fuel Filter")];
        let outcome = reconcile(
            None,
            "Kohler Air Filtre",
            &catalog,
            &[],
            &[],
            &ReconcileConfig::default(),
            Utc::now(),
        );
        assert_eq!(outcome.primary.unwrap().part_id, catalog[0].part_id);
    }

    #[test]
    fn shopping_list_boost_is_additive_and_capped() {
        let part_id = Uuid::new_v4();
        let catalog = vec![PartRow {
            part_id,
            code: "MTU-OF-4568".to_string(),
            description: "MTU Oil Filter".to_string(),
            last_stock_movement_at: None,
        }];
        let shopping_list = vec![ShoppingListLine { part_id, outstanding_qty: 5.0 }];
        let outcome = reconcile(
            Some("MTU-OF-4568"),
            "MTU Oil Filter",
            &catalog,
            &shopping_list,
            &[],
            &ReconcileConfig::default(),
            Utc::now(),
        );
        let primary = outcome.primary.unwrap();
        assert!((primary.score - 1.0).abs() < 1e-9, "exact match + boost caps at 1.0");
        assert!(primary.reason_codes.contains(&ReasonCode::ShoppingListBoost));
    }

    #[test]
    fn recent_po_outside_lookback_window_does_not_boost() {
        let part_id = Uuid::new_v4();
        let catalog = vec![PartRow {
            part_id,
            code: "ZZZ-1".to_string(),
            description: "Unrelated widget gadget thingamajig".to_string(),
            last_stock_movement_at: None,
        }];
        let now = Utc::now();
        let recent = vec![RecentPo { part_id, received_at: now - Duration::days(200) }];
        let outcome = reconcile(
            Some("not-a-code-match-at-all"),
            "completely different description text",
            &catalog,
            &[],
            &recent,
            &ReconcileConfig::default(),
            now,
        );
        assert!(outcome.primary.is_none());
        let alt = outcome.alternatives.iter().find(|m| m.part_id == part_id);
        if let Some(m) = alt {
            assert!(!m.reason_codes.contains(&ReasonCode::RecentPoBoost));
        }
    }

    #[test]
    fn no_candidate_qualifies_below_threshold() {
        let catalog = vec![row("AAA-1111", "Totally unrelated part")];
        let outcome = reconcile(
            Some("ZZZ-9999"),
            "nothing like it",
            &catalog,
            &[],
            &[],
            &ReconcileConfig::default(),
            Utc::now(),
        );
        assert!(outcome.primary.is_none());
    }

    #[test]
    fn alternatives_are_capped_and_exclude_primary() {
        let catalog: Vec<PartRow> = (0..6)
            .map(|i| row(&format!("MTU-OF-456{i}"), "MTU Oil Filter"))
            .collect();
        let outcome = reconcile(
            Some("MTU-OF-4568"),
            "MTU Oil Filter",
            &catalog,
            &[],
            &[],
            &ReconcileConfig::default(),
            Utc::now(),
        );
        assert!(outcome.alternatives.len() <= ReconcileConfig::default().max_alternatives);
        if let Some(primary) = &outcome.primary {
            assert!(outcome.alternatives.iter().all(|m| m.part_id != primary.part_id));
        }
    }

    #[test]
    fn ties_break_by_recency_of_last_stock_movement() {
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        let now = Utc::now();
        let catalog = vec![
            PartRow {
                part_id: older,
                code: "SAME-CODE".to_string(),
                description: "same description".to_string(),
                last_stock_movement_at: Some(now - Duration::days(30)),
            },
            PartRow {
                part_id: newer,
                code: "SAME-CODE".to_string(),
                description: "same description".to_string(),
                last_stock_movement_at: Some(now - Duration::days(1)),
            },
        ];
        let outcome = reconcile(
            Some("SAME-CODE"),
            "same description",
            &catalog,
            &[],
            &[],
            &ReconcileConfig::default(),
            now,
        );
        assert_eq!(outcome.primary.unwrap().part_id, newer);
    }

    #[test]
    fn reconcile_is_deterministic_for_fixed_inputs() {
        let catalog = vec![row("MTU-OF-4568", "MTU Oil Filter"), row("KOH-AF-9902", "Kohler Air Filter")];
        let config = ReconcileConfig::default();
        let now = Utc::now();
        let a = reconcile(Some("MTU-OF-4568"), "MTU Oil Filter", &catalog, &[], &[], &config, now);
        let b = reconcile(Some("MTU-OF-4568"), "MTU Oil Filter", &catalog, &[], &[], &config, now);
        assert_eq!(a, b);
    }

    proptest::proptest! {
        #[test]
        fn reconcile_never_panics_on_arbitrary_text(
            code in "[A-Za-z0-9 _-]{0,20}",
            desc in ".{0,40}",
        ) {
            let catalog = vec![row("MTU-OF-4568", "MTU Oil Filter")];
            let _ = reconcile(Some(&code), &desc, &catalog, &[], &[], &ReconcileConfig::default(), Utc::now());
        }
    }
}
