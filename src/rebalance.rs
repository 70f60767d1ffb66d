//! Rebalance decision and composition diffing.
//!
//! The decision is a pure function re-evaluated fresh on each run; it holds
//! no memory of prior rebalances. The differ turns the decision into an
//! auditable list of reasoned entries and exits.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::config::{RebalancePolicy, UpsideVariant};
use crate::model::{
    Candidate, ChangeAction, CompositionChange, CompositionEntry, HeldPosition, RejectionStage,
    ScreeningOutcome,
};
use crate::screening::select::AdmissionVia;

/// Outcome of the rebalance decision.
#[derive(Debug, Clone)]
pub struct Decision {
    pub rebalance: bool,
    /// Overall reason a rebalance occurred, or why none did
    pub reason: String,
    /// Entering candidate whose upside advantage over the worst held
    /// instrument exceeded the threshold, if any
    pub threshold_trigger: Option<String>,
}

/// Upside of a candidate under the configured variant. The default takes
/// the maximum across all valuation models.
fn upside_for(candidate: &Candidate, variant: &UpsideVariant) -> Option<f64> {
    match variant {
        UpsideVariant::Best => candidate
            .upsides_by_model
            .values()
            .copied()
            .fold(None, |best: Option<f64>, v| {
                Some(best.map_or(v, |b| b.max(v)))
            })
            .or(candidate.upside),
        UpsideVariant::Model(name) => candidate.upsides_by_model.get(name).copied(),
    }
}

/// Decide whether the proposed basket should replace the current one.
///
/// Triggers, any of which forces a rebalance:
/// - the proposed and current ticker sets differ in size or membership;
/// - with `check_quality`, a held instrument failed this run's quality gates.
///
/// The upside-gap threshold is evaluated over the entering candidates only,
/// so the differ can annotate the responsible entry. An entering candidate
/// implies a membership change, so the gap never fires on its own and an
/// unchanged composition always holds; a high-upside candidate that lost a
/// capacity race must not churn the store run after run.
pub fn decide(
    current: &[HeldPosition],
    outcome: &ScreeningOutcome,
    policy: &RebalancePolicy,
) -> Decision {
    let current_set: HashSet<&str> = current.iter().map(|p| p.ticker.as_str()).collect();
    let proposed_set: HashSet<&str> = outcome
        .selected
        .iter()
        .map(|c| c.ticker.as_str())
        .collect();

    // Evaluated for annotation only: the differ marks the entering
    // candidate whose upside gap exceeds the threshold.
    let threshold_trigger = find_threshold_trigger(&current_set, outcome, policy);

    if current.is_empty() {
        return Decision {
            rebalance: true,
            reason: format!(
                "initial composition with {} instruments",
                outcome.selected.len()
            ),
            threshold_trigger,
        };
    }

    if current_set != proposed_set {
        let entering = proposed_set.difference(&current_set).count();
        let exiting = current_set.difference(&proposed_set).count();
        return Decision {
            rebalance: true,
            reason: format!(
                "membership changed: {entering} entering, {exiting} exiting"
            ),
            threshold_trigger,
        };
    }

    if policy.check_quality {
        let failed: Vec<&str> = current
            .iter()
            .filter(|p| {
                matches!(
                    outcome.rejections.get(&p.ticker),
                    Some(RejectionStage::Quality { .. })
                )
            })
            .map(|p| p.ticker.as_str())
            .collect();
        if !failed.is_empty() {
            return Decision {
                rebalance: true,
                reason: format!("held instruments failed quality checks: {}", failed.join(", ")),
                threshold_trigger,
            };
        }
    }

    Decision {
        rebalance: false,
        reason: "membership unchanged".to_string(),
        threshold_trigger: None,
    }
}

/// Ticker of the best entering candidate (proposed but not currently held)
/// whose upside beats the worst held candidate's by more than the
/// threshold, if any.
fn find_threshold_trigger(
    current_set: &HashSet<&str>,
    outcome: &ScreeningOutcome,
    policy: &RebalancePolicy,
) -> Option<String> {
    let best_new = outcome
        .selected
        .iter()
        .filter(|c| !current_set.contains(c.ticker.as_str()))
        .filter_map(|c| upside_for(c, &policy.upside_variant).map(|u| (c, u)))
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))?;

    let worst_held = outcome
        .before_selection
        .iter()
        .filter(|c| current_set.contains(c.ticker.as_str()))
        .filter_map(|c| upside_for(c, &policy.upside_variant))
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))?;

    let gap = best_new.1 - worst_held;
    if gap > policy.threshold * 100.0 {
        debug!(
            ticker = %best_new.0.ticker,
            gap = format!("{gap:.2}"),
            threshold = format!("{:.2}", policy.threshold * 100.0),
            "Upside gap exceeds rebalance threshold"
        );
        Some(best_new.0.ticker.clone())
    } else {
        None
    }
}

/// Emit one EXIT record per ticker leaving the basket and one ENTRY record
/// per ticker joining it, each with the specific stage or rank that caused
/// the change.
pub fn diff(
    current: &[HeldPosition],
    proposed: &[CompositionEntry],
    outcome: &ScreeningOutcome,
    admissions: &HashMap<String, AdmissionVia>,
    decision: &Decision,
) -> Vec<CompositionChange> {
    let proposed_set: HashSet<&str> = proposed.iter().map(|e| e.ticker.as_str()).collect();
    let current_set: HashSet<&str> = current.iter().map(|p| p.ticker.as_str()).collect();

    let mut changes = Vec::new();

    for held in current {
        if !proposed_set.contains(held.ticker.as_str()) {
            changes.push(CompositionChange {
                action: ChangeAction::Exit,
                ticker: held.ticker.clone(),
                reason: exit_reason(&held.ticker, outcome),
            });
        }
    }

    for (rank, entry) in proposed.iter().enumerate() {
        if !current_set.contains(entry.ticker.as_str()) {
            changes.push(CompositionChange {
                action: ChangeAction::Entry,
                ticker: entry.ticker.clone(),
                reason: entry_reason(rank, &entry.ticker, outcome, admissions, decision),
            });
        }
    }

    changes
}

/// Resolve the exit reason in stage priority order: quality, screening,
/// diversification, selection capacity, unknown.
fn exit_reason(ticker: &str, outcome: &ScreeningOutcome) -> String {
    match outcome.rejections.get(ticker) {
        Some(RejectionStage::Quality { detail }) => {
            return format!("failed quality check: {detail}");
        }
        Some(RejectionStage::Screening { detail }) => {
            return format!("failed screening filter: {detail}");
        }
        None => {}
    }

    if let Some(removed) = outcome
        .removed_by_diversification
        .iter()
        .find(|c| c.ticker == ticker)
    {
        return format!(
            "removed by diversification: sector {} at capacity",
            removed.sector
        );
    }

    if let Some(position) = outcome
        .before_selection
        .iter()
        .position(|c| c.ticker == ticker)
    {
        return format!(
            "excluded by selection capacity: ranked #{} of {}",
            position + 1,
            outcome.before_selection.len()
        );
    }

    "no longer qualifies for the universe".to_string()
}

/// Build the entry reason: rank, valuation model, upside, score and the
/// admission path.
fn entry_reason(
    rank: usize,
    ticker: &str,
    outcome: &ScreeningOutcome,
    admissions: &HashMap<String, AdmissionVia>,
    decision: &Decision,
) -> String {
    let candidate = outcome.selected.iter().find(|c| c.ticker == ticker);

    let mut reason = match candidate {
        Some(c) => {
            let model = c.fair_value_model.as_deref().unwrap_or("default");
            let upside = c
                .upside
                .map(|u| format!("{u:.1}%"))
                .unwrap_or_else(|| "n/a".to_string());
            let score = c
                .overall_score
                .map(|s| format!("{s:.0}"))
                .unwrap_or_else(|| "n/a".to_string());
            format!(
                "ranked #{} ({model} upside {upside}, score {score})",
                rank + 1
            )
        }
        None => format!("ranked #{}", rank + 1),
    };

    match admissions.get(ticker) {
        Some(AdmissionVia::Band { min, max }) => {
            reason.push_str(&format!(", matched score band [{min}, {max}]"));
        }
        Some(AdmissionVia::Backfill) => {
            reason.push_str(", backfilled to top-N ceiling");
        }
        Some(AdmissionVia::SectorAllocation) => {
            reason.push_str(", admitted by sector target allocation");
        }
        Some(AdmissionVia::TopN) | None => {}
    }

    if decision.threshold_trigger.as_deref() == Some(ticker) {
        reason.push_str(", exceeds the rebalance threshold over the worst held instrument");
    }

    reason
}
