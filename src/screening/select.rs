//! Final set selection: top-N or tiered score bands with a top-N backfill
//! ceiling.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::config::{OrderingField, ScoreBand};
use crate::model::Candidate;

use super::rank;

/// How a candidate earned its spot, surfaced in entry audit reasons.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionVia {
    /// Admitted by top-N rank
    TopN,
    /// Matched a score band
    Band { min: f64, max: f64 },
    /// Backfilled after bands left unfilled top-N capacity
    Backfill,
    /// Admitted by the sector target-allocation diversifier
    SectorAllocation,
}

/// Selector output: the chosen candidates in admission order, plus how each
/// one was admitted.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub selected: Vec<Candidate>,
    pub admissions: HashMap<String, AdmissionVia>,
}

/// Choose the final set from the ordered candidate list.
///
/// Score bands take precedence when configured; a `top_n` ceiling then acts
/// as backfill capacity. Without bands, plain top-N applies.
pub fn select(
    candidates: Vec<Candidate>,
    top_n: Option<usize>,
    score_bands: Option<&[ScoreBand]>,
    field: OrderingField,
    strategy_ordered: bool,
) -> Selection {
    match score_bands {
        Some(bands) => select_by_bands(candidates, bands, top_n, field, strategy_ordered),
        None => {
            let n = top_n.unwrap_or(candidates.len());
            let mut selection = Selection::default();
            for candidate in candidates.into_iter().take(n) {
                selection
                    .admissions
                    .insert(candidate.ticker.clone(), AdmissionVia::TopN);
                selection.selected.push(candidate);
            }
            info!(selected = selection.selected.len(), top_n = n, "Top-N selection");
            selection
        }
    }
}

/// Process bands from highest `min` to lowest; each band claims up to
/// `max_count` unclaimed candidates whose score falls within it. A candidate
/// without an overall score can never match any band.
fn select_by_bands(
    candidates: Vec<Candidate>,
    bands: &[ScoreBand],
    top_n: Option<usize>,
    field: OrderingField,
    strategy_ordered: bool,
) -> Selection {
    let mut ordered_bands: Vec<ScoreBand> = bands.to_vec();
    ordered_bands.sort_by(|a, b| b.min.partial_cmp(&a.min).unwrap_or(std::cmp::Ordering::Equal));

    let mut selection = Selection::default();
    let mut claimed: HashSet<String> = HashSet::new();

    for band in &ordered_bands {
        let mut matches: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| !claimed.contains(&c.ticker))
            .filter(|c| {
                c.overall_score
                    .map(|s| s >= band.min && s <= band.max)
                    .unwrap_or(false)
            })
            .collect();

        // Under strategy order the incoming order is authoritative;
        // otherwise rank within the band on the configured field.
        if !strategy_ordered {
            matches.sort_by(|a, b| rank::compare(a, b, field));
        }

        for candidate in matches.into_iter().take(band.max_count) {
            debug!(
                ticker = %candidate.ticker,
                band = format!("[{}, {}]", band.min, band.max),
                "Claimed by score band"
            );
            claimed.insert(candidate.ticker.clone());
            selection.admissions.insert(
                candidate.ticker.clone(),
                AdmissionVia::Band {
                    min: band.min,
                    max: band.max,
                },
            );
            selection.selected.push(candidate.clone());
        }
    }

    // Backfill with the best remaining unclaimed candidates up to the
    // top-N ceiling, when one is configured.
    if let Some(ceiling) = top_n {
        if selection.selected.len() < ceiling {
            let room = ceiling - selection.selected.len();
            let backfill: Vec<Candidate> = candidates
                .iter()
                .filter(|c| !claimed.contains(&c.ticker))
                .take(room)
                .cloned()
                .collect();
            for candidate in backfill {
                debug!(ticker = %candidate.ticker, "Backfilled to top-N ceiling");
                claimed.insert(candidate.ticker.clone());
                selection
                    .admissions
                    .insert(candidate.ticker.clone(), AdmissionVia::Backfill);
                selection.selected.push(candidate);
            }
        }
    }

    info!(
        selected = selection.selected.len(),
        bands = ordered_bands.len(),
        "Score-band selection"
    );
    selection
}
