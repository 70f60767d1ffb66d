//! Portfolio weight calculation.
//!
//! Four schemes, all normalized so the selected set's weights sum to 1.0
//! within [`WEIGHT_EPSILON`].

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::{WeightScheme, WeightingPolicy};
use crate::model::Candidate;

/// Tolerance on the sum-to-one invariant.
pub const WEIGHT_EPSILON: f64 = 1e-4;

/// Compute normalized weights for the selected candidates, aligned with the
/// input order. Empty input yields an empty vector.
pub fn calculate_weights(selected: &[Candidate], policy: &WeightingPolicy) -> Vec<f64> {
    if selected.is_empty() {
        return Vec::new();
    }

    let weights = match policy.scheme {
        WeightScheme::Equal => equal_weights(selected.len()),
        WeightScheme::OverallScore => score_weights(selected, policy),
        WeightScheme::MarketCap => market_cap_weights(selected),
        WeightScheme::Custom => custom_weights(selected, policy),
    };

    normalize(weights)
}

fn equal_weights(count: usize) -> Vec<f64> {
    vec![1.0 / count as f64; count]
}

/// Weight proportional to overall score, clamped to the configured bounds.
/// Score-less instruments share the leftover mass equally; when the clamped
/// scored weights alone exceed 1.0, everything is rescaled proportionally
/// and score-less instruments get zero.
fn score_weights(selected: &[Candidate], policy: &WeightingPolicy) -> Vec<f64> {
    let total_score: f64 = selected.iter().filter_map(|c| c.overall_score).sum();
    let unscored = selected.iter().filter(|c| c.overall_score.is_none()).count();

    if total_score <= 0.0 {
        debug!("No usable overall scores, falling back to equal weights");
        return equal_weights(selected.len());
    }

    let clamp = |w: f64| -> f64 {
        let mut w = w;
        if let Some(min) = policy.min_weight {
            w = w.max(min);
        }
        if let Some(max) = policy.max_weight {
            w = w.min(max);
        }
        w
    };

    let mut weights: Vec<f64> = selected
        .iter()
        .map(|c| c.overall_score.map(|s| clamp(s / total_score)).unwrap_or(0.0))
        .collect();

    let scored_total: f64 = weights.iter().sum();

    if scored_total > 1.0 + WEIGHT_EPSILON {
        // Clamping pushed the scored mass past 1.0: rescale, score-less
        // instruments stay at zero.
        for w in weights.iter_mut() {
            *w /= scored_total;
        }
    } else if unscored > 0 {
        // Rounding can leave scored_total a hair above 1.0; the leftover
        // share must never go negative.
        let share = ((1.0 - scored_total) / unscored as f64).max(0.0);
        for (w, c) in weights.iter_mut().zip(selected) {
            if c.overall_score.is_none() {
                *w = share;
            }
        }
    }

    weights
}

/// Weight proportional to market capitalization; equal weight when the
/// total capitalization is zero.
fn market_cap_weights(selected: &[Candidate]) -> Vec<f64> {
    let caps: Vec<f64> = selected
        .iter()
        .map(|c| {
            c.market_cap
                .and_then(|cap| cap.max(Decimal::ZERO).to_f64())
                .unwrap_or(0.0)
        })
        .collect();
    let total: f64 = caps.iter().sum();

    if total <= 0.0 {
        warn!("Total market capitalization is zero, falling back to equal weights");
        return equal_weights(selected.len());
    }

    caps.into_iter().map(|cap| cap / total).collect()
}

/// Apply explicit ticker weights; instruments without an entry split the
/// remaining mass equally. The final normalization pass handles explicit
/// weights summing past 1.0.
fn custom_weights(selected: &[Candidate], policy: &WeightingPolicy) -> Vec<f64> {
    let explicit_total: f64 = selected
        .iter()
        .filter_map(|c| policy.custom.get(&c.ticker))
        .sum();
    let unweighted = selected
        .iter()
        .filter(|c| !policy.custom.contains_key(&c.ticker))
        .count();

    let remainder = (1.0 - explicit_total).max(0.0);
    let share = if unweighted > 0 {
        remainder / unweighted as f64
    } else {
        0.0
    };

    if explicit_total > 1.0 + WEIGHT_EPSILON {
        warn!(
            explicit_total = format!("{explicit_total:.4}"),
            "Explicit weights exceed 1.0, renormalizing proportionally"
        );
    }

    let weights: Vec<f64> = selected
        .iter()
        .map(|c| policy.custom.get(&c.ticker).copied().unwrap_or(share))
        .collect();

    if weights.iter().sum::<f64>() <= 0.0 {
        warn!("Custom weights sum to zero, falling back to equal weights");
        return equal_weights(selected.len());
    }
    weights
}

/// Final proportional normalization to restore the sum-to-one invariant.
fn normalize(mut weights: Vec<f64>) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total > 0.0 && (total - 1.0).abs() > WEIGHT_EPSILON {
        for w in weights.iter_mut() {
            *w /= total;
        }
    }
    weights
}
