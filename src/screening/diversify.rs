//! Sector diversification: max-count limits or target allocations.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::model::Candidate;

/// Uniform per-sector limit applied when no explicit limits are configured.
pub const DEFAULT_SECTOR_LIMIT: usize = 4;

/// Result of a diversification pass.
#[derive(Debug, Clone, Default)]
pub struct DiversifyResult {
    /// Candidates kept, in incoming order
    pub kept: Vec<Candidate>,
    /// Candidates removed for sector concentration
    pub removed: Vec<Candidate>,
}

/// Max-count mode: admit candidates in order while their sector's running
/// count stays below its limit.
///
/// With no explicit limits at all, every sector gets
/// [`DEFAULT_SECTOR_LIMIT`]; with explicit limits, unlisted sectors are
/// unlimited.
pub fn limit_by_sector(
    selected: Vec<Candidate>,
    limits: Option<&HashMap<String, usize>>,
) -> DiversifyResult {
    let explicit = limits.filter(|m| !m.is_empty());
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut result = DiversifyResult::default();

    for candidate in selected {
        let limit = match explicit {
            Some(map) => map.get(&candidate.sector).copied(),
            None => Some(DEFAULT_SECTOR_LIMIT),
        };
        let count = counts.entry(candidate.sector.clone()).or_insert(0);
        match limit {
            Some(max) if *count >= max => {
                debug!(
                    ticker = %candidate.ticker,
                    sector = %candidate.sector,
                    limit = max,
                    "Removed: sector at capacity"
                );
                result.removed.push(candidate);
            }
            _ => {
                *count += 1;
                result.kept.push(candidate);
            }
        }
    }

    if !result.removed.is_empty() {
        info!(
            kept = result.kept.len(),
            removed = result.removed.len(),
            "Sector max-count limits applied"
        );
    }
    result
}

/// Target-allocation mode: fill each allocated sector with its best-ranked
/// candidates up to `ceil(top_n * fraction)`, then backfill the basket to
/// `top_n` with the best remaining candidates regardless of sector.
///
/// `ordered` is the full ranked pool (selected candidates first); the
/// returned `kept` list is the diversified basket.
pub fn allocate_by_sector(
    ordered: Vec<Candidate>,
    allocation: &HashMap<String, f64>,
    top_n: usize,
) -> DiversifyResult {
    let fractions = normalized_fractions(allocation);

    // Availability per sector bounds each target.
    let mut available: HashMap<&str, usize> = HashMap::new();
    for candidate in &ordered {
        *available.entry(candidate.sector.as_str()).or_insert(0) += 1;
    }

    let targets: HashMap<String, usize> = fractions
        .iter()
        .map(|(sector, fraction)| {
            let raw = (top_n as f64 * fraction).ceil() as usize;
            let capped = raw.min(available.get(sector.as_str()).copied().unwrap_or(0));
            (sector.clone(), capped)
        })
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<Candidate> = Vec::with_capacity(top_n);
    let mut leftover: Vec<Candidate> = Vec::new();

    for candidate in ordered {
        if kept.len() >= top_n {
            leftover.push(candidate);
            continue;
        }
        let target = targets.get(&candidate.sector).copied().unwrap_or(0);
        let count = counts.entry(candidate.sector.clone()).or_insert(0);
        if *count < target {
            *count += 1;
            kept.push(candidate);
        } else {
            leftover.push(candidate);
        }
    }

    // Backfill with the best remaining candidates regardless of sector.
    let mut removed = Vec::new();
    for candidate in leftover {
        if kept.len() < top_n {
            debug!(ticker = %candidate.ticker, "Backfilled past sector targets");
            kept.push(candidate);
        } else {
            removed.push(candidate);
        }
    }

    info!(
        kept = kept.len(),
        target = top_n,
        sectors = targets.len(),
        "Sector target allocation applied"
    );
    DiversifyResult { kept, removed }
}

/// Proportionally normalize allocation fractions when they sum above 1.0.
fn normalized_fractions(allocation: &HashMap<String, f64>) -> HashMap<String, f64> {
    let total: f64 = allocation.values().sum();
    if total <= 1.0 || total == 0.0 {
        return allocation.clone();
    }
    info!(
        total = format!("{total:.3}"),
        "Sector allocation fractions exceed 1.0, normalizing proportionally"
    );
    allocation
        .iter()
        .map(|(sector, fraction)| (sector.clone(), fraction / total))
        .collect()
}
