//! Candidate ordering: default comparator-based ranking and the optional
//! delegation to an external valuation strategy.

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::{OrderingField, StrategyRef};
use crate::error::EngineError;
use crate::model::{Candidate, RejectionStage};
use crate::providers::RankingStrategyProvider;

/// Compare two candidates on the given field, descending, nulls last.
pub fn compare(a: &Candidate, b: &Candidate, field: OrderingField) -> Ordering {
    match (a.ordering_value(field), b.ordering_value(field)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sort candidates by the configured ordering field (stable, best first).
pub fn sort_default(candidates: &mut [Candidate], field: OrderingField) {
    candidates.sort_by(|a, b| compare(a, b, field));
}

/// Re-derive upside, valuation model and overall score from the named
/// strategy and replace the default ordering with the strategy's output
/// order. Candidates absent from the strategy result set are dropped.
pub async fn apply_strategy(
    candidates: Vec<Candidate>,
    provider: &dyn RankingStrategyProvider,
    strategy: &StrategyRef,
    rejections: &mut HashMap<String, RejectionStage>,
) -> Result<Vec<Candidate>, EngineError> {
    let tickers: Vec<String> = candidates.iter().map(|c| c.ticker.clone()).collect();

    info!(
        strategy = %strategy.name,
        candidates = tickers.len(),
        "Delegating ranking to external strategy"
    );

    let rankings = provider
        .rank(&strategy.name, &strategy.params, &tickers)
        .await
        .map_err(|source| EngineError::Strategy {
            strategy: strategy.name.clone(),
            source,
        })?;

    let mut by_ticker: HashMap<String, Candidate> = candidates
        .into_iter()
        .map(|c| (c.ticker.clone(), c))
        .collect();

    let mut ranked = Vec::with_capacity(rankings.len());
    for ranking in rankings {
        let Some(mut candidate) = by_ticker.remove(&ranking.ticker) else {
            // Strategy may rank tickers outside the surviving set; ignore.
            continue;
        };
        candidate.upside = ranking.upside;
        candidate.fair_value_model = ranking.fair_value_model;
        candidate.overall_score = ranking.overall_score;
        ranked.push(candidate);
    }

    for (ticker, _) in by_ticker {
        debug!(ticker = %ticker, strategy = %strategy.name, "Dropped: absent from strategy result");
        rejections.insert(
            ticker,
            RejectionStage::Screening {
                detail: format!("not ranked by strategy '{}'", strategy.name),
            },
        );
    }

    info!(ranked = ranked.len(), "Strategy ranking applied");
    Ok(ranked)
}
