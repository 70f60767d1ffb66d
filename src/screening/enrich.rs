//! Market enricher: turns surviving instruments into scored candidates.
//!
//! All market data is fetched in a small constant number of bulk calls,
//! issued concurrently and joined before the next stage starts. Score
//! recomputation runs as one future per candidate; each failure is caught
//! individually and recorded as diagnostics on that candidate.

use futures_util::future::join_all;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{EngineError, ProviderError};
use crate::model::{Candidate, Instrument, RejectionStage, ScoreDiagnostics};
use crate::providers::{MarketDataProvider, ScoreProvider};

/// Per-candidate score recomputation outcome, collected before merging.
enum ScoreOutcome {
    Ok(f64),
    Failed(ScoreDiagnostics),
}

/// Enrich the surviving instruments with prices, volumes, upsides and
/// overall scores. Candidates without a resolvable price are dropped:
/// price is mandatory for downstream weighting and audit.
pub async fn enrich(
    survivors: Vec<Instrument>,
    market: &dyn MarketDataProvider,
    scores: &dyn ScoreProvider,
    need_volumes: bool,
    rejections: &mut HashMap<String, RejectionStage>,
) -> Result<Vec<Candidate>, EngineError> {
    if survivors.is_empty() {
        return Ok(Vec::new());
    }

    let tickers: Vec<String> = survivors.iter().map(|i| i.ticker.clone()).collect();

    info!(
        candidates = tickers.len(),
        volumes = need_volumes,
        "Enriching candidates with market data"
    );

    let prices_fut = market.latest_prices(&tickers);
    let upsides_fut = market.upsides(&tickers);
    let volumes_fut = async {
        if need_volumes {
            market.average_daily_volumes(&tickers).await
        } else {
            Ok(HashMap::new())
        }
    };

    let (prices, upsides, volumes) = tokio::join!(prices_fut, upsides_fut, volumes_fut);
    let prices = prices.map_err(EngineError::Enrichment)?;
    let upsides = upsides.map_err(EngineError::Enrichment)?;
    let volumes = volumes.map_err(EngineError::Enrichment)?;

    if prices.is_empty() {
        // A fully failed price phase must not produce a stale composition.
        return Err(EngineError::Enrichment(ProviderError::Unavailable(
            "price lookup returned no data for any candidate".to_string(),
        )));
    }

    let score_outcomes = recompute_scores(&survivors, &prices, scores).await;

    let mut candidates = Vec::with_capacity(survivors.len());
    for (instrument, outcome) in survivors.into_iter().zip(score_outcomes) {
        let Some(price) = prices.get(&instrument.ticker).copied() else {
            debug!(ticker = %instrument.ticker, "No resolvable price, dropping");
            rejections.insert(
                instrument.ticker.clone(),
                RejectionStage::Screening {
                    detail: "no price data available".to_string(),
                },
            );
            continue;
        };

        let quote = upsides.get(&instrument.ticker);
        let (overall_score, diagnostics) = match outcome {
            ScoreOutcome::Ok(score) => (Some(score), None),
            ScoreOutcome::Failed(diag) => (None, Some(diag)),
        };

        candidates.push(Candidate {
            avg_daily_volume: volumes.get(&instrument.ticker).copied(),
            technical_margin: instrument.fundamentals.get("technical_margin").copied(),
            ticker: instrument.ticker,
            issuer: instrument.issuer,
            sector: instrument.sector,
            price,
            dividend_yield: quote.and_then(|q| q.dividend_yield),
            market_cap: instrument.market_cap,
            overall_score,
            upside: quote.map(|q| q.best),
            fair_value_model: quote.map(|q| q.model.clone()),
            upsides_by_model: quote.map(|q| q.by_model.clone()).unwrap_or_default(),
            fundamentals: instrument.fundamentals,
            diagnostics,
        });
    }

    info!(enriched = candidates.len(), "Enrichment complete");
    Ok(candidates)
}

/// Recompute overall scores, one isolated future per candidate.
async fn recompute_scores(
    survivors: &[Instrument],
    prices: &HashMap<String, rust_decimal::Decimal>,
    scores: &dyn ScoreProvider,
) -> Vec<ScoreOutcome> {
    let futures = survivors.iter().map(|inst| {
        let ticker = inst.ticker.clone();
        async move { (ticker.clone(), scores.overall_score(&ticker).await) }
    });

    let results = join_all(futures).await;

    results
        .into_iter()
        .zip(survivors.iter())
        .map(|((ticker, result), inst)| match result {
            Ok(score) => ScoreOutcome::Ok(score),
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Score recomputation failed");
                ScoreOutcome::Failed(ScoreDiagnostics {
                    message: e.to_string(),
                    has_financial_data: !inst.fundamentals.is_empty(),
                    has_price_data: prices.contains_key(&ticker),
                })
            }
        })
        .collect()
}
