//! External collaborator seams.
//!
//! The engine consumes universe data, market data, scores and strategy
//! rankings through these traits and persists results through
//! [`CompositionStore`]. Production wiring lives outside this crate; tests
//! supply in-memory implementations.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::ProviderError;
use crate::model::{CompositionChange, CompositionEntry, HeldPosition, Instrument};

/// Per-ticker fair-value upside quote with its per-model breakdown.
#[derive(Debug, Clone)]
pub struct UpsideQuote {
    /// Best available upside, percent
    pub best: f64,
    /// Valuation model that produced the best upside
    pub model: String,
    /// Upside per valuation model, percent
    pub by_model: HashMap<String, f64>,
    pub dividend_yield: Option<f64>,
}

/// One row of a ranking strategy's output, in the strategy's own order.
#[derive(Debug, Clone)]
pub struct StrategyRanking {
    pub ticker: String,
    pub upside: Option<f64>,
    pub fair_value_model: Option<String>,
    pub overall_score: Option<f64>,
}

/// Yields candidate instruments with fundamentals, already filtered by the
/// asset-type allowlist (an empty allowlist means all types).
#[async_trait]
pub trait UniverseProvider: Send + Sync {
    async fn fetch_universe(&self, asset_types: &[String]) -> Result<Vec<Instrument>, ProviderError>;
}

/// Batch lookups for prices, traded volumes and fair-value upsides.
///
/// Each call covers the whole surviving candidate set at once; the engine
/// never issues per-instrument market-data calls.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn latest_prices(
        &self,
        tickers: &[String],
    ) -> Result<HashMap<String, Decimal>, ProviderError>;

    /// Average daily traded value per ticker. Tickers without volume data
    /// are simply absent from the result.
    async fn average_daily_volumes(
        &self,
        tickers: &[String],
    ) -> Result<HashMap<String, Decimal>, ProviderError>;

    async fn upsides(
        &self,
        tickers: &[String],
    ) -> Result<HashMap<String, UpsideQuote>, ProviderError>;
}

/// Overall quality score lookup, recomputing when the cached value is stale.
///
/// Called once per candidate; failures are isolated per candidate and
/// recorded as diagnostics, never aborting the batch.
#[async_trait]
pub trait ScoreProvider: Send + Sync {
    async fn overall_score(&self, ticker: &str) -> Result<f64, ProviderError>;
}

/// External valuation strategy used for ranking when the config names one.
#[async_trait]
pub trait RankingStrategyProvider: Send + Sync {
    /// Rank the given tickers. The returned order is authoritative;
    /// tickers absent from the result are dropped from the run.
    async fn rank(
        &self,
        strategy: &str,
        params: &serde_json::Value,
        tickers: &[String],
    ) -> Result<Vec<StrategyRanking>, ProviderError>;
}

/// Persisted composition access.
#[async_trait]
pub trait CompositionStore: Send + Sync {
    async fn current(&self, index: &str) -> Result<Vec<HeldPosition>, ProviderError>;

    /// Replace the composition rows and append the change log.
    ///
    /// Implementations must perform both writes in one transaction so a
    /// partial write never leaves the basket inconsistent.
    async fn replace(
        &self,
        index: &str,
        rows: &[CompositionEntry],
        changes: &[CompositionChange],
    ) -> Result<(), ProviderError>;
}
