//! Core data model: instruments, candidates, compositions and audit records.
//!
//! Candidates are recomputed fresh on every screening run and carry no
//! cross-run identity. Composition rows are replaced wholesale per run;
//! change records are append-only history.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::OrderingField;

/// Raw universe row before enrichment.
#[derive(Debug, Clone)]
pub struct Instrument {
    pub ticker: String,
    pub issuer: String,
    pub sector: String,
    pub asset_type: String,
    pub market_cap: Option<Decimal>,
    /// Fundamental fields by name; an absent key is a null value
    pub fundamentals: HashMap<String, f64>,
}

/// Why an overall score could not be computed for a candidate.
///
/// Absence of data is a first-class state: a candidate carrying diagnostics
/// is still subject to the normal filters for the missing field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreDiagnostics {
    pub message: String,
    pub has_financial_data: bool,
    pub has_price_data: bool,
}

/// A scored, enriched instrument under evaluation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub ticker: String,
    pub issuer: String,
    pub sector: String,
    pub price: Decimal,
    pub dividend_yield: Option<f64>,
    pub market_cap: Option<Decimal>,
    /// Average daily traded value
    pub avg_daily_volume: Option<Decimal>,
    /// 0-100 composite quality metric from the external scoring module
    pub overall_score: Option<f64>,
    /// Best available fair-value upside, percent
    pub upside: Option<f64>,
    /// Valuation model that produced the best upside
    pub fair_value_model: Option<String>,
    /// Upside per valuation model, percent
    pub upsides_by_model: HashMap<String, f64>,
    pub technical_margin: Option<f64>,
    pub fundamentals: HashMap<String, f64>,
    pub diagnostics: Option<ScoreDiagnostics>,
}

impl Candidate {
    /// Value of the given ordering field, `None` when the data is missing.
    pub fn ordering_value(&self, field: OrderingField) -> Option<f64> {
        match field {
            OrderingField::Upside => self.upside,
            OrderingField::DividendYield => self.dividend_yield,
            OrderingField::OverallScore => self.overall_score,
            OrderingField::MarketCap => self.market_cap.and_then(|c| c.to_f64()),
            OrderingField::TechnicalMargin => self.technical_margin,
        }
    }

    /// Issuer key: ticker with any trailing class digits stripped, so share
    /// classes of one company collapse to the same key ("ITUB4" -> "ITUB").
    pub fn issuer_key(&self) -> &str {
        self.ticker.trim_end_matches(|c: char| c.is_ascii_digit())
    }
}

/// One row of the persisted target basket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionEntry {
    pub ticker: String,
    pub target_weight: f64,
    pub entry_price: Decimal,
    pub entry_date: DateTime<Utc>,
}

/// A position in the currently persisted composition.
#[derive(Debug, Clone)]
pub struct HeldPosition {
    pub ticker: String,
    pub entry_price: Decimal,
}

/// Direction of a composition change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    Entry,
    Exit,
}

/// Ephemeral audit record, produced once per rebalance run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionChange {
    pub action: ChangeAction,
    pub ticker: String,
    pub reason: String,
}

/// The pipeline stage that excluded a candidate, with detail for audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionStage {
    /// Failed a configured quality predicate
    Quality { detail: String },
    /// Failed a screening filter (exclusion list, missing price, liquidity,
    /// upside threshold, or absence from the strategy result set)
    Screening { detail: String },
}

impl RejectionStage {
    pub fn detail(&self) -> &str {
        match self {
            RejectionStage::Quality { detail } => detail,
            RejectionStage::Screening { detail } => detail,
        }
    }
}

/// Everything the screening stages learned, threaded explicitly to the
/// differ instead of shared mutable process state.
#[derive(Debug, Clone, Default)]
pub struct ScreeningOutcome {
    /// Final candidates after diversification, in final order
    pub selected: Vec<Candidate>,
    /// Candidates that reached the selector, in pre-selection order
    pub before_selection: Vec<Candidate>,
    /// Candidates dropped by the diversifier
    pub removed_by_diversification: Vec<Candidate>,
    /// Ticker → rejecting stage for everything dropped before selection
    pub rejections: HashMap<String, RejectionStage>,
    /// True when a ranking strategy's output order is authoritative
    pub strategy_ordered: bool,
}

/// Survivor counts per pipeline stage, for the structured run result.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageCounts {
    pub universe: usize,
    pub after_quality: usize,
    pub after_exclusion: usize,
    pub after_enrichment: usize,
    pub after_screening: usize,
    pub after_dedup: usize,
    pub after_selection: usize,
    pub selected: usize,
}

/// Structured result of one screening run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub index: String,
    pub rebalanced: bool,
    /// Overall reason a rebalance occurred, or why none did
    pub reason: String,
    pub counts: StageCounts,
    pub composition: Vec<CompositionEntry>,
    pub changes: Vec<CompositionChange>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bare_candidate(ticker: &str) -> Candidate {
        Candidate {
            ticker: ticker.to_string(),
            issuer: "Issuer".to_string(),
            sector: "Technology".to_string(),
            price: dec!(10),
            dividend_yield: None,
            market_cap: None,
            avg_daily_volume: None,
            overall_score: None,
            upside: None,
            fair_value_model: None,
            upsides_by_model: HashMap::new(),
            technical_margin: None,
            fundamentals: HashMap::new(),
            diagnostics: None,
        }
    }

    #[test]
    fn test_issuer_key_strips_trailing_digits() {
        assert_eq!(bare_candidate("ITUB4").issuer_key(), "ITUB");
        assert_eq!(bare_candidate("PETR3").issuer_key(), "PETR");
        assert_eq!(bare_candidate("VALE").issuer_key(), "VALE");
        assert_eq!(bare_candidate("B3SA3").issuer_key(), "B3SA");
    }

    #[test]
    fn test_ordering_value_market_cap_converts() {
        let mut c = bare_candidate("AAPL");
        c.market_cap = Some(dec!(3000000000));
        let v = c.ordering_value(OrderingField::MarketCap).unwrap();
        assert!((v - 3_000_000_000.0).abs() < 1.0);
    }
}
