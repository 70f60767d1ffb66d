//! Index configuration: universe scope, quality predicates, selection,
//! weighting, rebalance and diversification policies.
//!
//! One `IndexConfig` fully describes a rule-driven basket. It is read once
//! per screening run and never mutated by the engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Inclusive numeric range predicate applied to a fundamental field.
///
/// A bound that is configured but faces a missing underlying value fails the
/// predicate: absent data must not silently bypass quality gates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Range {
    /// Lower bound (inclusive)
    pub gte: Option<f64>,
    /// Upper bound (inclusive)
    pub lte: Option<f64>,
}

impl Range {
    /// Evaluate the predicate against an optional value.
    ///
    /// Returns `true` when no bound is configured, or when the value is
    /// present and satisfies every configured bound.
    pub fn matches(&self, value: Option<f64>) -> bool {
        if self.gte.is_none() && self.lte.is_none() {
            return true;
        }
        let Some(v) = value else {
            return false;
        };
        if let Some(min) = self.gte {
            if v < min {
                return false;
            }
        }
        if let Some(max) = self.lte {
            if v > max {
                return false;
            }
        }
        true
    }

    /// Human-readable description of the configured bounds, for audit reasons.
    pub fn describe(&self) -> String {
        match (self.gte, self.lte) {
            (Some(min), Some(max)) => format!("in [{min}, {max}]"),
            (Some(min), None) => format!(">= {min}"),
            (None, Some(max)) => format!("<= {max}"),
            (None, None) => "unbounded".to_string(),
        }
    }
}

/// Closed set of fields candidates can be ordered by.
///
/// Every field orders descending (larger is better) with nulls sorting last
/// regardless of direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingField {
    #[default]
    Upside,
    DividendYield,
    OverallScore,
    MarketCap,
    TechnicalMargin,
}

/// A score range with a capacity limit, used for tiered selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreBand {
    /// Lowest overall score admitted to this band (inclusive)
    pub min: f64,
    /// Highest overall score admitted to this band (inclusive)
    pub max: f64,
    /// Maximum number of instruments this band may contribute
    pub max_count: usize,
}

/// Reference to an external valuation strategy with opaque parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRef {
    /// Strategy identifier understood by the ranking collaborator
    pub name: String,
    /// Strategy-specific parameters, passed through untouched
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Portfolio weighting scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightScheme {
    #[default]
    Equal,
    MarketCap,
    OverallScore,
    Custom,
}

/// Weighting policy: scheme plus bounds or an explicit ticker → weight map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeightingPolicy {
    #[serde(default)]
    pub scheme: WeightScheme,
    /// Lower clamp for score-proportional weights
    #[serde(default)]
    pub min_weight: Option<f64>,
    /// Upper clamp for score-proportional weights
    #[serde(default)]
    pub max_weight: Option<f64>,
    /// Explicit weights for the `custom` scheme
    #[serde(default)]
    pub custom: HashMap<String, f64>,
}

/// Which upside variant the rebalance decision compares.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsideVariant {
    /// Maximum upside across all valuation models
    #[default]
    Best,
    /// Upside from one named valuation model
    Model(String),
}

/// Rebalance trigger policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancePolicy {
    /// Minimum upside advantage (as a fraction, e.g. 0.05 = 5 percentage
    /// points) a new candidate must have over the worst held instrument
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Force a rebalance when a held instrument fails this run's quality gates
    #[serde(default)]
    pub check_quality: bool,
    /// Upside variant used for the gap comparison
    #[serde(default)]
    pub upside_variant: UpsideVariant,
}

fn default_threshold() -> f64 {
    0.05
}

impl Default for RebalancePolicy {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            check_quality: false,
            upside_variant: UpsideVariant::Best,
        }
    }
}

/// Sector diversification policy. At most one mode may be configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiversificationPolicy {
    /// Per-sector maximum instrument count. An empty map means the uniform
    /// default limit applies to every sector; a non-empty map leaves
    /// unlisted sectors unlimited.
    #[serde(default)]
    pub max_count_per_sector: Option<HashMap<String, usize>>,
    /// Per-sector target allocation fractions of the final basket
    #[serde(default)]
    pub sector_allocation: Option<HashMap<String, f64>>,
}

/// Immutable configuration for one index/basket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index identifier, used as the composition key in the store
    pub name: String,

    /// Asset-type allowlist for the universe query
    #[serde(default)]
    pub asset_types: Vec<String>,

    /// Explicitly banned tickers; entries may carry a leading or trailing
    /// `*` wildcard (`BANK*`, `*3`)
    #[serde(default)]
    pub excluded_tickers: Vec<String>,

    /// Minimum average daily traded value; `None` disables liquidity filtering
    #[serde(default)]
    pub min_daily_traded_value: Option<Decimal>,

    /// Minimum fair-value upside (percent); `None` disables upside filtering
    #[serde(default)]
    pub min_upside: Option<f64>,

    /// Quality predicates: fundamental field name → range
    #[serde(default)]
    pub quality: BTreeMap<String, Range>,

    /// Optional external ranking strategy; when set, its output order is
    /// authoritative through every later stage
    #[serde(default)]
    pub ranking_strategy: Option<StrategyRef>,

    /// Field used for default ordering and dedup tie-breaking
    #[serde(default)]
    pub ordering: OrderingField,

    /// Top-N selection ceiling
    #[serde(default)]
    pub top_n: Option<usize>,

    /// Tiered selection bands, processed from highest `min` to lowest
    #[serde(default)]
    pub score_bands: Option<Vec<ScoreBand>>,

    #[serde(default)]
    pub weighting: WeightingPolicy,

    #[serde(default)]
    pub rebalance: RebalancePolicy,

    #[serde(default)]
    pub diversification: DiversificationPolicy,
}

impl IndexConfig {
    /// Minimal config with equal weighting and a top-N selection.
    pub fn top_n(name: impl Into<String>, n: usize) -> Self {
        Self {
            name: name.into(),
            asset_types: Vec::new(),
            excluded_tickers: Vec::new(),
            min_daily_traded_value: None,
            min_upside: None,
            quality: BTreeMap::new(),
            ranking_strategy: None,
            ordering: OrderingField::default(),
            top_n: Some(n),
            score_bands: None,
            weighting: WeightingPolicy::default(),
            rebalance: RebalancePolicy::default(),
            diversification: DiversificationPolicy::default(),
        }
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("index name cannot be empty".to_string());
        }
        if self.top_n.is_none() && self.score_bands.is_none() {
            return Err("either top_n or score_bands must drive selection".to_string());
        }
        if let Some(n) = self.top_n {
            if n == 0 {
                return Err("top_n must be at least 1".to_string());
            }
        }
        if let Some(bands) = &self.score_bands {
            if bands.is_empty() {
                return Err("score_bands cannot be empty when configured".to_string());
            }
            for band in bands {
                if band.min > band.max {
                    return Err(format!(
                        "score band min {} exceeds max {}",
                        band.min, band.max
                    ));
                }
                if band.max_count == 0 {
                    return Err("score band max_count must be at least 1".to_string());
                }
            }
        }
        if self.diversification.max_count_per_sector.is_some()
            && self.diversification.sector_allocation.is_some()
        {
            return Err(
                "at most one of max_count_per_sector / sector_allocation may be set".to_string(),
            );
        }
        if let Some(alloc) = &self.diversification.sector_allocation {
            if alloc.values().any(|f| *f < 0.0) {
                return Err("sector allocation fractions cannot be negative".to_string());
            }
        }
        if self.rebalance.threshold < 0.0 {
            return Err(format!(
                "rebalance threshold cannot be negative, got {}",
                self.rebalance.threshold
            ));
        }
        if let (Some(min), Some(max)) = (self.weighting.min_weight, self.weighting.max_weight) {
            if min > max {
                return Err(format!("min_weight {min} exceeds max_weight {max}"));
            }
        }
        for bound in [self.weighting.min_weight, self.weighting.max_weight]
            .into_iter()
            .flatten()
        {
            if !(0.0..=1.0).contains(&bound) {
                return Err(format!("weight bounds must lie in [0, 1], got {bound}"));
            }
        }
        if self.weighting.scheme == WeightScheme::Custom
            && self.weighting.custom.values().any(|w| *w < 0.0)
        {
            return Err("custom weights cannot be negative".to_string());
        }
        if let Some(min) = self.min_daily_traded_value {
            if min < Decimal::ZERO {
                return Err("min_daily_traded_value cannot be negative".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_n_config_is_valid() {
        let config = IndexConfig::top_n("test", 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_no_selection_driver_invalid() {
        let mut config = IndexConfig::top_n("test", 10);
        config.top_n = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_both_diversification_modes_invalid() {
        let mut config = IndexConfig::top_n("test", 10);
        config.diversification.max_count_per_sector = Some(HashMap::new());
        config.diversification.sector_allocation = Some(HashMap::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_band_invalid() {
        let mut config = IndexConfig::top_n("test", 10);
        config.score_bands = Some(vec![ScoreBand {
            min: 80.0,
            max: 60.0,
            max_count: 5,
        }]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_range_missing_value_fails_configured_bound() {
        let range = Range {
            gte: Some(0.10),
            lte: None,
        };
        assert!(!range.matches(None));
        assert!(range.matches(Some(0.10)));
        assert!(!range.matches(Some(0.05)));
    }

    #[test]
    fn test_range_unbounded_accepts_missing() {
        let range = Range::default();
        assert!(range.matches(None));
        assert!(range.matches(Some(-3.0)));
    }

    #[test]
    fn test_range_both_bounds() {
        let range = Range {
            gte: Some(0.0),
            lte: Some(1.0),
        };
        assert!(range.matches(Some(0.5)));
        assert!(!range.matches(Some(1.5)));
        assert!(!range.matches(Some(-0.5)));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let json = r#"{"name": "dividend-aristocrats", "top_n": 20}"#;
        let config: IndexConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.name, "dividend-aristocrats");
        assert_eq!(config.top_n, Some(20));
        assert_eq!(config.ordering, OrderingField::Upside);
        assert!((config.rebalance.threshold - 0.05).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }
}
