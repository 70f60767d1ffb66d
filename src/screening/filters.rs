//! Quality, exclusion and liquidity/upside filters.
//!
//! Each filter takes the surviving set and the rejection trail, returning
//! the subset that passes. Rejections are recorded with the detail the
//! composition differ later surfaces as exit reasons.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::config::Range;
use crate::model::{Candidate, Instrument, RejectionStage};

/// Skip liquidity filtering when fewer than this share of candidates have
/// volume data. Heuristic carried over from production behavior; tunable,
/// not a guaranteed-correct cutoff.
pub const VOLUME_COVERAGE_FLOOR: f64 = 0.30;

/// Keep instruments whose fundamentals satisfy every configured predicate.
///
/// A configured bound facing a missing value fails: missing data never
/// bypasses a quality gate.
pub fn apply_quality(
    universe: Vec<Instrument>,
    predicates: &BTreeMap<String, Range>,
    rejections: &mut HashMap<String, RejectionStage>,
) -> Vec<Instrument> {
    if predicates.is_empty() {
        return universe;
    }

    let before = universe.len();
    let survivors: Vec<Instrument> = universe
        .into_iter()
        .filter(|inst| {
            for (field, range) in predicates {
                let value = inst.fundamentals.get(field).copied();
                if !range.matches(value) {
                    let detail = match value {
                        Some(v) => format!("{field} = {v}, requires {}", range.describe()),
                        None => format!("{field} is missing, requires {}", range.describe()),
                    };
                    debug!(ticker = %inst.ticker, %detail, "Failed quality predicate");
                    rejections.insert(
                        inst.ticker.clone(),
                        RejectionStage::Quality { detail },
                    );
                    return false;
                }
            }
            true
        })
        .collect();

    info!(
        before,
        after = survivors.len(),
        predicates = predicates.len(),
        "Quality filter applied"
    );
    survivors
}

/// True when the ticker matches an exclusion entry: exact, `PREFIX*` or
/// `*SUFFIX`.
fn matches_exclusion(ticker: &str, pattern: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        !prefix.is_empty() && ticker.starts_with(prefix)
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        !suffix.is_empty() && ticker.ends_with(suffix)
    } else {
        ticker == pattern
    }
}

/// Remove explicitly banned instruments.
pub fn apply_exclusions(
    universe: Vec<Instrument>,
    excluded: &[String],
    rejections: &mut HashMap<String, RejectionStage>,
) -> Vec<Instrument> {
    if excluded.is_empty() {
        return universe;
    }

    universe
        .into_iter()
        .filter(|inst| {
            match excluded.iter().find(|p| matches_exclusion(&inst.ticker, p)) {
                Some(pattern) => {
                    debug!(ticker = %inst.ticker, pattern = %pattern, "Excluded by rule");
                    rejections.insert(
                        inst.ticker.clone(),
                        RejectionStage::Screening {
                            detail: format!("excluded by rule '{pattern}'"),
                        },
                    );
                    false
                }
                None => true,
            }
        })
        .collect()
}

/// Remove candidates below the minimum average daily traded value.
///
/// Degrades gracefully: when volume data covers fewer than
/// [`VOLUME_COVERAGE_FLOOR`] of candidates, the filter is skipped for this
/// run rather than rejecting the whole universe.
pub fn apply_liquidity(
    candidates: Vec<Candidate>,
    min_traded_value: Decimal,
    rejections: &mut HashMap<String, RejectionStage>,
) -> Vec<Candidate> {
    if candidates.is_empty() {
        return candidates;
    }

    let with_volume = candidates
        .iter()
        .filter(|c| c.avg_daily_volume.is_some())
        .count();
    let coverage = with_volume as f64 / candidates.len() as f64;

    if coverage < VOLUME_COVERAGE_FLOOR {
        warn!(
            with_volume,
            total = candidates.len(),
            coverage = format!("{:.0}%", coverage * 100.0),
            "Volume coverage below floor, skipping liquidity filter this run"
        );
        return candidates;
    }

    let before = candidates.len();
    let survivors: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| match c.avg_daily_volume {
            Some(volume) if volume >= min_traded_value => true,
            Some(volume) => {
                rejections.insert(
                    c.ticker.clone(),
                    RejectionStage::Screening {
                        detail: format!(
                            "average daily traded value {volume} below minimum {min_traded_value}"
                        ),
                    },
                );
                false
            }
            None => {
                rejections.insert(
                    c.ticker.clone(),
                    RejectionStage::Screening {
                        detail: "no volume data for configured liquidity filter".to_string(),
                    },
                );
                false
            }
        })
        .collect();

    info!(before, after = survivors.len(), "Liquidity filter applied");
    survivors
}

/// Remove candidates below the minimum fair-value upside.
pub fn apply_min_upside(
    candidates: Vec<Candidate>,
    min_upside: f64,
    rejections: &mut HashMap<String, RejectionStage>,
) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| match c.upside {
            Some(upside) if upside >= min_upside => true,
            value => {
                let detail = match value {
                    Some(upside) => format!("upside {upside:.1}% below minimum {min_upside:.1}%"),
                    None => format!("no upside data, requires >= {min_upside:.1}%"),
                };
                rejections.insert(c.ticker.clone(), RejectionStage::Screening { detail });
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{candidate, instrument};
    use rust_decimal_macros::dec;

    #[test]
    fn test_quality_null_fails_configured_bound() {
        // Five candidates, roe >= 0.10: two nulls excluded, three pass.
        let mut predicates = BTreeMap::new();
        predicates.insert(
            "roe".to_string(),
            Range {
                gte: Some(0.10),
                lte: None,
            },
        );

        let universe = vec![
            instrument("AAA", &[("roe", 0.15)]),
            instrument("BBB", &[("roe", 0.12)]),
            instrument("CCC", &[("roe", 0.30)]),
            instrument("DDD", &[]),
            instrument("EEE", &[]),
        ];

        let mut rejections = HashMap::new();
        let survivors = apply_quality(universe, &predicates, &mut rejections);

        assert_eq!(survivors.len(), 3);
        assert!(matches!(
            rejections.get("DDD"),
            Some(RejectionStage::Quality { .. })
        ));
        assert!(rejections.get("DDD").unwrap().detail().contains("missing"));
        assert!(rejections.contains_key("EEE"));
    }

    #[test]
    fn test_exclusion_patterns() {
        assert!(matches_exclusion("BANKX", "BANK*"));
        assert!(!matches_exclusion("XBANK", "BANK*"));
        assert!(matches_exclusion("ITUB3", "*3"));
        assert!(!matches_exclusion("ITUB4", "*3"));
        assert!(matches_exclusion("PETR4", "PETR4"));
        assert!(!matches_exclusion("PETR4", "PETR3"));
    }

    #[test]
    fn test_exclusion_records_rule() {
        let universe = vec![instrument("BANKA", &[]), instrument("SAFE", &[])];
        let mut rejections = HashMap::new();
        let survivors = apply_exclusions(universe, &["BANK*".to_string()], &mut rejections);

        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].ticker, "SAFE");
        assert!(rejections.get("BANKA").unwrap().detail().contains("BANK*"));
    }

    #[test]
    fn test_liquidity_filters_below_minimum() {
        let mut liquid = candidate("AAA");
        liquid.avg_daily_volume = Some(dec!(2000000));
        let mut thin = candidate("BBB");
        thin.avg_daily_volume = Some(dec!(50000));

        let mut rejections = HashMap::new();
        let survivors = apply_liquidity(vec![liquid, thin], dec!(1000000), &mut rejections);

        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].ticker, "AAA");
        assert!(rejections.contains_key("BBB"));
    }

    #[test]
    fn test_liquidity_skipped_on_low_coverage() {
        // Only 1 of 4 candidates has volume data (25% < 30% floor).
        let mut with_volume = candidate("AAA");
        with_volume.avg_daily_volume = Some(dec!(10));
        let candidates = vec![
            with_volume,
            candidate("BBB"),
            candidate("CCC"),
            candidate("DDD"),
        ];

        let mut rejections = HashMap::new();
        let survivors = apply_liquidity(candidates, dec!(1000000), &mut rejections);

        assert_eq!(survivors.len(), 4);
        assert!(rejections.is_empty());
    }

    #[test]
    fn test_min_upside_null_fails() {
        let mut good = candidate("AAA");
        good.upside = Some(20.0);
        let mut low = candidate("BBB");
        low.upside = Some(2.0);
        let missing = candidate("CCC");

        let mut rejections = HashMap::new();
        let survivors = apply_min_upside(vec![good, low, missing], 10.0, &mut rejections);

        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].ticker, "AAA");
        assert_eq!(rejections.len(), 2);
    }
}
