//! Share-class deduplication: one surviving instrument per issuer.

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::OrderingField;
use crate::model::Candidate;

use super::rank;

/// Collapse multiple share classes of the same issuer into one candidate,
/// preserving list order.
///
/// Under strategy order the first occurrence wins (the strategy's own
/// tie-breaking is authoritative). Otherwise the instance with the better
/// value on the ordering field wins, nulls always losing to non-nulls.
pub fn dedup_share_classes(
    candidates: Vec<Candidate>,
    strategy_ordered: bool,
    field: OrderingField,
) -> Vec<Candidate> {
    let before = candidates.len();
    let mut kept: Vec<Candidate> = Vec::with_capacity(before);
    let mut by_issuer: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        let key = candidate.issuer_key().to_string();
        match by_issuer.get(&key) {
            None => {
                by_issuer.insert(key, kept.len());
                kept.push(candidate);
            }
            Some(&idx) => {
                if !strategy_ordered
                    && rank::compare(&candidate, &kept[idx], field) == Ordering::Less
                {
                    debug!(
                        kept = %candidate.ticker,
                        dropped = %kept[idx].ticker,
                        issuer = %key,
                        "Replaced share class with better-ranked sibling"
                    );
                    kept[idx] = candidate;
                } else {
                    debug!(
                        dropped = %candidate.ticker,
                        kept = %kept[idx].ticker,
                        issuer = %key,
                        "Dropped duplicate share class"
                    );
                }
            }
        }
    }

    if kept.len() < before {
        info!(before, after = kept.len(), "Share classes deduplicated");
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::candidate;

    #[test]
    fn test_one_survivor_per_issuer() {
        let mut common = candidate("ITUB3");
        common.upside = Some(10.0);
        let mut preferred = candidate("ITUB4");
        preferred.upside = Some(15.0);
        let mut other = candidate("VALE3");
        other.upside = Some(5.0);

        let kept = dedup_share_classes(
            vec![common, preferred, other],
            false,
            OrderingField::Upside,
        );

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].ticker, "ITUB4");
        assert_eq!(kept[1].ticker, "VALE3");
    }

    #[test]
    fn test_strategy_order_keeps_first_occurrence() {
        let mut first = candidate("ITUB3");
        first.upside = Some(10.0);
        let mut second = candidate("ITUB4");
        second.upside = Some(99.0);

        let kept = dedup_share_classes(vec![first, second], true, OrderingField::Upside);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].ticker, "ITUB3");
    }

    #[test]
    fn test_null_loses_to_non_null() {
        let with_null = candidate("PETR3");
        let mut with_value = candidate("PETR4");
        with_value.upside = Some(1.0);

        let kept = dedup_share_classes(vec![with_null, with_value], false, OrderingField::Upside);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].ticker, "PETR4");
    }
}
