//! Pipeline orchestration: one screening run per call.
//!
//! The run is a strict sequence of fan-out/fan-in phases; stage N never
//! starts before all of stage N-1's I/O has completed. Nothing is written
//! to the store unless the rebalance decision fires, and the store's
//! `replace` performs the composition swap and change-log append in one
//! transaction.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

use crate::config::IndexConfig;
use crate::error::EngineError;
use crate::model::{
    Candidate, CompositionEntry, RunReport, ScreeningOutcome, StageCounts,
};
use crate::providers::{
    CompositionStore, MarketDataProvider, RankingStrategyProvider, ScoreProvider,
    UniverseProvider,
};
use crate::rebalance;
use crate::screening::select::AdmissionVia;
use crate::screening::{dedup, diversify, enrich, filters, rank, select};
use crate::weighting;

/// The index screening and rebalancing engine.
///
/// Holds the external collaborator seams; all run state is local to
/// [`Engine::run`], so one engine can serve many indices.
pub struct Engine {
    universe: Arc<dyn UniverseProvider>,
    market: Arc<dyn MarketDataProvider>,
    scores: Arc<dyn ScoreProvider>,
    strategies: Option<Arc<dyn RankingStrategyProvider>>,
    store: Arc<dyn CompositionStore>,
}

impl Engine {
    pub fn new(
        universe: Arc<dyn UniverseProvider>,
        market: Arc<dyn MarketDataProvider>,
        scores: Arc<dyn ScoreProvider>,
        store: Arc<dyn CompositionStore>,
    ) -> Self {
        Self {
            universe,
            market,
            scores,
            strategies: None,
            store,
        }
    }

    /// Wire the collaborator that serves configured ranking strategies.
    pub fn with_strategy_provider(mut self, provider: Arc<dyn RankingStrategyProvider>) -> Self {
        self.strategies = Some(provider);
        self
    }

    /// Execute one screening run for the given index configuration.
    pub async fn run(&self, config: &IndexConfig) -> Result<RunReport, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;

        info!(index = %config.name, "Starting screening run");
        let mut counts = StageCounts::default();
        let mut rejections = HashMap::new();

        // Phase 1: universe + static filters.
        let universe = self
            .universe
            .fetch_universe(&config.asset_types)
            .await
            .map_err(EngineError::Universe)?;
        counts.universe = universe.len();

        let survivors = filters::apply_quality(universe, &config.quality, &mut rejections);
        counts.after_quality = survivors.len();

        let survivors =
            filters::apply_exclusions(survivors, &config.excluded_tickers, &mut rejections);
        counts.after_exclusion = survivors.len();

        // Phase 2: market enrichment (concurrent bulk fetches, joined).
        let need_volumes = config.min_daily_traded_value.is_some();
        let mut candidates = enrich::enrich(
            survivors,
            self.market.as_ref(),
            self.scores.as_ref(),
            need_volumes,
            &mut rejections,
        )
        .await?;
        counts.after_enrichment = candidates.len();

        if let Some(min) = config.min_daily_traded_value {
            candidates = filters::apply_liquidity(candidates, min, &mut rejections);
        }
        if let Some(min) = config.min_upside {
            candidates = filters::apply_min_upside(candidates, min, &mut rejections);
        }
        counts.after_screening = candidates.len();

        // Phase 3: ordering.
        let strategy_ordered = config.ranking_strategy.is_some();
        if let Some(strategy) = &config.ranking_strategy {
            let provider = self.strategies.as_deref().ok_or_else(|| {
                EngineError::InvalidConfig(format!(
                    "ranking strategy '{}' configured but no strategy provider wired",
                    strategy.name
                ))
            })?;
            candidates =
                rank::apply_strategy(candidates, provider, strategy, &mut rejections).await?;
        } else {
            rank::sort_default(&mut candidates, config.ordering);
        }

        let candidates = dedup::dedup_share_classes(candidates, strategy_ordered, config.ordering);
        counts.after_dedup = candidates.len();
        let before_selection = candidates.clone();

        // Phase 4: selection + diversification.
        let mut selection = select::select(
            candidates,
            config.top_n,
            config.score_bands.as_deref(),
            config.ordering,
            strategy_ordered,
        );
        counts.after_selection = selection.selected.len();

        let (selected, removed_by_diversification) =
            self.diversify(&mut selection, &before_selection, config);
        counts.selected = selected.len();

        let outcome = ScreeningOutcome {
            selected,
            before_selection,
            removed_by_diversification,
            rejections,
            strategy_ordered,
        };

        // Phase 5: weighting + decision + persistence.
        let weights = weighting::calculate_weights(&outcome.selected, &config.weighting);
        let entry_date = Utc::now();
        let proposed: Vec<CompositionEntry> = outcome
            .selected
            .iter()
            .zip(weights)
            .map(|(candidate, target_weight)| CompositionEntry {
                ticker: candidate.ticker.clone(),
                target_weight,
                entry_price: candidate.price,
                entry_date,
            })
            .collect();

        let current = self
            .store
            .current(&config.name)
            .await
            .map_err(EngineError::Store)?;

        let decision = rebalance::decide(&current, &outcome, &config.rebalance);

        let changes = if decision.rebalance {
            rebalance::diff(&current, &proposed, &outcome, &selection.admissions, &decision)
        } else {
            Vec::new()
        };

        if decision.rebalance {
            self.store
                .replace(&config.name, &proposed, &changes)
                .await
                .map_err(EngineError::Store)?;
            info!(
                index = %config.name,
                instruments = proposed.len(),
                changes = changes.len(),
                reason = %decision.reason,
                "Composition rebalanced"
            );
        } else {
            info!(index = %config.name, reason = %decision.reason, "Composition held");
        }

        Ok(RunReport {
            index: config.name.clone(),
            rebalanced: decision.rebalance,
            reason: decision.reason,
            counts,
            composition: proposed,
            changes,
        })
    }

    /// Apply the configured diversification mode to the selection.
    ///
    /// Target-allocation mode may pull unselected candidates back in; such
    /// newcomers get a sector-allocation admission for the audit trail.
    fn diversify(
        &self,
        selection: &mut select::Selection,
        before_selection: &[Candidate],
        config: &IndexConfig,
    ) -> (Vec<Candidate>, Vec<Candidate>) {
        if let Some(allocation) = &config.diversification.sector_allocation {
            let top_n = config.top_n.unwrap_or(selection.selected.len());
            let selected_set: HashSet<String> = selection
                .selected
                .iter()
                .map(|c| c.ticker.clone())
                .collect();

            let mut ordered = std::mem::take(&mut selection.selected);
            ordered.extend(
                before_selection
                    .iter()
                    .filter(|c| !selected_set.contains(&c.ticker))
                    .cloned(),
            );

            let result = diversify::allocate_by_sector(ordered, allocation, top_n);

            let kept_set: HashSet<&str> = result.kept.iter().map(|c| c.ticker.as_str()).collect();
            let removed: Vec<Candidate> = before_selection
                .iter()
                .filter(|c| selected_set.contains(&c.ticker) && !kept_set.contains(c.ticker.as_str()))
                .cloned()
                .collect();

            for candidate in &result.kept {
                if !selected_set.contains(&candidate.ticker) {
                    selection
                        .admissions
                        .insert(candidate.ticker.clone(), AdmissionVia::SectorAllocation);
                }
            }

            (result.kept, removed)
        } else {
            let result = diversify::limit_by_sector(
                std::mem::take(&mut selection.selected),
                config.diversification.max_count_per_sector.as_ref(),
            );
            (result.kept, result.removed)
        }
    }
}
