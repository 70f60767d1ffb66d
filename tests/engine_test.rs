//! End-to-end screening runs against in-memory collaborators.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use index_engine::config::{ScoreBand, WeightingPolicy};
use index_engine::model::{HeldPosition, Instrument};
use index_engine::providers::{
    CompositionStore, MarketDataProvider, ScoreProvider, UniverseProvider, UpsideQuote,
};
use index_engine::{
    ChangeAction, CompositionChange, CompositionEntry, Engine, IndexConfig, OrderingField,
    ProviderError, WeightScheme,
};

// --- In-memory collaborators ---

struct MemUniverse {
    instruments: Vec<Instrument>,
}

#[async_trait]
impl UniverseProvider for MemUniverse {
    async fn fetch_universe(
        &self,
        asset_types: &[String],
    ) -> Result<Vec<Instrument>, ProviderError> {
        Ok(self
            .instruments
            .iter()
            .filter(|i| asset_types.is_empty() || asset_types.contains(&i.asset_type))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct MemMarket {
    prices: HashMap<String, Decimal>,
    volumes: HashMap<String, Decimal>,
    upsides: HashMap<String, UpsideQuote>,
}

#[async_trait]
impl MarketDataProvider for MemMarket {
    async fn latest_prices(
        &self,
        tickers: &[String],
    ) -> Result<HashMap<String, Decimal>, ProviderError> {
        Ok(tickers
            .iter()
            .filter_map(|t| self.prices.get(t).map(|p| (t.clone(), *p)))
            .collect())
    }

    async fn average_daily_volumes(
        &self,
        tickers: &[String],
    ) -> Result<HashMap<String, Decimal>, ProviderError> {
        Ok(tickers
            .iter()
            .filter_map(|t| self.volumes.get(t).map(|v| (t.clone(), *v)))
            .collect())
    }

    async fn upsides(
        &self,
        tickers: &[String],
    ) -> Result<HashMap<String, UpsideQuote>, ProviderError> {
        Ok(tickers
            .iter()
            .filter_map(|t| self.upsides.get(t).map(|q| (t.clone(), q.clone())))
            .collect())
    }
}

#[derive(Default)]
struct MemScores {
    scores: HashMap<String, f64>,
    failing: HashSet<String>,
}

#[async_trait]
impl ScoreProvider for MemScores {
    async fn overall_score(&self, ticker: &str) -> Result<f64, ProviderError> {
        if self.failing.contains(ticker) {
            return Err(ProviderError::Unavailable(format!(
                "scoring backend timed out for {ticker}"
            )));
        }
        self.scores
            .get(ticker)
            .copied()
            .ok_or_else(|| ProviderError::NotFound(format!("no score for {ticker}")))
    }
}

#[derive(Default)]
struct MemStore {
    current: Mutex<Vec<HeldPosition>>,
    appended: Mutex<Vec<CompositionChange>>,
}

#[async_trait]
impl CompositionStore for MemStore {
    async fn current(&self, _index: &str) -> Result<Vec<HeldPosition>, ProviderError> {
        let held = self.current.lock().unwrap();
        Ok(held
            .iter()
            .map(|p| HeldPosition {
                ticker: p.ticker.clone(),
                entry_price: p.entry_price,
            })
            .collect())
    }

    async fn replace(
        &self,
        _index: &str,
        rows: &[CompositionEntry],
        changes: &[CompositionChange],
    ) -> Result<(), ProviderError> {
        *self.current.lock().unwrap() = rows
            .iter()
            .map(|r| HeldPosition {
                ticker: r.ticker.clone(),
                entry_price: r.entry_price,
            })
            .collect();
        self.appended.lock().unwrap().extend_from_slice(changes);
        Ok(())
    }
}

// --- Fixture helpers ---

fn stock(ticker: &str, sector: &str, roe: Option<f64>) -> Instrument {
    Instrument {
        ticker: ticker.to_string(),
        issuer: format!("{ticker} Corp"),
        sector: sector.to_string(),
        asset_type: "stock".to_string(),
        market_cap: Some(dec!(1000000000)),
        fundamentals: roe
            .map(|v| HashMap::from([("roe".to_string(), v)]))
            .unwrap_or_default(),
    }
}

fn quote(upside: f64) -> UpsideQuote {
    UpsideQuote {
        best: upside,
        model: "dcf".to_string(),
        by_model: HashMap::from([("dcf".to_string(), upside)]),
        dividend_yield: Some(0.03),
    }
}

struct Fixture {
    universe: Vec<Instrument>,
    market: MemMarket,
    scores: MemScores,
}

impl Fixture {
    fn new() -> Self {
        Self {
            universe: Vec::new(),
            market: MemMarket::default(),
            scores: MemScores::default(),
        }
    }

    fn add(mut self, ticker: &str, sector: &str, roe: Option<f64>, upside: f64, score: f64) -> Self {
        self.universe.push(stock(ticker, sector, roe));
        self.market.prices.insert(ticker.to_string(), dec!(50));
        self.market.upsides.insert(ticker.to_string(), quote(upside));
        self.scores.scores.insert(ticker.to_string(), score);
        self
    }

    fn engine(self) -> (Engine, Arc<MemStore>) {
        let store = Arc::new(MemStore::default());
        let engine = Engine::new(
            Arc::new(MemUniverse {
                instruments: self.universe,
            }),
            Arc::new(self.market),
            Arc::new(self.scores),
            store.clone(),
        );
        (engine, store)
    }
}

// --- Tests ---

#[tokio::test]
async fn quality_filter_excludes_null_roe() {
    // Five candidates, roe >= 0.10: two nulls excluded, three flow through.
    let fixture = Fixture::new()
        .add("AAA", "Technology", Some(0.15), 20.0, 80.0)
        .add("BBB", "Technology", Some(0.20), 15.0, 70.0)
        .add("CCC", "Energy", Some(0.12), 10.0, 60.0)
        .add("DDD", "Energy", None, 25.0, 90.0)
        .add("EEE", "Financials", None, 30.0, 95.0);

    let mut config = IndexConfig::top_n("quality-test", 10);
    config.quality.insert(
        "roe".to_string(),
        index_engine::Range {
            gte: Some(0.10),
            lte: None,
        },
    );

    let (engine, _) = fixture.engine();
    let report = engine.run(&config).await.unwrap();

    assert_eq!(report.counts.universe, 5);
    assert_eq!(report.counts.after_quality, 3);
    assert_eq!(report.counts.after_enrichment, 3);
    assert_eq!(report.composition.len(), 3);
    assert!(report.rebalanced);
}

#[tokio::test]
async fn weights_sum_to_one_and_persist() {
    let fixture = Fixture::new()
        .add("AAA", "Technology", Some(0.2), 20.0, 80.0)
        .add("BBB", "Energy", Some(0.2), 15.0, 60.0)
        .add("CCC", "Financials", Some(0.2), 10.0, 40.0);

    let mut config = IndexConfig::top_n("weights-test", 3);
    config.weighting = WeightingPolicy {
        scheme: WeightScheme::OverallScore,
        ..WeightingPolicy::default()
    };

    let (engine, store) = fixture.engine();
    let report = engine.run(&config).await.unwrap();

    let total: f64 = report.composition.iter().map(|e| e.target_weight).sum();
    assert!((total - 1.0).abs() < 1e-4);
    assert_eq!(store.current.lock().unwrap().len(), 3);
    assert_eq!(store.appended.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn second_run_with_unchanged_inputs_holds() {
    let fixture = Fixture::new()
        .add("AAA", "Technology", Some(0.2), 20.0, 80.0)
        .add("BBB", "Energy", Some(0.2), 15.0, 60.0);

    let config = IndexConfig::top_n("idempotence-test", 2);

    let (engine, _) = fixture.engine();
    let first = engine.run(&config).await.unwrap();
    assert!(first.rebalanced);
    assert_eq!(first.changes.len(), 2);

    let second = engine.run(&config).await.unwrap();
    assert!(!second.rebalanced);
    assert!(second.changes.is_empty());
}

#[tokio::test]
async fn capacity_blocked_upside_does_not_churn_composition() {
    // HELDY keeps the single slot on dividend yield; BLOCKED's much larger
    // upside lost the capacity race and must not rewrite an unchanged
    // composition on the second run.
    let mut fixture = Fixture::new()
        .add("HELDY", "Technology", Some(0.2), 10.0, 80.0)
        .add("BLOCKED", "Energy", Some(0.2), 40.0, 60.0);
    fixture
        .market
        .upsides
        .get_mut("HELDY")
        .unwrap()
        .dividend_yield = Some(0.09);
    fixture
        .market
        .upsides
        .get_mut("BLOCKED")
        .unwrap()
        .dividend_yield = Some(0.01);

    let mut config = IndexConfig::top_n("churn-test", 1);
    config.ordering = OrderingField::DividendYield;

    let (engine, store) = fixture.engine();
    let first = engine.run(&config).await.unwrap();
    assert!(first.rebalanced);
    assert_eq!(first.composition[0].ticker, "HELDY");

    let second = engine.run(&config).await.unwrap();
    assert!(!second.rebalanced);
    assert!(second.changes.is_empty());
    // The store saw exactly the initial write and nothing after.
    assert_eq!(store.appended.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn sector_allocation_admission_annotated_on_entry() {
    // The Energy target pulls ENEA past two better-ranked Technology
    // names; its entry reason must carry the admission path.
    let fixture = Fixture::new()
        .add("TECA", "Technology", Some(0.2), 30.0, 80.0)
        .add("TECB", "Technology", Some(0.2), 25.0, 70.0)
        .add("ENEA", "Energy", Some(0.2), 10.0, 60.0);

    let mut config = IndexConfig::top_n("allocation-test", 2);
    config.diversification.sector_allocation =
        Some(HashMap::from([("Energy".to_string(), 0.5)]));

    let (engine, _) = fixture.engine();
    let report = engine.run(&config).await.unwrap();

    let tickers: Vec<&str> = report
        .composition
        .iter()
        .map(|e| e.ticker.as_str())
        .collect();
    assert!(tickers.contains(&"ENEA"));

    let entry = report
        .changes
        .iter()
        .find(|c| c.ticker == "ENEA" && c.action == ChangeAction::Entry)
        .unwrap();
    assert!(entry.reason.contains("sector target allocation"));
}

#[tokio::test]
async fn score_failure_degrades_one_candidate_not_the_run() {
    let mut fixture = Fixture::new()
        .add("AAA", "Technology", Some(0.2), 20.0, 80.0)
        .add("BBB", "Energy", Some(0.2), 15.0, 60.0);
    fixture.scores.failing.insert("BBB".to_string());

    // Band selection: the score-less candidate can never match a band.
    let mut config = IndexConfig::top_n("degrade-test", 5);
    config.score_bands = Some(vec![ScoreBand {
        min: 0.0,
        max: 100.0,
        max_count: 5,
    }]);
    config.top_n = None;

    let (engine, _) = fixture.engine();
    let report = engine.run(&config).await.unwrap();

    assert_eq!(report.counts.after_enrichment, 2);
    assert_eq!(report.composition.len(), 1);
    assert_eq!(report.composition[0].ticker, "AAA");
}

#[tokio::test]
async fn default_sector_limit_retains_four_financials() {
    // Six distinct issuers, not six share classes of one.
    let mut fixture = Fixture::new();
    for (i, ticker) in ["FINA", "FINB", "FINC", "FIND", "FINE", "FINF"]
        .into_iter()
        .enumerate()
    {
        fixture = fixture.add(ticker, "Financials", Some(0.2), 20.0 - i as f64, 80.0);
    }

    let config = IndexConfig::top_n("financials-test", 10);
    let (engine, _) = fixture.engine();
    let report = engine.run(&config).await.unwrap();

    assert_eq!(report.counts.after_selection, 6);
    assert_eq!(report.counts.selected, 4);
    assert_eq!(report.composition.len(), 4);
}

#[tokio::test]
async fn better_newcomer_replaces_worst_held() {
    let fixture = Fixture::new()
        .add("OLD", "Technology", Some(0.2), 10.0, 50.0)
        .add("NEW", "Energy", Some(0.2), 30.0, 90.0);

    let config = IndexConfig::top_n("swap-test", 1);
    let (engine, store) = fixture.engine();

    *store.current.lock().unwrap() = vec![HeldPosition {
        ticker: "OLD".to_string(),
        entry_price: dec!(50),
    }];

    let report = engine.run(&config).await.unwrap();

    assert!(report.rebalanced);
    let entry = report
        .changes
        .iter()
        .find(|c| c.action == ChangeAction::Entry)
        .unwrap();
    assert_eq!(entry.ticker, "NEW");
    assert!(entry.reason.contains("ranked #1"));
    assert!(entry.reason.contains("rebalance threshold"));

    let exit = report
        .changes
        .iter()
        .find(|c| c.action == ChangeAction::Exit)
        .unwrap();
    assert_eq!(exit.ticker, "OLD");
    assert!(exit.reason.contains("selection capacity"));
}

#[tokio::test]
async fn custom_weights_split_remainder() {
    let fixture = Fixture::new()
        .add("AAA", "Technology", Some(0.2), 20.0, 80.0)
        .add("BBB", "Energy", Some(0.2), 15.0, 60.0)
        .add("CCC", "Financials", Some(0.2), 10.0, 40.0);

    let mut config = IndexConfig::top_n("custom-test", 3);
    config.weighting.scheme = WeightScheme::Custom;
    config.weighting.custom.insert("AAA".to_string(), 0.6);
    config.weighting.custom.insert("BBB".to_string(), 0.3);

    let (engine, _) = fixture.engine();
    let report = engine.run(&config).await.unwrap();

    let weight_of = |ticker: &str| {
        report
            .composition
            .iter()
            .find(|e| e.ticker == ticker)
            .unwrap()
            .target_weight
    };
    assert!((weight_of("AAA") - 0.6).abs() < 1e-4);
    assert!((weight_of("BBB") - 0.3).abs() < 1e-4);
    assert!((weight_of("CCC") - 0.1).abs() < 1e-4);
}

#[tokio::test]
async fn liquidity_filter_drops_thin_names() {
    let mut fixture = Fixture::new()
        .add("LIQ", "Technology", Some(0.2), 20.0, 80.0)
        .add("THIN", "Energy", Some(0.2), 15.0, 60.0);
    fixture.market.volumes.insert("LIQ".to_string(), dec!(5000000));
    fixture.market.volumes.insert("THIN".to_string(), dec!(1000));

    let mut config = IndexConfig::top_n("liquidity-test", 5);
    config.min_daily_traded_value = Some(dec!(1000000));

    let (engine, _) = fixture.engine();
    let report = engine.run(&config).await.unwrap();

    assert_eq!(report.counts.after_screening, 1);
    assert_eq!(report.composition[0].ticker, "LIQ");
}

#[tokio::test]
async fn share_classes_collapse_to_best() {
    let fixture = Fixture::new()
        .add("ITUB3", "Financials", Some(0.2), 10.0, 70.0)
        .add("ITUB4", "Financials", Some(0.2), 18.0, 70.0)
        .add("VALE3", "Materials", Some(0.2), 12.0, 60.0);

    let config = IndexConfig::top_n("dedup-test", 5);
    let (engine, _) = fixture.engine();
    let report = engine.run(&config).await.unwrap();

    assert_eq!(report.counts.after_dedup, 2);
    let tickers: Vec<&str> = report
        .composition
        .iter()
        .map(|e| e.ticker.as_str())
        .collect();
    assert!(tickers.contains(&"ITUB4"));
    assert!(!tickers.contains(&"ITUB3"));
}

#[tokio::test]
async fn exit_reason_names_quality_failure() {
    // HELD passes nothing this run; the exit reason must say why.
    let fixture = Fixture::new()
        .add("GOOD", "Technology", Some(0.2), 20.0, 80.0)
        .add("HELD", "Energy", Some(0.01), 15.0, 60.0);

    let mut config = IndexConfig::top_n("exit-reason-test", 5);
    config.quality.insert(
        "roe".to_string(),
        index_engine::Range {
            gte: Some(0.10),
            lte: None,
        },
    );

    let (engine, store) = fixture.engine();
    *store.current.lock().unwrap() = vec![HeldPosition {
        ticker: "HELD".to_string(),
        entry_price: dec!(50),
    }];

    let report = engine.run(&config).await.unwrap();

    let exit = report
        .changes
        .iter()
        .find(|c| c.action == ChangeAction::Exit)
        .unwrap();
    assert_eq!(exit.ticker, "HELD");
    assert!(exit.reason.contains("failed quality check"));
    assert!(exit.reason.contains("roe"));
}

#[tokio::test]
async fn hold_writes_nothing() {
    let fixture = Fixture::new().add("AAA", "Technology", Some(0.2), 20.0, 80.0);
    let config = IndexConfig::top_n("hold-test", 1);

    let (engine, store) = fixture.engine();
    *store.current.lock().unwrap() = vec![HeldPosition {
        ticker: "AAA".to_string(),
        entry_price: dec!(50),
    }];

    let report = engine.run(&config).await.unwrap();

    assert!(!report.rebalanced);
    assert!(store.appended.lock().unwrap().is_empty());
}
