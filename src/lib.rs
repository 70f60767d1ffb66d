//! Index Screening & Rebalancing Engine
//!
//! A rule-driven pipeline that turns a declarative [`config::IndexConfig`]
//! into a concrete weighted basket of assets, decides whether the existing
//! basket should be replaced, and produces a fully auditable diff of
//! entries and exits with reasons.
//!
//! Pipeline: universe filtering -> quality/liquidity/upside filtering ->
//! optional strategy ranking -> deduplication -> selection ->
//! diversification -> weighting -> rebalance decision -> composition diff.
//!
//! Valuation strategies, market data, scoring and persistence are external
//! collaborators behind the traits in [`providers`]; the engine itself is a
//! library-level batch computation invoked by an out-of-scope scheduler.
//!
//! # Example
//!
//! ```ignore
//! use index_engine::{Engine, IndexConfig};
//!
//! let engine = Engine::new(universe, market, scores, store);
//! let report = engine.run(&IndexConfig::top_n("value-20", 20)).await?;
//! println!("rebalanced: {} ({})", report.rebalanced, report.reason);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod providers;
pub mod rebalance;
pub mod screening;
pub mod weighting;

pub use config::{IndexConfig, OrderingField, Range, ScoreBand, WeightScheme};
pub use engine::Engine;
pub use error::{EngineError, ProviderError};
pub use model::{
    Candidate, ChangeAction, CompositionChange, CompositionEntry, HeldPosition, RunReport,
};
