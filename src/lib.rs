//! Crowd-wisdom aggregation core.
//!
//! Ingests prediction-market trade fills joined with resolved outcomes and
//! publishes, per market and snapshot instant, a crowd-wisdom probability
//! derived from a shrinkage-weighted aggregation of per-wallet latent
//! beliefs. The crate is a pure, synchronous kernel: it performs no I/O of
//! its own and depends on a caller-supplied `Store` implementation for
//! persistence.

pub mod config;
pub mod core;
pub mod error;
pub mod store;
pub mod types;

pub use config::PipelineConfig;
pub use core::pipeline::{BacktestRequest, PipelineRun, PipelineRunReport};
pub use error::{MarketFault, RunCounters};
pub use store::{InMemoryStore, Store};
pub use types::{
    Action, BacktestReport, BucketKey, CohortSummary, Driver, EdgeBucketStat, FlowSummary, HorizonBucket, MakerTaker,
    Market, MarketEvaluation, Outcome, Side, Snapshot, Trade, TradeConstructionError, WalletMetric, WalletWeight,
    ALL_BUCKET,
};
