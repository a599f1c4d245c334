//! Canonical record types.
//!
//! Market, Trade and Outcome are owned by ingestion; everything else here
//! (WalletMetric, WalletWeight, Snapshot, BacktestReport) is a pure function
//! of those two at a given pipeline instant and may be dropped and rebuilt
//! without loss of input data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sentinel category bucket for a market with no category, and for the
/// wallet-global rows emitted by the feature engine.
pub const ALL_BUCKET: &str = "_all_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HorizonBucket {
    Short,
    Medium,
    Long,
}

impl HorizonBucket {
    pub fn label(&self) -> &'static str {
        match self {
            HorizonBucket::Short => "short",
            HorizonBucket::Medium => "medium",
            HorizonBucket::Long => "long",
        }
    }

    /// Bucket a trade-to-resolution gap using the configured thresholds.
    /// Defined only for resolved markets; callers must not invoke this for
    /// unresolved trades.
    pub fn from_gap(gap: chrono::Duration, short_max: chrono::Duration, medium_max: chrono::Duration) -> Self {
        if gap <= short_max {
            HorizonBucket::Short
        } else if gap <= medium_max {
            HorizonBucket::Medium
        } else {
            HorizonBucket::Long
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub end_time: DateTime<Utc>,
    /// Empty string is normalized to `ALL_BUCKET` by `category_bucket`.
    pub category: String,
    pub liquidity: Option<f64>,
    pub resolution_source: Option<String>,
}

impl Market {
    pub fn category_bucket(&self) -> &str {
        if self.category.trim().is_empty() {
            ALL_BUCKET
        } else {
            self.category.as_str()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub market: String,
    /// 0 = NO, 1 = YES.
    pub resolved_outcome: u8,
    pub resolution_time: DateTime<Utc>,
}

impl Outcome {
    pub fn y(&self) -> f64 {
        self.resolved_outcome as f64
    }
}

/// A single trade fill. Immutable after construction; `external_id` is
/// either source-supplied or a deterministic content hash of the fields
/// below, so dedup is exactly-once regardless of which the source gave us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub external_id: String,
    pub market: String,
    pub wallet: String,
    pub ts: DateTime<Utc>,
    pub side: Side,
    pub action: Action,
    pub price: f64,
    pub size: f64,
    pub aggressiveness: Option<f64>,
    pub maker_taker: Option<MakerTaker>,
    pub raw: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MakerTaker {
    Maker,
    Taker,
}

/// Raised when a would-be `Trade` fails a construction invariant. Callers
/// filter these at the record boundary and bump `RunCounters::malformed_input`
/// rather than propagate (see `error.rs`).
#[derive(Debug, thiserror::Error)]
pub enum TradeConstructionError {
    #[error("size must be positive, got {0}")]
    NonPositiveSize(f64),
    #[error("price {0} outside [0, 1]")]
    PriceOutOfRange(f64),
    #[error("price/size must be finite, got price={0} size={1}")]
    NonFinite(f64, f64),
}

impl Trade {
    /// Construct a trade, validating size > 0 and price in [0, 1]. If
    /// `external_id` is `None`, a deterministic content hash of the
    /// remaining fields is used instead (so re-ingesting the same fill is
    /// idempotent even when the source has no native identity for it).
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        external_id: Option<String>,
        market: String,
        wallet: String,
        ts: DateTime<Utc>,
        side: Side,
        action: Action,
        price: f64,
        size: f64,
        aggressiveness: Option<f64>,
        maker_taker: Option<MakerTaker>,
        raw: Option<serde_json::Value>,
    ) -> Result<Self, TradeConstructionError> {
        if !price.is_finite() || !size.is_finite() {
            return Err(TradeConstructionError::NonFinite(price, size));
        }
        if size <= 0.0 {
            return Err(TradeConstructionError::NonPositiveSize(size));
        }
        if !(0.0..=1.0).contains(&price) {
            return Err(TradeConstructionError::PriceOutOfRange(price));
        }

        let external_id = external_id.unwrap_or_else(|| {
            content_hash(&market, &wallet, ts, side, action, price, size)
        });

        Ok(Self {
            external_id,
            market,
            wallet,
            ts,
            side,
            action,
            price,
            size,
            aggressiveness,
            maker_taker,
            raw,
        })
    }

    /// The belief this trade revealed: the price if the wallet was buying
    /// YES exposure (or selling NO exposure), else its complement.
    pub fn yes_belief(&self) -> f64 {
        match (self.side, self.action) {
            (Side::Yes, Action::Buy) | (Side::No, Action::Sell) => self.price,
            _ => 1.0 - self.price,
        }
    }

    /// +1 for YES BUY / NO SELL, -1 otherwise; used by roi_proxy and flow
    /// summaries to sign notional by directional exposure.
    pub fn side_sign(&self) -> f64 {
        match (self.side, self.action) {
            (Side::Yes, Action::Buy) | (Side::No, Action::Sell) => 1.0,
            _ => -1.0,
        }
    }

    /// The YES-side market price implied by this fill, independent of which
    /// side of the book the wallet was on. Unlike `yes_belief`, BUY vs SELL
    /// does not flip this: a trade's price is always quoted against the side
    /// it was executed on.
    pub fn yes_price(&self) -> f64 {
        match self.side {
            Side::Yes => self.price,
            Side::No => 1.0 - self.price,
        }
    }
}

fn content_hash(
    market: &str,
    wallet: &str,
    ts: DateTime<Utc>,
    side: Side,
    action: Action,
    price: f64,
    size: f64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(market.as_bytes());
    hasher.update(wallet.as_bytes());
    hasher.update(ts.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update([side as u8, action as u8]);
    hasher.update(price.to_bits().to_le_bytes());
    hasher.update(size.to_bits().to_le_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub wallet: String,
    pub category_bucket: String,
    pub horizon_bucket: String,
}

impl BucketKey {
    pub fn new(wallet: impl Into<String>, category_bucket: impl Into<String>, horizon_bucket: impl Into<String>) -> Self {
        Self {
            wallet: wallet.into(),
            category_bucket: category_bucket.into(),
            horizon_bucket: horizon_bucket.into(),
        }
    }

    pub fn global(wallet: impl Into<String>) -> Self {
        Self::new(wallet, ALL_BUCKET, ALL_BUCKET)
    }

    pub fn is_global(&self) -> bool {
        self.category_bucket == ALL_BUCKET && self.horizon_bucket == ALL_BUCKET
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletMetric {
    pub key: BucketKey,
    pub sample_size: u64,
    pub brier: f64,
    pub calibration_error: f64,
    pub roi_proxy: f64,
    pub avg_size: f64,
    pub churn: f64,
    pub persistence: f64,
    pub specialization: f64,
    pub timing_edge: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletWeight {
    pub key: BucketKey,
    pub weight: f64,
    pub uncertainty: f64,
    pub raw_edge: f64,
    pub shrunk_edge: f64,
    pub support: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub wallet: String,
    pub weight: f64,
    pub belief: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSummary {
    pub net_yes_size: f64,
    pub trade_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortSummary {
    pub category_bucket: String,
    pub driver_count: usize,
    pub weight_sum: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub market: String,
    pub instant: DateTime<Utc>,
    pub market_prob: f64,
    pub crowd_prob: f64,
    pub divergence: f64,
    pub confidence: f64,
    pub disagreement: f64,
    pub participation_quality: f64,
    pub integrity_risk: f64,
    pub active_wallets: u64,
    pub drivers: Vec<Driver>,
    pub flow: FlowSummary,
    pub cohorts: Option<Vec<CohortSummary>>,
    pub explanation: Option<String>,
    pub degenerate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeBucketStat {
    pub label: String,
    pub count: u64,
    pub mean_edge: f64,
    pub mean_pnl: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEvaluation {
    pub market: String,
    pub market_prob_at_cutoff: f64,
    pub crowd_prob_at_cutoff: f64,
    pub realized: u8,
    pub brier_market: f64,
    pub brier_crowd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub run_id: String,
    pub cutoff_hours: i64,
    pub evaluations: Vec<MarketEvaluation>,
    pub brier_market_mean: f64,
    pub brier_crowd_mean: f64,
    pub brier_improvement: f64,
    pub log_loss_market_mean: f64,
    pub log_loss_crowd_mean: f64,
    pub edge_buckets: Vec<EdgeBucketStat>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn yes_belief_matches_spec_table() {
        let t = Trade::try_new(None, "m".into(), "w".into(), ts(0), Side::Yes, Action::Buy, 0.4, 4.0, None, None, None).unwrap();
        assert_eq!(t.yes_belief(), 0.4);

        let t = Trade::try_new(None, "m".into(), "w".into(), ts(0), Side::No, Action::Sell, 0.4, 4.0, None, None, None).unwrap();
        assert_eq!(t.yes_belief(), 0.4);

        let t = Trade::try_new(None, "m".into(), "w".into(), ts(0), Side::Yes, Action::Sell, 0.4, 4.0, None, None, None).unwrap();
        assert_eq!(t.yes_belief(), 0.6);

        let t = Trade::try_new(None, "m".into(), "w".into(), ts(0), Side::No, Action::Buy, 0.4, 4.0, None, None, None).unwrap();
        assert_eq!(t.yes_belief(), 0.6);
    }

    #[test]
    fn rejects_invalid_size_and_price() {
        assert!(Trade::try_new(None, "m".into(), "w".into(), ts(0), Side::Yes, Action::Buy, 0.4, 0.0, None, None, None).is_err());
        assert!(Trade::try_new(None, "m".into(), "w".into(), ts(0), Side::Yes, Action::Buy, 1.4, 1.0, None, None, None).is_err());
        assert!(Trade::try_new(None, "m".into(), "w".into(), ts(0), Side::Yes, Action::Buy, f64::NAN, 1.0, None, None, None).is_err());
    }

    #[test]
    fn content_hash_is_deterministic_and_distinguishes_fields() {
        let a = Trade::try_new(None, "m".into(), "w".into(), ts(0), Side::Yes, Action::Buy, 0.4, 1.0, None, None, None).unwrap();
        let b = Trade::try_new(None, "m".into(), "w".into(), ts(0), Side::Yes, Action::Buy, 0.4, 1.0, None, None, None).unwrap();
        assert_eq!(a.external_id, b.external_id);

        let c = Trade::try_new(None, "m".into(), "w".into(), ts(0), Side::Yes, Action::Buy, 0.41, 1.0, None, None, None).unwrap();
        assert_ne!(a.external_id, c.external_id);
    }

    #[test]
    fn category_bucket_normalizes_empty_to_sentinel() {
        let m = Market {
            id: "m".into(),
            question: "q".into(),
            end_time: ts(0),
            category: "".into(),
            liquidity: None,
            resolution_source: None,
        };
        assert_eq!(m.category_bucket(), ALL_BUCKET);
    }
}
