//! Abstract store contract (§6.1).
//!
//! The core depends on these queries, never on a storage technology. A real
//! deployment backs this trait with a database adapter (out of scope here,
//! per §1); `InMemoryStore` is a reference implementation used by this
//! crate's own tests and as a usage example.

use chrono::{DateTime, Utc};

use crate::types::{BacktestReport, Market, Outcome, Snapshot, Trade, WalletMetric, WalletWeight};

pub trait Store {
    fn list_markets(&self) -> anyhow::Result<Vec<Market>>;

    /// Chronological, inclusive of both endpoints when given.
    fn list_trades(
        &self,
        market: &str,
        t_from: Option<DateTime<Utc>>,
        t_to: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<Trade>>;

    /// Every (trade, outcome) pair for a wallet, optionally narrowed to a
    /// category and/or horizon bucket.
    fn list_resolved_trades_for_wallet(
        &self,
        wallet: &str,
        cat: Option<&str>,
        hz: Option<&str>,
    ) -> anyhow::Result<Vec<(Trade, Outcome)>>;

    fn get_outcome(&self, market: &str) -> anyhow::Result<Option<Outcome>>;

    fn upsert_wallet_metrics(&self, rows: &[WalletMetric]) -> anyhow::Result<()>;
    fn upsert_wallet_weights(&self, rows: &[WalletWeight]) -> anyhow::Result<()>;
    fn append_snapshot(&self, row: &Snapshot) -> anyhow::Result<()>;
    fn insert_backtest_report(&self, row: &BacktestReport) -> anyhow::Result<()>;

    fn pipeline_run_begin(&self, kind: &str) -> anyhow::Result<String>;
    fn pipeline_run_end(
        &self,
        run_id: &str,
        status: &str,
        counters: &crate::error::RunCounters,
    ) -> anyhow::Result<()>;
}

/// In-process reference store backed by `Vec`/`HashMap`. Not a production
/// persistence layer (that remains an external collaborator, per §1) —
/// this exists purely so the core's own tests and examples have something
/// to drive the `Store` trait with.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    pub markets: Vec<Market>,
    pub trades: Vec<Trade>,
    pub outcomes: Vec<Outcome>,
    pub wallet_metrics: std::sync::Mutex<Vec<WalletMetric>>,
    pub wallet_weights: std::sync::Mutex<Vec<WalletWeight>>,
    pub snapshots: std::sync::Mutex<Vec<Snapshot>>,
    pub backtest_reports: std::sync::Mutex<Vec<BacktestReport>>,
    pub run_log: std::sync::Mutex<Vec<(String, String, crate::error::RunCounters)>>,
}

impl InMemoryStore {
    pub fn new(markets: Vec<Market>, trades: Vec<Trade>, outcomes: Vec<Outcome>) -> Self {
        Self {
            markets,
            trades,
            outcomes,
            ..Default::default()
        }
    }
}

impl Store for InMemoryStore {
    fn list_markets(&self) -> anyhow::Result<Vec<Market>> {
        Ok(self.markets.clone())
    }

    fn list_trades(
        &self,
        market: &str,
        t_from: Option<DateTime<Utc>>,
        t_to: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<Trade>> {
        let mut rows: Vec<Trade> = self
            .trades
            .iter()
            .filter(|t| t.market == market)
            .filter(|t| t_from.map_or(true, |from| t.ts >= from))
            .filter(|t| t_to.map_or(true, |to| t.ts <= to))
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.ts);
        Ok(rows)
    }

    fn list_resolved_trades_for_wallet(
        &self,
        wallet: &str,
        cat: Option<&str>,
        hz: Option<&str>,
    ) -> anyhow::Result<Vec<(Trade, Outcome)>> {
        let outcomes: std::collections::HashMap<&str, &Outcome> =
            self.outcomes.iter().map(|o| (o.market.as_str(), o)).collect();
        let markets: std::collections::HashMap<&str, &Market> =
            self.markets.iter().map(|m| (m.id.as_str(), m)).collect();

        let mut rows = Vec::new();
        for t in self.trades.iter().filter(|t| t.wallet == wallet) {
            let Some(outcome) = outcomes.get(t.market.as_str()) else {
                continue;
            };
            if let Some(cat) = cat {
                let Some(m) = markets.get(t.market.as_str()) else {
                    continue;
                };
                if m.category_bucket() != cat {
                    continue;
                }
            }
            if let Some(hz) = hz {
                let Some(m) = markets.get(t.market.as_str()) else {
                    continue;
                };
                let gap = outcome.resolution_time - t.ts;
                if gap < chrono::Duration::zero() {
                    continue;
                }
                let bucket = crate::types::HorizonBucket::from_gap(
                    gap,
                    chrono::Duration::hours(24),
                    chrono::Duration::days(7),
                );
                let _ = m;
                if bucket.label() != hz {
                    continue;
                }
            }
            rows.push((t.clone(), (*outcome).clone()));
        }
        Ok(rows)
    }

    fn get_outcome(&self, market: &str) -> anyhow::Result<Option<Outcome>> {
        Ok(self.outcomes.iter().find(|o| o.market == market).cloned())
    }

    fn upsert_wallet_metrics(&self, rows: &[WalletMetric]) -> anyhow::Result<()> {
        *self.wallet_metrics.lock().unwrap() = rows.to_vec();
        Ok(())
    }

    fn upsert_wallet_weights(&self, rows: &[WalletWeight]) -> anyhow::Result<()> {
        *self.wallet_weights.lock().unwrap() = rows.to_vec();
        Ok(())
    }

    fn append_snapshot(&self, row: &Snapshot) -> anyhow::Result<()> {
        self.snapshots.lock().unwrap().push(row.clone());
        Ok(())
    }

    fn insert_backtest_report(&self, row: &BacktestReport) -> anyhow::Result<()> {
        self.backtest_reports.lock().unwrap().push(row.clone());
        Ok(())
    }

    fn pipeline_run_begin(&self, _kind: &str) -> anyhow::Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }

    fn pipeline_run_end(
        &self,
        run_id: &str,
        status: &str,
        counters: &crate::error::RunCounters,
    ) -> anyhow::Result<()> {
        self.run_log
            .lock()
            .unwrap()
            .push((run_id.to_string(), status.to_string(), counters.clone()));
        Ok(())
    }
}
