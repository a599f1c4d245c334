//! Pipeline orchestration (§2, §9 design notes): gather inputs → compute
//! F/W → compute Snapshots → optionally compute X, as three explicit,
//! side-effect-free phases inside one run. Each phase is a pure function of
//! its predecessor's output; the only I/O is the `Store` calls at the
//! phase boundaries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::core::{aggregator, backtest, features, weights};
use crate::error::RunCounters;
use crate::store::Store;
use crate::types::{BacktestReport, Market, Outcome, Snapshot, Trade};

/// Optional backtest request accompanying a pipeline run.
pub enum BacktestRequest {
    Single { cutoff_hours: i64 },
    Sweep { max_hours: i64 },
}

pub struct PipelineRunReport {
    pub run_id: String,
    pub counters: RunCounters,
    pub snapshots: Vec<Snapshot>,
    pub backtest_reports: Vec<BacktestReport>,
}

/// Sequences one pipeline run against a `Store`. This is the thing a
/// caller (the external sync-runner, out of scope here) drives; it is not
/// itself a scheduler.
pub struct PipelineRun<'a> {
    store: &'a dyn Store,
    cfg: PipelineConfig,
}

impl<'a> PipelineRun<'a> {
    pub fn new(store: &'a dyn Store, cfg: PipelineConfig) -> Self {
        Self { store, cfg }
    }

    /// Execute F → W → Snapshot sweep → optional X at instant `t_now`.
    pub fn run(&self, t_now: DateTime<Utc>, backtest_request: Option<BacktestRequest>) -> anyhow::Result<PipelineRunReport> {
        let run_id = self.store.pipeline_run_begin("full")?;
        tracing::info!(run_id = %run_id, "pipeline run started");

        let mut counters = RunCounters::default();

        // Phase 1: gather inputs.
        let markets = self.store.list_markets()?;
        let outcomes: HashMap<String, Outcome> = markets
            .iter()
            .filter_map(|m| self.store.get_outcome(&m.id).ok().flatten().map(|o| (m.id.clone(), o)))
            .collect();

        let trades_by_market: HashMap<String, Vec<Trade>> = markets
            .par_iter()
            .filter_map(|m| {
                self.store
                    .list_trades(&m.id, None, None)
                    .ok()
                    .map(|trades| (m.id.clone(), trades))
            })
            .collect();

        let observations: Vec<(Trade, Outcome, Market)> = markets
            .iter()
            .filter_map(|m| {
                let outcome = outcomes.get(&m.id)?;
                let trades = trades_by_market.get(&m.id)?;
                Some(
                    trades
                        .iter()
                        .map(|t| (t.clone(), outcome.clone(), m.clone()))
                        .collect::<Vec<_>>(),
                )
            })
            .flatten()
            .collect();

        // Phase 2: compute F then W.
        let (metrics, f_counters) = features::compute_wallet_metrics(&observations, &self.cfg);
        counters.merge(&f_counters);
        self.store.upsert_wallet_metrics(&metrics)?;

        let wallet_weights = weights::compute_wallet_weights(&metrics, &self.cfg);
        self.store.upsert_wallet_weights(&wallet_weights)?;

        // Phase 3: compute Snapshots for every market at t_now.
        let (snapshots, a_counters) =
            aggregator::compute_snapshots(&markets, &trades_by_market, &wallet_weights, t_now, &self.cfg);
        counters.merge(&a_counters);
        for snap in &snapshots {
            self.store.append_snapshot(snap)?;
        }

        // Optional phase: historical backtest (X).
        let backtest_reports = match backtest_request {
            Some(BacktestRequest::Single { cutoff_hours }) => {
                let report = backtest::run_backtest(
                    &run_id,
                    cutoff_hours,
                    &markets,
                    &outcomes,
                    &trades_by_market,
                    &wallet_weights,
                    &self.cfg,
                );
                self.store.insert_backtest_report(&report)?;
                vec![report]
            }
            Some(BacktestRequest::Sweep { max_hours }) => {
                let reports = backtest::run_backtest_sweep(
                    &run_id,
                    max_hours,
                    &markets,
                    &outcomes,
                    &trades_by_market,
                    &wallet_weights,
                    &self.cfg,
                );
                for report in &reports {
                    self.store.insert_backtest_report(report)?;
                }
                reports
            }
            None => Vec::new(),
        };

        self.store.pipeline_run_end(&run_id, "completed", &counters)?;
        tracing::info!(run_id = %run_id, total_faults = counters.total(), "pipeline run completed");

        Ok(PipelineRunReport {
            run_id,
            counters,
            snapshots,
            backtest_reports,
        })
    }
}
