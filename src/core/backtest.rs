//! Backtest driver X (§4.5): replays the aggregator at a configurable
//! number of hours before resolution and scores the result against the
//! realized outcome.
//!
//! Carries the teacher's walk-forward discipline from `BacktestEngine`: a
//! market is only eligible for a cutoff if there is a non-degenerate
//! pre-cutoff trade history, not just a single instantaneous observation.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::core::aggregator;
use crate::types::{BacktestReport, EdgeBucketStat, Market, MarketEvaluation, Outcome, Trade, WalletWeight};

/// A market is eligible for a cutoff-`h` backtest point only if
/// `resolution_time(m) - h` is strictly after the market's earliest trade —
/// otherwise the cutoff would fall before any trading activity exists to
/// evaluate, per §4.5.
pub fn is_eligible(outcome: &Outcome, earliest_trade: DateTime<Utc>, cutoff_hours: i64) -> bool {
    let cutoff_instant = outcome.resolution_time - chrono::Duration::hours(cutoff_hours);
    cutoff_instant > earliest_trade
}

fn log_loss(p: f64, y: u8, epsilon: f64) -> f64 {
    let p = p.clamp(epsilon, 1.0 - epsilon);
    if y == 1 {
        -p.ln()
    } else {
        -(1.0 - p).ln()
    }
}

fn edge_bucket_label(abs_divergence: f64, boundaries: (f64, f64, f64)) -> &'static str {
    let (b0, b1, b2) = boundaries;
    if abs_divergence < b0 {
        "[0%, 2%)"
    } else if abs_divergence < b1 {
        "[2%, 5%)"
    } else if abs_divergence < b2 {
        "[5%, 10%)"
    } else {
        "[10%, 100%]"
    }
}

/// Run one backtest at a single cutoff. `trades_by_market` must contain
/// every trade for every market in `markets` (the aggregator itself filters
/// to `ts <= T_m`). `run_id` is supplied by the caller (the pipeline owns
/// run identity).
pub fn run_backtest(
    run_id: &str,
    cutoff_hours: i64,
    markets: &[Market],
    outcomes: &HashMap<String, Outcome>,
    trades_by_market: &HashMap<String, Vec<Trade>>,
    weights: &[WalletWeight],
    cfg: &PipelineConfig,
) -> BacktestReport {
    let empty = Vec::new();

    let evaluations: Vec<MarketEvaluation> = markets
        .par_iter()
        .filter_map(|market| {
            let outcome = outcomes.get(&market.id)?;
            let trades = trades_by_market.get(&market.id).unwrap_or(&empty);
            let earliest = trades.iter().map(|tr| tr.ts).min()?;
            if !is_eligible(outcome, earliest, cutoff_hours) {
                return None;
            }

            let t_m = outcome.resolution_time - chrono::Duration::hours(cutoff_hours);
            let mut counters = crate::error::RunCounters::default();
            let snapshot = aggregator::compute_snapshot(market, trades, weights, t_m, cfg, &mut counters).ok()?;

            let y = outcome.resolved_outcome;
            let yf = y as f64;
            Some(MarketEvaluation {
                market: market.id.clone(),
                market_prob_at_cutoff: snapshot.market_prob,
                crowd_prob_at_cutoff: snapshot.crowd_prob,
                realized: y,
                brier_market: (snapshot.market_prob - yf).powi(2),
                brier_crowd: (snapshot.crowd_prob - yf).powi(2),
            })
        })
        .collect();

    let mut evaluations = evaluations;
    evaluations.sort_by(|a, b| a.market.cmp(&b.market));

    let n = evaluations.len() as f64;
    let (brier_market_mean, brier_crowd_mean, log_loss_market_mean, log_loss_crowd_mean) = if n > 0.0 {
        let bm = evaluations.iter().map(|e| e.brier_market).sum::<f64>() / n;
        let bc = evaluations.iter().map(|e| e.brier_crowd).sum::<f64>() / n;
        let lm = evaluations
            .iter()
            .map(|e| log_loss(e.market_prob_at_cutoff, e.realized, cfg.belief_epsilon))
            .sum::<f64>()
            / n;
        let lc = evaluations
            .iter()
            .map(|e| log_loss(e.crowd_prob_at_cutoff, e.realized, cfg.belief_epsilon))
            .sum::<f64>()
            / n;
        (bm, bc, lm, lc)
    } else {
        (0.0, 0.0, 0.0, 0.0)
    };

    let brier_improvement = if brier_market_mean > 0.0 {
        1.0 - brier_crowd_mean / brier_market_mean
    } else {
        0.0
    };

    let mut buckets: HashMap<&'static str, Vec<&MarketEvaluation>> = HashMap::new();
    for e in &evaluations {
        let divergence = e.crowd_prob_at_cutoff - e.market_prob_at_cutoff;
        let label = edge_bucket_label(divergence.abs(), cfg.edge_bucket_boundaries);
        buckets.entry(label).or_default().push(e);
    }
    let order = ["[0%, 2%)", "[2%, 5%)", "[5%, 10%)", "[10%, 100%]"];
    let edge_buckets: Vec<EdgeBucketStat> = order
        .iter()
        .filter_map(|label| {
            let rows = buckets.get(label)?;
            let count = rows.len() as f64;
            let mean_edge = rows
                .iter()
                .map(|e| (e.crowd_prob_at_cutoff - e.market_prob_at_cutoff).abs())
                .sum::<f64>()
                / count;
            let mean_pnl = rows
                .iter()
                .map(|e| {
                    let divergence = e.crowd_prob_at_cutoff - e.market_prob_at_cutoff;
                    let sign = if divergence > 0.0 {
                        1.0
                    } else if divergence < 0.0 {
                        -1.0
                    } else {
                        0.0
                    };
                    sign * (2.0 * e.realized as f64 - 1.0) * divergence.abs()
                })
                .sum::<f64>()
                / count;
            let wins = rows
                .iter()
                .filter(|e| {
                    let divergence = e.crowd_prob_at_cutoff - e.market_prob_at_cutoff;
                    let sign = if divergence > 0.0 {
                        1.0
                    } else if divergence < 0.0 {
                        -1.0
                    } else {
                        0.0
                    };
                    sign == 2.0 * e.realized as f64 - 1.0
                })
                .count();
            Some(EdgeBucketStat {
                label: label.to_string(),
                count: count as u64,
                mean_edge,
                mean_pnl,
                win_rate: wins as f64 / count,
            })
        })
        .collect();

    BacktestReport {
        run_id: run_id.to_string(),
        cutoff_hours,
        evaluations,
        brier_market_mean,
        brier_crowd_mean,
        brier_improvement,
        log_loss_market_mean,
        log_loss_crowd_mean,
        edge_buckets,
    }
}

/// Sweep every cutoff in 1..=max_hours, reusing the eligibility predicate
/// per cutoff rather than recomputing it ad hoc.
pub fn run_backtest_sweep(
    run_id: &str,
    max_hours: i64,
    markets: &[Market],
    outcomes: &HashMap<String, Outcome>,
    trades_by_market: &HashMap<String, Vec<Trade>>,
    weights: &[WalletWeight],
    cfg: &PipelineConfig,
) -> Vec<BacktestReport> {
    (1..=max_hours)
        .into_par_iter()
        .map(|h| run_backtest(run_id, h, markets, outcomes, trades_by_market, weights, cfg))
        .collect()
}
