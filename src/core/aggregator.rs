//! Aggregator A (§4.4): produces a Snapshot for one market at one instant,
//! combining the weight engine's trust weights with the belief engine's
//! per-wallet beliefs into a crowd probability and its diagnostics.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::core::belief::{self, BeliefOutput};
use crate::error::MarketFault;
use crate::types::{BucketKey, CohortSummary, Driver, FlowSummary, HorizonBucket, Market, Snapshot, Trade, WalletWeight, ALL_BUCKET};

struct Participant {
    wallet: String,
    belief: f64,
    weight: f64,
    ew: f64,
    churn: f64,
}

/// Look up a wallet's weight for (cat, hz), falling through
/// (cat,*) → (*,hz) → (*,*) per the fallback chain in §4.4 step 2. `None`
/// means every candidate in the chain missed (`MissingPriorContext`,
/// distinct from a candidate that hit with a genuinely-zero weight).
fn lookup_weight(index: &HashMap<BucketKey, &WalletWeight>, wallet: &str, cat: &str, hz: &str) -> Option<f64> {
    let candidates = [
        BucketKey::new(wallet, cat, hz),
        BucketKey::new(wallet, cat, ALL_BUCKET),
        BucketKey::new(wallet, ALL_BUCKET, hz),
        BucketKey::new(wallet, ALL_BUCKET, ALL_BUCKET),
    ];
    for key in &candidates {
        if let Some(w) = index.get(key) {
            return Some(w.weight);
        }
    }
    None
}

fn weighted_mid_yes_price(trades_in_window: &[&Trade]) -> Option<f64> {
    let total_size: f64 = trades_in_window.iter().map(|t| t.size).sum();
    if total_size <= 0.0 {
        return None;
    }
    Some(trades_in_window.iter().map(|t| t.yes_price() * t.size).sum::<f64>() / total_size)
}

/// Market probability at T (§4.4 step 5): weighted-mid of YES prices over
/// trades in [T - Δ, T]; else the last observed YES price at or before T;
/// else 0.5.
fn market_prob_at(market_trades_sorted: &[&Trade], t: DateTime<Utc>, cfg: &PipelineConfig) -> f64 {
    let window_start = t - chrono::Duration::minutes(cfg.price_window_minutes);
    let in_window: Vec<&Trade> = market_trades_sorted
        .iter()
        .filter(|tr| tr.ts <= t && tr.ts >= window_start)
        .copied()
        .collect();
    if let Some(mid) = weighted_mid_yes_price(&in_window) {
        return mid;
    }
    if let Some(last) = market_trades_sorted.iter().filter(|tr| tr.ts <= t).last() {
        return last.yes_price();
    }
    0.5
}

/// Compute the Snapshot for `market` at instant `t`, given every trade the
/// market has seen (any instant; this filters to `ts <= t` itself) and the
/// full set of `WalletWeight` rows for the run. Returns `Err` only on an
/// invariant violation (a probability escaping [0, 1] after aggregation);
/// the caller skips that market and keeps going, per §7. Every
/// `MissingPriorContext`, `DegenerateMarket` and `NumericalOverflow` fault
/// filtered along the way is folded into `counters`.
pub fn compute_snapshot(
    market: &Market,
    market_trades: &[Trade],
    weights: &[WalletWeight],
    t: DateTime<Utc>,
    cfg: &PipelineConfig,
    counters: &mut crate::error::RunCounters,
) -> Result<Snapshot, MarketFault> {
    let mut sorted: Vec<&Trade> = market_trades.iter().filter(|tr| tr.ts <= t).collect();
    sorted.sort_by_key(|tr| tr.ts);

    let market_prob = market_prob_at(&sorted, t, cfg);

    let cat = market.category_bucket();
    // Pre-resolution horizon is unknown; the scheduled end_time stands in
    // for the expected resolution instant.
    let expected_gap = market.end_time - t;
    let hz = if expected_gap < chrono::Duration::zero() {
        HorizonBucket::Short
    } else {
        HorizonBucket::from_gap(expected_gap, cfg.horizon_thresholds.0, cfg.horizon_thresholds.1)
    };
    let hz_label = hz.label();

    let weight_index: HashMap<BucketKey, &WalletWeight> = weights.iter().map(|w| (w.key.clone(), w)).collect();

    let wallets: HashSet<&str> = sorted.iter().map(|tr| tr.wallet.as_str()).collect();

    let mut missed_lookups: u64 = 0;
    let mut participants: Vec<Participant> = wallets
        .into_iter()
        .filter_map(|wallet| {
            let wallet_trades: Vec<Trade> = sorted
                .iter()
                .filter(|tr| tr.wallet == wallet)
                .map(|tr| (*tr).clone())
                .collect();
            let BeliefOutput { belief, confidence, .. } = belief::infer_belief(&wallet_trades, t, cfg)?;

            let wallet_trade_refs: Vec<&Trade> = wallet_trades.iter().collect();
            let churn = belief::churn_fraction(&wallet_trade_refs);
            let anti_noise = (1.0 - 0.5 * churn).clamp(0.5, 1.0);

            let weight = match lookup_weight(&weight_index, wallet, cat, hz_label) {
                Some(w) => w,
                None => {
                    missed_lookups += 1;
                    0.0
                }
            };
            let ew = weight * confidence * anti_noise;

            Some(Participant {
                wallet: wallet.to_string(),
                belief,
                weight,
                ew,
                churn,
            })
        })
        .collect();
    participants.sort_by(|a, b| a.wallet.cmp(&b.wallet));
    counters.missing_prior_context += missed_lookups;

    let ew_sum: f64 = participants.iter().map(|p| p.ew).sum();
    let active: Vec<&Participant> = participants.iter().filter(|p| p.ew > 0.0).collect();
    let degenerate = ew_sum <= 0.0;
    if degenerate {
        counters.degenerate_markets += 1;
        counters.numerical_overflow += 1;
    }

    let crowd_prob = if !degenerate {
        participants.iter().map(|p| p.ew * p.belief).sum::<f64>() / ew_sum
    } else {
        market_prob
    };

    if !(0.0..=1.0).contains(&crowd_prob) || !(0.0..=1.0).contains(&market_prob) {
        return Err(MarketFault::InvariantViolation {
            market: market.id.clone(),
            detail: format!("probability out of range: crowd={crowd_prob} market={market_prob}"),
        });
    }

    let divergence = crowd_prob - market_prob;

    let (disagreement, participation_quality, concentration, churn_mean, integrity_risk, confidence) = if !degenerate
    {
        let variance =
            participants.iter().map(|p| p.ew * (p.belief - crowd_prob).powi(2)).sum::<f64>() / ew_sum;
        let disagreement = (variance * 4.0).clamp(0.0, 1.0);

        let ew_sq_sum: f64 = participants.iter().map(|p| p.ew * p.ew).sum();
        let effective_n = if ew_sq_sum > 0.0 { ew_sum * ew_sum / ew_sq_sum } else { 0.0 };
        let participation_quality = effective_n / (effective_n + cfg.participation_half);

        let concentration: f64 = participants.iter().map(|p| (p.ew / ew_sum).powi(2)).sum();
        let churn_mean = participants.iter().map(|p| p.ew * p.churn).sum::<f64>() / ew_sum;
        let integrity_risk = (0.6 * concentration + 0.4 * churn_mean).clamp(0.0, 1.0);

        let support_haircut = (active.len() as f64 / 10.0).clamp(0.0, 1.0);
        let confidence = participation_quality * (1.0 - disagreement) * (1.0 - 0.5 * integrity_risk) * support_haircut;

        (disagreement, participation_quality, concentration, churn_mean, integrity_risk, confidence)
    } else {
        (0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
    };

    let mut drivers: Vec<Driver> = if !degenerate {
        participants
            .iter()
            .map(|p| Driver {
                wallet: p.wallet.clone(),
                weight: p.weight,
                belief: p.belief,
                contribution: p.ew * (p.belief - market_prob) / ew_sum,
            })
            .collect()
    } else {
        Vec::new()
    };
    drivers.sort_by(|a, b| b.contribution.abs().partial_cmp(&a.contribution.abs()).unwrap());
    drivers.truncate(cfg.drivers_k);

    let contribution_sum: f64 = drivers.iter().map(|d| d.contribution.abs()).sum();
    if contribution_sum > 1.0 + 1e-6 {
        return Err(MarketFault::InvariantViolation {
            market: market.id.clone(),
            detail: format!("driver contributions sum to {contribution_sum}, exceeds 1"),
        });
    }

    let flow_window_start = t - chrono::Duration::hours(cfg.flow_window_hours);
    let flow_trades: Vec<&&Trade> = sorted
        .iter()
        .filter(|tr| tr.ts >= flow_window_start && tr.ts <= t)
        .collect();
    let flow = FlowSummary {
        net_yes_size: flow_trades.iter().map(|tr| tr.side_sign() * tr.size).sum(),
        trade_count: flow_trades.len() as u64,
    };

    let cohorts = if drivers.is_empty() {
        None
    } else {
        Some(vec![CohortSummary {
            category_bucket: cat.to_string(),
            driver_count: drivers.len(),
            weight_sum: drivers.iter().map(|d| d.weight).sum(),
        }])
    };

    Ok(Snapshot {
        market: market.id.clone(),
        instant: t,
        market_prob,
        crowd_prob,
        divergence,
        confidence,
        disagreement,
        participation_quality,
        integrity_risk,
        active_wallets: active.len() as u64,
        drivers,
        flow,
        cohorts,
        explanation: None,
        degenerate,
    })
}

/// Compute snapshots for every market at instant `t` in parallel. Markets
/// whose wallet count exceeds `cfg.per_market_wallet_envelope` are skipped
/// and counted, not silently dropped (§5).
pub fn compute_snapshots(
    markets: &[Market],
    trades_by_market: &HashMap<String, Vec<Trade>>,
    weights: &[WalletWeight],
    t: DateTime<Utc>,
    cfg: &PipelineConfig,
) -> (Vec<Snapshot>, crate::error::RunCounters) {
    let results: Vec<(Option<Snapshot>, crate::error::RunCounters)> = markets
        .par_iter()
        .map(|market| {
            let mut counters = crate::error::RunCounters::default();
            let empty = Vec::new();
            let market_trades = trades_by_market.get(&market.id).unwrap_or(&empty);

            if let Some(envelope) = cfg.per_market_wallet_envelope {
                let wallet_count = market_trades.iter().map(|tr| tr.wallet.as_str()).collect::<HashSet<_>>().len();
                if wallet_count > envelope {
                    counters.markets_skipped_by_envelope += 1;
                    return (None, counters);
                }
            }

            match compute_snapshot(market, market_trades, weights, t, cfg, &mut counters) {
                Ok(snap) => (Some(snap), counters),
                Err(err) => {
                    tracing::warn!(market = %market.id, error = %err, "market snapshot failed invariant check");
                    counters.invariant_violations += 1;
                    (None, counters)
                }
            }
        })
        .collect();

    let mut snapshots = Vec::new();
    let mut total_counters = crate::error::RunCounters::default();
    for (snap, counters) in results {
        if let Some(snap) = snap {
            snapshots.push(snap);
        }
        total_counters.merge(&counters);
    }
    snapshots.sort_by_key(|s| s.market.clone());
    (snapshots, total_counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, Side};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn market(end_time: i64) -> Market {
        Market {
            id: "m1".into(),
            question: "q".into(),
            end_time: ts(end_time),
            category: "politics".into(),
            liquidity: None,
            resolution_source: None,
        }
    }

    fn trade(wallet: &str, ts_s: i64, price: f64, size: f64) -> Trade {
        Trade::try_new(None, "m1".into(), wallet.into(), ts(ts_s), Side::Yes, Action::Buy, price, size, None, None, None)
            .unwrap()
    }

    // S4: degenerate market — one trade, wallet weight 0 via no W row.
    #[test]
    fn s4_degenerate_market() {
        let m = market(100_000);
        let t = trade("w1", 0, 0.55, 1.0);
        let cfg = PipelineConfig::default();
        let mut counters = crate::error::RunCounters::default();
        let snap = compute_snapshot(&m, &[t], &[], ts(1), &cfg, &mut counters).unwrap();
        assert!((snap.crowd_prob - 0.55).abs() < 1e-9);
        assert_eq!(snap.divergence, 0.0);
        assert_eq!(snap.confidence, 0.0);
        assert_eq!(snap.active_wallets, 0);
        assert_eq!(snap.integrity_risk, 0.0);
        assert!(snap.degenerate);
        assert_eq!(counters.missing_prior_context, 1);
        assert_eq!(counters.degenerate_markets, 1);
        assert_eq!(counters.numerical_overflow, 1);
    }

    // S5: integrity-risk suppression with two participating wallets.
    #[test]
    fn s5_integrity_risk_suppression() {
        let m = market(100_000);
        let t1 = trade("w1", 0, 0.8, 100.0);
        let t2 = trade("w2", 0, 0.8, 100.0);
        let weights = vec![
            WalletWeight {
                key: BucketKey::new("w1", ALL_BUCKET, ALL_BUCKET),
                weight: 0.9,
                uncertainty: 0.0,
                raw_edge: 0.0,
                shrunk_edge: 0.0,
                support: 10,
            },
            WalletWeight {
                key: BucketKey::new("w2", ALL_BUCKET, ALL_BUCKET),
                weight: 0.1,
                uncertainty: 0.0,
                raw_edge: 0.0,
                shrunk_edge: 0.0,
                support: 10,
            },
        ];
        let cfg = PipelineConfig::default();
        let mut counters = crate::error::RunCounters::default();
        let snap = compute_snapshot(&m, &[t1, t2], &weights, ts(0), &cfg, &mut counters).unwrap();
        assert!((snap.crowd_prob - 0.8).abs() < 0.05);
        assert!(snap.disagreement < 0.05);
        assert_eq!(counters.missing_prior_context, 0);
    }

    #[test]
    fn p4_probabilities_and_contributions_are_bounded() {
        let m = market(100_000);
        let trades = vec![trade("w1", 0, 0.6, 3.0), trade("w2", 5, 0.3, 2.0)];
        let weights = vec![WalletWeight {
            key: BucketKey::new("w1", ALL_BUCKET, ALL_BUCKET),
            weight: 1.5,
            uncertainty: 0.0,
            raw_edge: 0.0,
            shrunk_edge: 0.0,
            support: 10,
        }];
        let cfg = PipelineConfig::default();
        let mut counters = crate::error::RunCounters::default();
        let snap = compute_snapshot(&m, &trades, &weights, ts(10), &cfg, &mut counters).unwrap();
        assert!((0.0..=1.0).contains(&snap.market_prob));
        assert!((0.0..=1.0).contains(&snap.crowd_prob));
        let contribution_sum: f64 = snap.drivers.iter().map(|d| d.contribution.abs()).sum();
        assert!(contribution_sum <= 1.0 + 1e-9);
        // w2 has no W row at all: falls through the whole fallback chain.
        assert_eq!(counters.missing_prior_context, 1);
    }
}
