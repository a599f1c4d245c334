//! Feature engine F (§4.1): per-wallet Brier/calibration/ROI/style metrics,
//! bucketed by category and time-horizon, from resolved trade observations.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::types::{BucketKey, HorizonBucket, Market, Outcome, Trade, WalletMetric, ALL_BUCKET};

/// One resolved trade observation, flattened out of (Trade, Outcome, Market)
/// for bucket aggregation.
struct Observation<'a> {
    wallet: &'a str,
    cat: &'a str,
    hz: HorizonBucket,
    ts: chrono::DateTime<chrono::Utc>,
    yes_belief: f64,
    y: f64,
    price: f64,
    size: f64,
    side_sign: f64,
}

/// Build the per-trade observation set from joined (Trade, Outcome, Market)
/// triples. Trades that resolved before they executed (a negative gap) are
/// malformed for analytics purposes and are filtered, bumping
/// `malformed_input`.
fn build_observations<'a>(
    rows: &'a [(Trade, Outcome, Market)],
    cfg: &PipelineConfig,
    counters: &mut crate::error::RunCounters,
) -> Vec<Observation<'a>> {
    let (short_max, medium_max) = cfg.horizon_thresholds;
    let mut obs = Vec::with_capacity(rows.len());
    for (trade, outcome, market) in rows {
        let gap = outcome.resolution_time - trade.ts;
        if gap < chrono::Duration::zero() {
            counters.malformed_input += 1;
            continue;
        }
        let hz = HorizonBucket::from_gap(gap, short_max, medium_max);
        obs.push(Observation {
            wallet: &trade.wallet,
            cat: market.category_bucket(),
            hz,
            ts: trade.ts,
            yes_belief: trade.yes_belief(),
            y: outcome.y(),
            price: trade.price,
            size: trade.size,
            side_sign: trade.side_sign(),
        });
    }
    obs
}

fn shannon_entropy(counts: &HashMap<&str, usize>) -> f64 {
    let total: usize = counts.values().sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .values()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.ln()
        })
        .sum()
}

fn sign(yes_belief: f64) -> f64 {
    if yes_belief >= 0.5 {
        1.0
    } else {
        -1.0
    }
}

fn churn_of(sorted: &[&Observation]) -> f64 {
    if sorted.len() < 2 {
        return 0.0;
    }
    let flips = sorted
        .windows(2)
        .filter(|w| sign(w[0].yes_belief) != sign(w[1].yes_belief))
        .count();
    flips as f64 / (sorted.len() - 1) as f64
}

fn calibration_error_of(obs: &[&Observation]) -> f64 {
    const DECILES: usize = 10;
    let mut buckets: Vec<Vec<&&Observation>> = vec![Vec::new(); DECILES];
    for o in obs {
        let idx = ((o.yes_belief * DECILES as f64) as usize).min(DECILES - 1);
        buckets[idx].push(o);
    }
    let total = obs.len() as f64;
    if total == 0.0 {
        return 0.0;
    }
    buckets
        .into_iter()
        .filter(|b| !b.is_empty())
        .map(|b| {
            let n = b.len() as f64;
            let mean_belief = b.iter().map(|o| o.yes_belief).sum::<f64>() / n;
            let mean_y = b.iter().map(|o| o.y).sum::<f64>() / n;
            (n / total) * (mean_belief - mean_y).abs()
        })
        .sum()
}

/// Aggregate one (wallet, bucket) group of observations into a
/// `WalletMetric`. `specialization` is supplied by the caller since it is
/// derived from the wallet's whole category distribution, not this bucket
/// alone.
fn aggregate_bucket(key: BucketKey, obs: &[&Observation], specialization: f64) -> WalletMetric {
    let n = obs.len() as f64;
    let brier = obs.iter().map(|o| (o.yes_belief - o.y).powi(2)).sum::<f64>() / n;

    let roi_numer: f64 = obs
        .iter()
        .map(|o| (2.0 * o.y - 1.0) * o.side_sign * o.size * (1.0 - o.price))
        .sum();
    let roi_denom: f64 = obs.iter().map(|o| o.size).sum();
    let roi_proxy = if roi_denom > 0.0 {
        (roi_numer / roi_denom).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    let avg_size = obs.iter().map(|o| o.size).sum::<f64>() / n;

    let mut sorted: Vec<&Observation> = obs.to_vec();
    sorted.sort_by_key(|o| o.ts);
    let churn = churn_of(&sorted);
    let persistence = 1.0 - churn;

    let timing_edge = obs
        .iter()
        .map(|o| (o.yes_belief - o.price) * (2.0 * o.y - 1.0))
        .sum::<f64>()
        / n;

    let calibration_error = calibration_error_of(&sorted);

    WalletMetric {
        key,
        sample_size: obs.len() as u64,
        brier,
        calibration_error,
        roi_proxy,
        avg_size,
        churn,
        persistence,
        specialization,
        timing_edge,
    }
}

/// Compute every `WalletMetric` row from joined (Trade, Outcome, Market)
/// observations. Groups by wallet, then fans each wallet out into its four
/// rows (global, cat, hz, cat×hz) in one pass. Parallel over wallets via
/// rayon; the result is sorted lexicographically by (wallet, category,
/// horizon) before return so the engine is deterministic regardless of
/// thread scheduling.
pub fn compute_wallet_metrics(
    rows: &[(Trade, Outcome, Market)],
    cfg: &PipelineConfig,
) -> (Vec<WalletMetric>, crate::error::RunCounters) {
    let mut counters = crate::error::RunCounters::default();
    let observations = build_observations(rows, cfg, &mut counters);

    let mut by_wallet: HashMap<&str, Vec<&Observation>> = HashMap::new();
    for o in &observations {
        by_wallet.entry(o.wallet).or_default().push(o);
    }

    let wallets: Vec<&str> = by_wallet.keys().copied().collect();
    let mut metrics: Vec<WalletMetric> = wallets
        .par_iter()
        .flat_map(|wallet| {
            let obs = &by_wallet[*wallet];

            let mut cat_counts: HashMap<&str, usize> = HashMap::new();
            for o in obs.iter() {
                *cat_counts.entry(o.cat).or_insert(0) += 1;
            }
            let k = cat_counts.len();
            let specialization_base = if k > 1 {
                (1.0 - shannon_entropy(&cat_counts) / (k as f64).ln()).max(0.0)
            } else {
                0.0
            };
            let total: usize = cat_counts.values().sum();

            let mut out = Vec::with_capacity(4);

            // global
            let all_refs: Vec<&Observation> = obs.clone();
            out.push(aggregate_bucket(BucketKey::global(*wallet), &all_refs, specialization_base));

            // per category
            let mut by_cat: HashMap<&str, Vec<&Observation>> = HashMap::new();
            for o in obs.iter() {
                by_cat.entry(o.cat).or_default().push(o);
            }
            for (cat, cat_obs) in &by_cat {
                let share = cat_counts.get(cat).copied().unwrap_or(0) as f64 / total.max(1) as f64;
                out.push(aggregate_bucket(
                    BucketKey::new(*wallet, *cat, ALL_BUCKET),
                    cat_obs,
                    specialization_base * share,
                ));
            }

            // per horizon
            let mut by_hz: HashMap<HorizonBucket, Vec<&Observation>> = HashMap::new();
            for o in obs.iter() {
                by_hz.entry(o.hz).or_default().push(o);
            }
            for (hz, hz_obs) in &by_hz {
                out.push(aggregate_bucket(
                    BucketKey::new(*wallet, ALL_BUCKET, hz.label()),
                    hz_obs,
                    specialization_base,
                ));
            }

            // per category x horizon
            let mut by_cat_hz: HashMap<(&str, HorizonBucket), Vec<&Observation>> = HashMap::new();
            for o in obs.iter() {
                by_cat_hz.entry((o.cat, o.hz)).or_default().push(o);
            }
            for ((cat, hz), cat_hz_obs) in &by_cat_hz {
                let share = cat_counts.get(cat).copied().unwrap_or(0) as f64 / total.max(1) as f64;
                out.push(aggregate_bucket(
                    BucketKey::new(*wallet, *cat, hz.label()),
                    cat_hz_obs,
                    specialization_base * share,
                ));
            }

            out
        })
        .collect();

    metrics.sort_by(|a, b| {
        (&a.key.wallet, &a.key.category_bucket, &a.key.horizon_bucket).cmp(&(
            &b.key.wallet,
            &b.key.category_bucket,
            &b.key.horizon_bucket,
        ))
    });
    (metrics, counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, MakerTaker, Side};
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn market(id: &str, cat: &str) -> Market {
        Market {
            id: id.into(),
            question: "q".into(),
            end_time: ts(10_000),
            category: cat.into(),
            liquidity: None,
            resolution_source: None,
        }
    }

    fn outcome(id: &str, y: u8, resolution: i64) -> Outcome {
        Outcome {
            market: id.into(),
            resolved_outcome: y,
            resolution_time: ts(resolution),
        }
    }

    // S1: one wallet, one resolved market, YES BUY at 0.4 size 4, y=1.
    #[test]
    fn s1_single_trade_bucket() {
        let trade = Trade::try_new(
            None,
            "m1".into(),
            "w1".into(),
            ts(0),
            Side::Yes,
            Action::Buy,
            0.4,
            4.0,
            None,
            Some(MakerTaker::Taker),
            None,
        )
        .unwrap();
        let rows = vec![(trade, outcome("m1", 1, 1), market("m1", "politics"))];
        let cfg = PipelineConfig::default();
        let (metrics, counters) = compute_wallet_metrics(&rows, &cfg);
        assert_eq!(counters.malformed_input, 0);

        let global = metrics
            .iter()
            .find(|m| m.key.is_global() && m.key.wallet == "w1")
            .unwrap();
        assert_eq!(global.sample_size, 1);
        assert!((global.brier - 0.36).abs() < 1e-9);
        assert_eq!(global.churn, 0.0);
        assert_eq!(global.timing_edge, 0.0);
    }

    #[test]
    fn negative_gap_is_filtered_as_malformed() {
        let trade = Trade::try_new(
            None,
            "m1".into(),
            "w1".into(),
            ts(100),
            Side::Yes,
            Action::Buy,
            0.4,
            1.0,
            None,
            None,
            None,
        )
        .unwrap();
        let rows = vec![(trade, outcome("m1", 1, 0), market("m1", "politics"))];
        let cfg = PipelineConfig::default();
        let (metrics, counters) = compute_wallet_metrics(&rows, &cfg);
        assert_eq!(counters.malformed_input, 1);
        assert!(metrics.is_empty());
    }

    #[test]
    fn p1_brier_and_calibration_in_unit_range() {
        let mut rows = Vec::new();
        for i in 0..20 {
            let price = 0.05 + (i as f64) * 0.045;
            let t = Trade::try_new(
                None,
                "m1".into(),
                "w1".into(),
                ts(i),
                Side::Yes,
                Action::Buy,
                price,
                1.0,
                None,
                None,
                None,
            )
            .unwrap();
            rows.push((t, outcome("m1", (i % 2) as u8, 1_000), market("m1", "sports")));
        }
        let cfg = PipelineConfig::default();
        let (metrics, _) = compute_wallet_metrics(&rows, &cfg);
        for m in &metrics {
            assert!((0.0..=1.0).contains(&m.brier));
            assert!((0.0..=1.0).contains(&m.calibration_error));
            assert!((m.persistence + m.churn - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn buckets_with_zero_observations_emit_no_row() {
        let rows: Vec<(Trade, Outcome, Market)> = Vec::new();
        let cfg = PipelineConfig::default();
        let (metrics, _) = compute_wallet_metrics(&rows, &cfg);
        assert!(metrics.is_empty());
    }
}
