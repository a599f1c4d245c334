//! Belief engine B (§4.3): derives a single (belief, confidence) pair for
//! one wallet on one market at evaluation instant T from that wallet's
//! trades on that market up to T.

use chrono::{DateTime, Utc};

use crate::config::PipelineConfig;
use crate::types::Trade;

pub struct BeliefOutput {
    pub belief: f64,
    pub confidence: f64,
    pub signal_mass: f64,
    pub n_trades: u64,
}

fn sign(yes_belief: f64) -> f64 {
    if yes_belief >= 0.5 {
        1.0
    } else {
        -1.0
    }
}

/// Fraction of adjacent trade pairs (by revealed YES-belief sign around 0.5)
/// that flip, over trades already in chronological order. Shared by the
/// belief engine's persistence score and the aggregator's anti-noise term.
pub fn churn_fraction(trades_sorted: &[&Trade]) -> f64 {
    if trades_sorted.len() < 2 {
        return 0.0;
    }
    let flips = trades_sorted
        .windows(2)
        .filter(|w| sign(w[0].yes_belief()) != sign(w[1].yes_belief()))
        .count();
    flips as f64 / (trades_sorted.len() - 1) as f64
}

/// Infer (belief, confidence) for one wallet's trades on one market, up to
/// and including instant `t`. `trades` need not be pre-sorted or
/// pre-filtered; this filters to `ts <= t` and sorts internally so callers
/// can pass the wallet's full trade history for the market. Returns `None`
/// if there are no trades at or before `t` (the wallet does not
/// participate).
pub fn infer_belief(trades: &[Trade], t: DateTime<Utc>, cfg: &PipelineConfig) -> Option<BeliefOutput> {
    let mut relevant: Vec<&Trade> = trades.iter().filter(|tr| tr.ts <= t).collect();
    if relevant.is_empty() {
        return None;
    }
    relevant.sort_by_key(|tr| tr.ts);

    let mut raw_weight_sum = 0.0;
    let mut belief_sum = 0.0;
    let mut streak_len = 0u32;
    let mut streak_sign: Option<f64> = None;

    for tr in &relevant {
        let yb = tr.yes_belief();
        let s = sign(yb);
        streak_len = match streak_sign {
            Some(prev) if prev == s => streak_len + 1,
            _ => 1,
        };
        streak_sign = Some(s);

        let size_weight = tr.size.sqrt();
        let lag_hours = (t - tr.ts).num_seconds() as f64 / 3600.0;
        let time_weight = 2f64.powf(-lag_hours / cfg.half_life_hours);
        let persistence_boost = 1.0 + 0.1 * (streak_len.min(5) as f64);

        let raw_weight = size_weight * time_weight * persistence_boost;
        raw_weight_sum += raw_weight;
        belief_sum += yb * raw_weight;
    }

    let belief = belief_sum / raw_weight_sum;
    let signal_mass = raw_weight_sum;
    let n_trades = relevant.len() as u64;

    let mass_score = 1.0 - (-signal_mass / cfg.signal_mass_scale).exp();
    let support_score = 1.0 - (-(n_trades as f64) / cfg.support_scale).exp();
    let persistence_score = 1.0 - churn_fraction(&relevant);
    let confidence = mass_score * support_score * persistence_score;

    Some(BeliefOutput {
        belief,
        confidence,
        signal_mass,
        n_trades,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, Side};
    use chrono::TimeZone;

    fn ts(hours: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(hours * 3600, 0).unwrap()
    }

    fn trade(ts_h: i64, price: f64, size: f64) -> Trade {
        Trade::try_new(None, "m".into(), "w".into(), ts(ts_h), Side::Yes, Action::Buy, price, size, None, None, None)
            .unwrap()
    }

    // S3: half-life recency.
    #[test]
    fn s3_half_life_recency() {
        let t0 = trade(0, 0.30, 1.0);
        let t1 = trade(96, 0.80, 1.0);
        let t = ts(96);
        let cfg = PipelineConfig::default();
        let out = infer_belief(&[t0, t1], t, &cfg).unwrap();
        assert!((out.belief - 0.70).abs() < 1e-6);
        assert!(out.confidence > 0.0);
    }

    // P9: half-life semantics — a single trade at lag H contributes half
    // the raw weight of the lag-0 case.
    #[test]
    fn p9_half_life_semantics() {
        let cfg = PipelineConfig::default();
        let lag0 = trade(0, 0.6, 1.0);
        let at_lag0 = infer_belief(&[lag0.clone()], ts(0), &cfg).unwrap();

        let lag_h = trade(0, 0.6, 1.0);
        let at_lag_h = infer_belief(&[lag_h], ts(cfg.half_life_hours as i64), &cfg).unwrap();

        assert!((at_lag_h.signal_mass - at_lag0.signal_mass / 2.0).abs() < 1e-6);
    }

    #[test]
    fn p3_belief_and_confidence_are_bounded() {
        let cfg = PipelineConfig::default();
        let t0 = trade(0, 0.1, 2.0);
        let t1 = trade(10, 0.9, 3.0);
        let out = infer_belief(&[t0, t1], ts(20), &cfg).unwrap();
        assert!((0.0..=1.0).contains(&out.belief));
        assert!((0.0..=1.0).contains(&out.confidence));
    }

    #[test]
    fn no_trades_before_t_yields_no_output() {
        let cfg = PipelineConfig::default();
        let future = trade(10, 0.5, 1.0);
        assert!(infer_belief(&[future], ts(0), &cfg).is_none());
    }
}
