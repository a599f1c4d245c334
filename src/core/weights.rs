//! Weight engine W (§4.2): converts each `WalletMetric` row into a bounded,
//! support-aware trust weight with an uncertainty estimate.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::types::{WalletMetric, WalletWeight, ALL_BUCKET};

fn raw_edge(brier: f64) -> f64 {
    0.25 - brier
}

/// Compute every `WalletWeight` row from `WalletMetric` rows. First builds a
/// `wallet -> global raw_edge` map (the shrinkage prior source), then maps
/// every row through the shrinkage and behavioral-adjuster chain in
/// parallel — the natural generalization of the teacher's cache-then-compute
/// pattern (build a lookup once, then fan the per-item work out over it).
/// Rows with `sample_size == 0` are dropped, not weighted to zero (§8, P2).
pub fn compute_wallet_weights(metrics: &[WalletMetric], cfg: &PipelineConfig) -> Vec<WalletWeight> {
    let global_edge: HashMap<&str, f64> = metrics
        .iter()
        .filter(|m| m.key.is_global())
        .map(|m| (m.key.wallet.as_str(), raw_edge(m.brier)))
        .collect();

    metrics
        .par_iter()
        .filter(|m| m.sample_size > 0)
        .map(|m| {
            let n = m.sample_size as f64;
            let edge = raw_edge(m.brier);
            let prior_edge = global_edge.get(m.key.wallet.as_str()).copied().unwrap_or(0.0);

            let alpha = n / (n + cfg.prior_strength);
            let shrunk_edge = alpha * edge + (1.0 - alpha) * prior_edge;

            let base = (shrunk_edge * 4.0).max(0.0);

            let churn_penalty = (1.0 - m.churn).clamp(0.25, 1.0);
            let calibration_penalty = (1.0 - 2.0 * m.calibration_error).clamp(0.25, 1.0);
            let has_category = m.key.category_bucket != ALL_BUCKET;
            let specialization_boost = if has_category {
                (1.0 + 0.5 * m.specialization).clamp(1.0, 2.0)
            } else {
                1.0
            };
            let timing_boost = (1.0 + 2.0 * m.timing_edge.max(0.0)).clamp(1.0, 2.0);

            let weight =
                (base * churn_penalty * calibration_penalty * specialization_boost * timing_boost).clamp(0.0, 4.0);
            let uncertainty = (m.calibration_error + 1.0 / (n + 1.0).sqrt()).clamp(0.0, 1.0);

            WalletWeight {
                key: m.key.clone(),
                weight,
                uncertainty,
                raw_edge: edge,
                shrunk_edge,
                support: m.sample_size,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BucketKey;

    fn metric(wallet: &str, cat: &str, hz: &str, n: u64, brier: f64) -> WalletMetric {
        WalletMetric {
            key: BucketKey::new(wallet, cat, hz),
            sample_size: n,
            brier,
            calibration_error: 0.0,
            roi_proxy: 0.0,
            avg_size: 1.0,
            churn: 0.0,
            persistence: 1.0,
            specialization: 0.0,
            timing_edge: 0.0,
        }
    }

    // S2: shrinkage pulls a thin wallet toward prior.
    #[test]
    fn s2_shrinkage_pulls_thin_wallet_to_prior() {
        let global = metric("w1", ALL_BUCKET, ALL_BUCKET, 40, 0.25);
        let bucket = metric("w1", "politics", "short", 5, 0.0);
        let cfg = PipelineConfig::default();
        let weights = compute_wallet_weights(&[global, bucket], &cfg);

        let row = weights
            .iter()
            .find(|w| w.key.category_bucket == "politics")
            .unwrap();
        assert!((row.raw_edge - 0.25).abs() < 1e-9);
        let alpha = 5.0 / 55.0;
        let expected_shrunk = alpha * 0.25 + (1.0 - alpha) * 0.0;
        assert!((row.shrunk_edge - expected_shrunk).abs() < 1e-6);
        assert!((row.shrunk_edge - 0.02273).abs() < 1e-4);
    }

    #[test]
    fn p2_weight_and_uncertainty_are_bounded() {
        let rows = vec![
            metric("w1", ALL_BUCKET, ALL_BUCKET, 100, 0.0),
            metric("w2", ALL_BUCKET, ALL_BUCKET, 1, 0.5),
            metric("w3", "sports", "long", 0, 0.25),
        ];
        let cfg = PipelineConfig::default();
        let weights = compute_wallet_weights(&rows, &cfg);
        for w in &weights {
            assert!(w.weight >= 0.0 && w.weight <= 4.0);
            assert!((0.0..=1.0).contains(&w.uncertainty));
        }
        assert!(weights.iter().all(|w| w.key.wallet != "w3"));
    }

    #[test]
    fn p6_shrinkage_limits() {
        let cfg = PipelineConfig::default();
        let prior = metric("w1", ALL_BUCKET, ALL_BUCKET, 10, 0.20);
        let large_n = metric("w1", "sports", ALL_BUCKET, 100_000, 0.10);
        let weights = compute_wallet_weights(&[prior.clone(), large_n], &cfg);
        let row = weights.iter().find(|w| w.key.category_bucket == "sports").unwrap();
        assert!((row.shrunk_edge - raw_edge(0.10)).abs() < 1e-3);

        let tiny_n = metric("w1", "crypto", ALL_BUCKET, 1, 0.10);
        let weights2 = compute_wallet_weights(&[prior, tiny_n], &cfg);
        let row2 = weights2.iter().find(|w| w.key.category_bucket == "crypto").unwrap();
        assert!((row2.shrunk_edge - raw_edge(0.20)).abs() < 1e-2);
    }
}
