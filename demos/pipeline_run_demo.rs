//! Demonstrates one pipeline run against a small synthetic fixture: a
//! handful of wallets trading two markets, aggregated into a crowd
//! probability and backtested against the realized outcomes.

use chrono::{TimeZone, Utc};
use crowdwisdom_core::{Action, BacktestRequest, InMemoryStore, Market, Outcome, PipelineConfig, PipelineRun, Side, Trade};

fn ts(hours: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(hours * 3600, 0).unwrap()
}

fn main() {
    tracing_subscriber::fmt::init();

    let markets = vec![
        Market {
            id: "election-2026".into(),
            question: "Will the incumbent win?".into(),
            end_time: ts(240),
            category: "politics".into(),
            liquidity: Some(50_000.0),
            resolution_source: Some("demo".into()),
        },
        Market {
            id: "championship-game".into(),
            question: "Will the home team win?".into(),
            end_time: ts(180),
            category: "sports".into(),
            liquidity: Some(12_000.0),
            resolution_source: Some("demo".into()),
        },
    ];

    let outcomes = vec![
        Outcome {
            market: "election-2026".into(),
            resolved_outcome: 1,
            resolution_time: ts(240),
        },
        Outcome {
            market: "championship-game".into(),
            resolved_outcome: 0,
            resolution_time: ts(180),
        },
    ];

    let trades = vec![
        Trade::try_new(None, "election-2026".into(), "wallet_a".into(), ts(0), Side::Yes, Action::Buy, 0.42, 10.0, None, None, None).unwrap(),
        Trade::try_new(None, "election-2026".into(), "wallet_a".into(), ts(48), Side::Yes, Action::Buy, 0.58, 6.0, None, None, None).unwrap(),
        Trade::try_new(None, "election-2026".into(), "wallet_b".into(), ts(72), Side::No, Action::Buy, 0.35, 20.0, None, None, None).unwrap(),
        Trade::try_new(None, "championship-game".into(), "wallet_a".into(), ts(10), Side::No, Action::Buy, 0.55, 4.0, None, None, None).unwrap(),
        Trade::try_new(None, "championship-game".into(), "wallet_c".into(), ts(20), Side::No, Action::Sell, 0.60, 3.0, None, None, None).unwrap(),
    ];

    let store = InMemoryStore::new(markets, trades, outcomes);
    let cfg = PipelineConfig::default();
    let pipeline = PipelineRun::new(&store, cfg);

    let report = pipeline
        .run(ts(150), Some(BacktestRequest::Sweep { max_hours: 24 }))
        .expect("pipeline run failed");

    println!("run_id: {}", report.run_id);
    println!("total faults filtered: {}", report.counters.total());
    for snap in &report.snapshots {
        println!(
            "{:<20} market={:.3} crowd={:.3} divergence={:+.3} confidence={:.3} degenerate={}",
            snap.market, snap.market_prob, snap.crowd_prob, snap.divergence, snap.confidence, snap.degenerate
        );
    }
    if let Some(last) = report.backtest_reports.last() {
        println!(
            "backtest cutoff={}h brier_market={:.4} brier_crowd={:.4} improvement={:.4}",
            last.cutoff_hours, last.brier_market_mean, last.brier_crowd_mean, last.brier_improvement
        );
    }
}
