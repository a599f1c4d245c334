//! Fault taxonomy and run-level accounting.
//!
//! Every fault named in the error-handling design is either filtered with a
//! counter increment (record- and market-level) or propagated as a run-level
//! `anyhow::Error` that discards the whole run. Nothing is ever silent: a
//! `RunCounters` travels alongside every phase's output and is folded into
//! the run log the caller persists via `Store::pipeline_run_end`.

use serde::{Deserialize, Serialize};

/// A market-level fault. Unlike record-level faults (which are filtered
/// inline with a counter bump and never constructed as an error value) this
/// is raised when a whole market's snapshot computation cannot proceed;
/// the caller catches it, counts it, and moves on to the next market.
#[derive(Debug, thiserror::Error)]
pub enum MarketFault {
    /// Aggregation produced a value outside its declared range (e.g. a
    /// belief outside [0, 1] after weighting). Fatal for this market only.
    #[error("invariant violated for market {market}: {detail}")]
    InvariantViolation { market: String, detail: String },
}

/// Accumulates every filtered record, filtered market, and skipped market
/// across one pipeline run. Rebuilt fresh per run; never persisted as an
/// entity of its own, only logged and attached to the run record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounters {
    /// Trades/Outcomes dropped at construction or lookup time: NaN, out of
    /// range, or otherwise malformed.
    pub malformed_input: u64,
    /// WalletWeight lookups that fell through the entire fallback chain.
    pub missing_prior_context: u64,
    /// Snapshots emitted in the degenerate state (no trusted participants,
    /// or a zero-weight-sum divide that collapses to the same case).
    pub degenerate_markets: u64,
    /// Divide-by-zero / non-finite aggregation results, folded into
    /// `degenerate_markets` per the error-handling design's "treated as
    /// DegenerateMarket" rule, but tracked separately for diagnosis.
    pub numerical_overflow: u64,
    /// Markets whose snapshot failed an invariant check; that market's
    /// Snapshot is not emitted, all others in the run proceed.
    pub invariant_violations: u64,
    /// Markets skipped outright by the per-market wallet-count envelope.
    pub markets_skipped_by_envelope: u64,
}

impl RunCounters {
    pub fn merge(&mut self, other: &RunCounters) {
        self.malformed_input += other.malformed_input;
        self.missing_prior_context += other.missing_prior_context;
        self.degenerate_markets += other.degenerate_markets;
        self.numerical_overflow += other.numerical_overflow;
        self.invariant_violations += other.invariant_violations;
        self.markets_skipped_by_envelope += other.markets_skipped_by_envelope;
    }

    pub fn total(&self) -> u64 {
        self.malformed_input
            + self.missing_prior_context
            + self.degenerate_markets
            + self.numerical_overflow
            + self.invariant_violations
            + self.markets_skipped_by_envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_every_field() {
        let mut a = RunCounters {
            malformed_input: 1,
            ..Default::default()
        };
        let b = RunCounters {
            malformed_input: 2,
            degenerate_markets: 3,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.malformed_input, 3);
        assert_eq!(a.degenerate_markets, 3);
        assert_eq!(a.total(), 6);
    }
}
