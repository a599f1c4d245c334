//! Pipeline configuration (§6.2 of the specification).
//!
//! Every tunable the core exposes lives here with the spec's defaults.
//! `PipelineConfig::from_env` overlays environment variables the same way
//! the teacher backend's `Config::from_env` does: read, parse, fall back to
//! the default on absence or parse failure, never panic.

use chrono::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Shrinkage prior strength κ for the weight engine.
    pub prior_strength: f64,
    /// Belief engine recency half-life, in hours.
    pub half_life_hours: f64,
    /// Log-loss clamp epsilon.
    pub belief_epsilon: f64,
    /// Signal-mass confidence scale M0.
    pub signal_mass_scale: f64,
    /// Support confidence scale N0.
    pub support_scale: f64,
    /// Participation-quality half-saturation N_half.
    pub participation_half: f64,
    /// Number of top drivers retained per snapshot.
    pub drivers_k: usize,
    /// Flow-summary lookback window, in hours.
    pub flow_window_hours: i64,
    /// Market-price lookback window, in minutes.
    pub price_window_minutes: i64,
    /// (short_max, medium_max) horizon-bucket thresholds.
    pub horizon_thresholds: (Duration, Duration),
    /// Edge-bucket boundaries for the backtest breakdown, as fractions (0.02 = 2%).
    pub edge_bucket_boundaries: (f64, f64, f64),
    /// Default cutoff for a single backtest run, in hours before resolution.
    pub backtest_cutoff_hours: i64,
    /// Maximum cutoff for a backtest sweep, in hours before resolution.
    pub backtest_max_hours: i64,
    /// Optional per-market wallet-count envelope; markets above it are
    /// skipped and reported, not silently dropped. `None` means unbounded.
    pub per_market_wallet_envelope: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prior_strength: 50.0,
            half_life_hours: 48.0,
            belief_epsilon: 1e-6,
            signal_mass_scale: 5.0,
            support_scale: 4.0,
            participation_half: 8.0,
            drivers_k: 10,
            flow_window_hours: 6,
            price_window_minutes: 15,
            horizon_thresholds: (Duration::hours(24), Duration::days(7)),
            edge_bucket_boundaries: (0.02, 0.05, 0.10),
            backtest_cutoff_hours: 12,
            backtest_max_hours: 168,
            per_market_wallet_envelope: None,
        }
    }
}

impl PipelineConfig {
    /// Overlay environment-variable overrides onto the defaults. Follows
    /// the teacher's `Config::from_env` convention: `dotenv().ok()` first so
    /// a local `.env` can supply values in development, then each variable
    /// is parsed with a fallback to the existing value on absence or parse
    /// failure.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let mut cfg = Self::default();

        if let Some(v) = env_f64("CWC_PRIOR_STRENGTH") {
            cfg.prior_strength = v;
        }
        if let Some(v) = env_f64("CWC_HALF_LIFE_HOURS") {
            cfg.half_life_hours = v;
        }
        if let Some(v) = env_f64("CWC_BELIEF_EPSILON") {
            cfg.belief_epsilon = v;
        }
        if let Some(v) = env_f64("CWC_SIGNAL_MASS_SCALE") {
            cfg.signal_mass_scale = v;
        }
        if let Some(v) = env_f64("CWC_SUPPORT_SCALE") {
            cfg.support_scale = v;
        }
        if let Some(v) = env_f64("CWC_PARTICIPATION_HALF") {
            cfg.participation_half = v;
        }
        if let Some(v) = env_parse::<usize>("CWC_DRIVERS_K") {
            cfg.drivers_k = v;
        }
        if let Some(v) = env_parse::<i64>("CWC_FLOW_WINDOW_HOURS") {
            cfg.flow_window_hours = v;
        }
        if let Some(v) = env_parse::<i64>("CWC_PRICE_WINDOW_MINUTES") {
            cfg.price_window_minutes = v;
        }
        if let Some(v) = env_parse::<i64>("CWC_BACKTEST_CUTOFF_HOURS") {
            cfg.backtest_cutoff_hours = v;
        }
        if let Some(v) = env_parse::<i64>("CWC_BACKTEST_MAX_HOURS") {
            cfg.backtest_max_hours = v;
        }
        if let Some(v) = env_parse::<usize>("CWC_PER_MARKET_WALLET_ENVELOPE") {
            cfg.per_market_wallet_envelope = Some(v);
        }

        cfg
    }

    /// Parse a config from a TOML document using the same field names as
    /// the environment overrides (snake_case, `CWC_`-prefix stripped). Any
    /// field omitted keeps its default.
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        #[derive(serde::Deserialize, Default)]
        #[serde(default)]
        struct RawConfig {
            prior_strength: Option<f64>,
            half_life_hours: Option<f64>,
            belief_epsilon: Option<f64>,
            signal_mass_scale: Option<f64>,
            support_scale: Option<f64>,
            participation_half: Option<f64>,
            drivers_k: Option<usize>,
            flow_window_hours: Option<i64>,
            price_window_minutes: Option<i64>,
            backtest_cutoff_hours: Option<i64>,
            backtest_max_hours: Option<i64>,
            per_market_wallet_envelope: Option<usize>,
        }

        let raw: RawConfig = toml::from_str(raw)?;
        let mut cfg = Self::default();
        if let Some(v) = raw.prior_strength {
            cfg.prior_strength = v;
        }
        if let Some(v) = raw.half_life_hours {
            cfg.half_life_hours = v;
        }
        if let Some(v) = raw.belief_epsilon {
            cfg.belief_epsilon = v;
        }
        if let Some(v) = raw.signal_mass_scale {
            cfg.signal_mass_scale = v;
        }
        if let Some(v) = raw.support_scale {
            cfg.support_scale = v;
        }
        if let Some(v) = raw.participation_half {
            cfg.participation_half = v;
        }
        if let Some(v) = raw.drivers_k {
            cfg.drivers_k = v;
        }
        if let Some(v) = raw.flow_window_hours {
            cfg.flow_window_hours = v;
        }
        if let Some(v) = raw.price_window_minutes {
            cfg.price_window_minutes = v;
        }
        if let Some(v) = raw.backtest_cutoff_hours {
            cfg.backtest_cutoff_hours = v;
        }
        if let Some(v) = raw.backtest_max_hours {
            cfg.backtest_max_hours = v;
        }
        if let Some(v) = raw.per_market_wallet_envelope {
            cfg.per_market_wallet_envelope = Some(v);
        }
        Ok(cfg)
    }
}

fn env_f64(key: &str) -> Option<f64> {
    env_parse::<f64>(key)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.prior_strength, 50.0);
        assert_eq!(cfg.half_life_hours, 48.0);
        assert_eq!(cfg.drivers_k, 10);
        assert_eq!(cfg.backtest_cutoff_hours, 12);
        assert_eq!(cfg.backtest_max_hours, 168);
    }

    #[test]
    fn env_override_falls_back_on_absence() {
        std::env::remove_var("CWC_PRIOR_STRENGTH_TEST_UNUSED");
        assert_eq!(env_f64("CWC_PRIOR_STRENGTH_TEST_UNUSED"), None);
    }

    #[test]
    fn toml_overlay_keeps_defaults_for_omitted_fields() {
        let cfg = PipelineConfig::from_toml_str("prior_strength = 25.0\n").unwrap();
        assert_eq!(cfg.prior_strength, 25.0);
        assert_eq!(cfg.half_life_hours, 48.0);
    }
}
