//! The pure, synchronous analytics kernel: feature engine (F), weight
//! engine (W), belief engine (B), aggregator (A), and backtest driver (X).
//! None of these modules perform I/O or depend on a storage technology;
//! they are pure functions of in-memory records (§5).

pub mod aggregator;
pub mod backtest;
pub mod belief;
pub mod features;
pub mod pipeline;
pub mod weights;
