//! Deal lifecycle engine, TTL sweeper, and volatility monitor.

pub mod engine;
pub mod sweeper;
pub mod volatility;

pub use engine::{DealEngine, DealOutcome, QuoteOutcome};
