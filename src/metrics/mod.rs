//! Metrics and observability
//!
//! Atomic counters for the rent/return hot path.

mod counters;

pub use counters::*;
