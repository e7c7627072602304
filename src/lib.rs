//! SlabPool - slab-backed fixed-size buffer pool
//!
//! This library provides a lock-free pool of fixed-size byte buffers carved
//! out of large slab allocations, plus an instrumented wrapper that detects
//! leaks, double-frees, and use-after-return during development and tests.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod util;

pub use config::Config;
pub use diagnostics::{DiagnosticBlock, DiagnosticPool};
pub use error::PoolError;
pub use pool::{Block, BufferSource, Lease, SlabPool};

/// Crate version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
