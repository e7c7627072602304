//! Error taxonomy shared by the pool and its diagnostic wrapper.

use thiserror::Error;

use crate::diagnostics::{LeaseList, LeaseSite, ViolationReport};

/// Errors surfaced by pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The request exceeds the pool's fixed block size. Surfaced
    /// immediately and never retried; callers fall back to an unpooled
    /// allocation.
    #[error("requested {requested} bytes but the pool serves at most {block_size}")]
    CapacityExceeded { requested: usize, block_size: usize },

    /// The owning pool has been disposed.
    #[error("buffer pool has been disposed")]
    Disposed,

    /// A diagnostic block was used after it was disposed.
    #[error("use after dispose: {lease}")]
    BlockDisposed { lease: LeaseSite },

    /// A diagnostic block's backing slab was disposed underneath it.
    #[error("backing slab disposed: {lease}")]
    SlabDisposed { lease: LeaseSite },

    /// Every protocol violation captured over the pool's lifetime,
    /// aggregated and surfaced at disposal.
    #[error("{report}")]
    Violations { report: ViolationReport },

    /// The drain timed out with leases still outstanding.
    #[error("timed out waiting for outstanding blocks: {outstanding}")]
    DrainTimeout { outstanding: LeaseList },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_error_names_both_sizes() {
        let err = PoolError::CapacityExceeded {
            requested: 8192,
            block_size: 4096,
        };
        let text = err.to_string();
        assert!(text.contains("8192"));
        assert!(text.contains("4096"));
    }
}
