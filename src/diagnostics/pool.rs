//! Instrumented pool
//!
//! Decorates the plain pool with lease tracking, violation capture, and an
//! async drain used by shutdown and test code.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::mem;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::warn;

use crate::error::PoolError;
use crate::metrics::METRICS;
use crate::pool::{BufferSource, SlabPool};

use super::block::DiagnosticBlock;
use super::violation::{LeaseList, LeaseSite, Violation, ViolationReport};

/// Shared state behind a [`DiagnosticPool`] and its leased blocks.
pub(crate) struct DiagShared {
    inner: SlabPool,
    /// Currently outstanding leases, keyed by lease id.
    live: DashMap<u64, LeaseSite>,
    /// Append-only log of captured violations, drained at disposal.
    violations: Mutex<Vec<Violation>>,
    next_lease_id: AtomicU64,
    allow_late_return: bool,
    disposed: AtomicBool,
    dispose_lock: Mutex<()>,
    drained: Notify,
}

impl DiagShared {
    pub(crate) fn record(&self, violation: Violation) {
        warn!(%violation, "pool protocol violation");
        METRICS.violation_recorded();
        self.violations.lock().push(violation);
    }

    pub(crate) fn complete_lease(&self, id: u64) {
        if self.live.remove(&id).is_some() && self.live.is_empty() {
            self.drained.notify_waiters();
        }
    }

    pub(crate) fn block_size(&self) -> usize {
        self.inner.block_size()
    }
}

/// Leak- and misuse-detecting decorator over [`SlabPool`].
///
/// Every rent is tracked against its call site; protocol violations are
/// captured wherever they happen and surfaced as one aggregate error when
/// the pool is disposed. Meant for tests and development builds; the plain
/// pool pays none of this overhead.
#[derive(Clone)]
pub struct DiagnosticPool {
    shared: Arc<DiagShared>,
}

impl DiagnosticPool {
    /// Strict mode: disposing the pool while leases are outstanding is
    /// itself a violation, reported with every outstanding rent site.
    pub fn new(inner: SlabPool) -> Self {
        Self::build(inner, false)
    }

    /// Lenient mode: blocks may come back after pool disposal without
    /// violation. Pair with [`await_all_returned`](Self::await_all_returned)
    /// for graceful-shutdown drains.
    pub fn with_late_return(inner: SlabPool) -> Self {
        Self::build(inner, true)
    }

    fn build(inner: SlabPool, allow_late_return: bool) -> Self {
        Self {
            shared: Arc::new(DiagShared {
                inner,
                live: DashMap::new(),
                violations: Mutex::new(Vec::new()),
                next_lease_id: AtomicU64::new(0),
                allow_late_return,
                disposed: AtomicBool::new(false),
                dispose_lock: Mutex::new(()),
                drained: Notify::new(),
            }),
        }
    }

    /// Rent a tracked block, recording the caller as the lease site.
    #[track_caller]
    pub fn rent(&self, size: usize) -> Result<DiagnosticBlock, PoolError> {
        let rented_at = Location::caller();
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            return Err(PoolError::Disposed);
        }
        let block = shared.inner.rent(size)?;
        let id = shared.next_lease_id.fetch_add(1, Ordering::Relaxed) + 1;
        let site = LeaseSite { id, rented_at };
        shared.live.insert(id, site);
        Ok(DiagnosticBlock::new(block, site, Arc::clone(shared)))
    }

    /// Leases currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.shared.live.len()
    }

    /// Violations captured so far (before disposal drains the log).
    pub fn violation_count(&self) -> usize {
        self.shared.violations.lock().len()
    }

    pub fn allows_late_return(&self) -> bool {
        self.shared.allow_late_return
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Dispose the inner pool and surface every captured violation as one
    /// aggregate error.
    ///
    /// In strict mode, outstanding leases are reported as leaks. Effective
    /// once; later calls are no-ops that return `Ok`.
    pub fn dispose(&self) -> Result<(), PoolError> {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = shared.dispose_lock.lock();
        if shared.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if !shared.allow_late_return {
            for entry in shared.live.iter() {
                shared.record(Violation::Leak {
                    lease: *entry.value(),
                });
            }
        }
        shared.inner.dispose();

        let violations = mem::take(&mut *shared.violations.lock());
        if violations.is_empty() {
            Ok(())
        } else {
            Err(PoolError::Violations {
                report: ViolationReport::new(violations),
            })
        }
    }

    /// Wait until every outstanding lease has been returned, or `timeout`
    /// elapses.
    ///
    /// On timeout the error names every lease still missing. This is the
    /// only suspending operation in the subsystem.
    pub async fn await_all_returned(&self, timeout: Duration) -> Result<(), PoolError> {
        let shared = &self.shared;
        let drained = async {
            loop {
                let notified = shared.drained.notified();
                tokio::pin!(notified);
                // Register before checking, so a return that lands between
                // the check and the await still wakes us.
                notified.as_mut().enable();
                if shared.live.is_empty() {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, drained).await {
            Ok(()) => Ok(()),
            Err(_) => {
                METRICS.drain_timed_out();
                let outstanding: Vec<LeaseSite> =
                    shared.live.iter().map(|entry| *entry.value()).collect();
                Err(PoolError::DrainTimeout {
                    outstanding: LeaseList(outstanding),
                })
            }
        }
    }
}

impl BufferSource for DiagnosticPool {
    type Lease = DiagnosticBlock;

    fn rent(&self, size: usize) -> Result<DiagnosticBlock, PoolError> {
        DiagnosticPool::rent(self, size)
    }

    fn dispose(&self) {
        if let Err(error) = DiagnosticPool::dispose(self) {
            tracing::error!(%error, "diagnostic pool disposed with violations");
        }
    }

    fn is_disposed(&self) -> bool {
        DiagnosticPool::is_disposed(self)
    }

    fn block_size(&self) -> usize {
        self.shared.block_size()
    }
}

impl std::fmt::Debug for DiagnosticPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticPool")
            .field("outstanding", &self.outstanding())
            .field("allow_late_return", &self.shared.allow_late_return)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
