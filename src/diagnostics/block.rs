//! Instrumented lease handle
//!
//! Guards every memory access on a leased block and records protocol
//! violations against the lease's rent call-site.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::PoolError;
use crate::pool::{Block, Lease};

use super::pool::DiagShared;
use super::violation::{LeaseSite, Violation};

/// A leased block wrapped with protocol checking.
///
/// Every memory access verifies that the handle has not been disposed and
/// that its backing slab is still active. Misuse is recorded in the owning
/// pool's violation log (surfaced at pool disposal) and also reported to
/// the caller through `Result`.
///
/// Pinning is reference-counted: [`pin`](Self::pin) and
/// [`unpin`](Self::unpin) must balance before the block is disposed.
pub struct DiagnosticBlock {
    inner: Option<Block>,
    site: LeaseSite,
    pin_count: usize,
    disposed: bool,
    pin_misuse_reported: bool,
    shared: Arc<DiagShared>,
}

impl DiagnosticBlock {
    pub(crate) fn new(inner: Block, site: LeaseSite, shared: Arc<DiagShared>) -> Self {
        Self {
            inner: Some(inner),
            site,
            pin_count: 0,
            disposed: false,
            pin_misuse_reported: false,
            shared,
        }
    }

    /// Identity of this lease (id plus rent call-site).
    pub fn lease(&self) -> LeaseSite {
        self.site
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn inner_ref(&self) -> &Block {
        // Invariant: `inner` is only taken once `disposed` is set.
        self.inner.as_ref().expect("undisposed lease has a block")
    }

    fn check_live(&self) -> Result<(), PoolError> {
        if self.disposed {
            self.shared
                .record(Violation::UseAfterDispose { lease: self.site });
            return Err(PoolError::BlockDisposed { lease: self.site });
        }
        if !self.inner_ref().slab_active() {
            self.shared
                .record(Violation::SlabDisposed { lease: self.site });
            return Err(PoolError::SlabDisposed { lease: self.site });
        }
        Ok(())
    }

    /// Readable view of the leased window.
    pub fn memory(&self) -> Result<&[u8], PoolError> {
        self.check_live()?;
        Ok(self.inner_ref())
    }

    /// Writable view of the leased window.
    pub fn memory_mut(&mut self) -> Result<&mut [u8], PoolError> {
        self.check_live()?;
        let block = self.inner.as_mut().expect("undisposed lease has a block");
        Ok(block)
    }

    /// Pin the window and return its stable address.
    ///
    /// Pins nest; each successful `pin` must be balanced by one
    /// [`unpin`](Self::unpin) before the block is disposed.
    pub fn pin(&mut self) -> Result<NonNull<u8>, PoolError> {
        self.check_live()?;
        self.pin_count += 1;
        let ptr = self.inner_ref().as_ptr() as *mut u8;
        // SAFETY: a live block's window pointer is derived from a non-null
        // slab base.
        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    /// Release one pin.
    ///
    /// Unpinning with no pins outstanding means a caller released the same
    /// pin twice; it is recorded as a violation, not silently ignored.
    pub fn unpin(&mut self) {
        if self.pin_count == 0 {
            self.shared
                .record(Violation::UnbalancedUnpin { lease: self.site });
            return;
        }
        self.pin_count -= 1;
    }

    /// Return the block to the pool.
    ///
    /// Disposing twice is a violation, as is disposing while pinned; a
    /// pinned block stays leased until its pins are released (or the handle
    /// is dropped, which force-returns it).
    pub fn dispose(&mut self) {
        if self.disposed {
            self.shared
                .record(Violation::DoubleDispose { lease: self.site });
            return;
        }
        if self.pin_count > 0 {
            self.shared.record(Violation::DisposeWhilePinned {
                lease: self.site,
                pins: self.pin_count,
            });
            self.pin_misuse_reported = true;
            return;
        }
        self.finish();
    }

    fn finish(&mut self) {
        self.disposed = true;
        // Dropping the inner lease routes the window back to the plain pool
        // (or abandons it if that pool is already disposed).
        self.inner.take();
        self.shared.complete_lease(self.site.id);
    }
}

impl Lease for DiagnosticBlock {
    fn memory(&self) -> Result<&[u8], PoolError> {
        DiagnosticBlock::memory(self)
    }

    fn memory_mut(&mut self) -> Result<&mut [u8], PoolError> {
        DiagnosticBlock::memory_mut(self)
    }

    fn capacity(&self) -> usize {
        self.shared.block_size()
    }
}

impl Drop for DiagnosticBlock {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        if self.pin_count > 0 && !self.pin_misuse_reported {
            self.shared.record(Violation::DisposeWhilePinned {
                lease: self.site,
                pins: self.pin_count,
            });
        }
        self.finish();
    }
}

impl fmt::Debug for DiagnosticBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticBlock")
            .field("lease", &self.site.id)
            .field("rented_at", &self.site.rented_at)
            .field("pin_count", &self.pin_count)
            .field("disposed", &self.disposed)
            .finish()
    }
}
