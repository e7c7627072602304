//! Fixed-size block pool
//!
//! Serves block-granular leases carved from large slabs, with lock-free
//! rent/return for zero-allocation hot paths. Disposal is the one operation
//! that takes a lock.

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::slab::{BlockSlot, Slab};
use super::{BufferSource, Lease};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::metrics::METRICS;

/// Default block size (4 KiB, the common page size).
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
/// Default number of blocks carved from each slab.
pub const DEFAULT_BLOCKS_PER_SLAB: usize = 32;

/// A leased fixed-size buffer.
///
/// Dereferences to exactly `block_size` usable bytes regardless of the
/// requested size. Dropping the block returns its window to the pool
/// unconditionally; if the pool was disposed in the meantime the window is
/// abandoned and its slab reference released instead.
pub struct Block {
    slot: Option<BlockSlot>,
    len: usize,
    pool: Arc<PoolShared>,
}

impl Block {
    fn slot(&self) -> &BlockSlot {
        // Invariant: the slot is only taken in drop.
        self.slot.as_ref().expect("block slot taken before drop")
    }

    /// Usable bytes in the window (always the pool's block size).
    pub fn capacity(&self) -> usize {
        self.len
    }

    /// Stable address of the window, valid for the duration of the lease.
    pub fn as_ptr(&self) -> *const u8 {
        self.slot().ptr()
    }

    pub(crate) fn slab_active(&self) -> bool {
        self.slot().slab_active()
    }
}

impl Deref for Block {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // SAFETY: the slot is an exclusively owned, in-bounds window of an
        // allocation kept alive by the slot's slab reference.
        unsafe { slice::from_raw_parts(self.slot().ptr(), self.len) }
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: as above; `&mut self` guarantees the window is not
        // aliased through this handle.
        unsafe { slice::from_raw_parts_mut(self.slot().ptr(), self.len) }
    }
}

impl Lease for Block {
    fn memory(&self) -> Result<&[u8], PoolError> {
        Ok(self)
    }

    fn memory_mut(&mut self) -> Result<&mut [u8], PoolError> {
        Ok(self)
    }

    fn capacity(&self) -> usize {
        self.len
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // Runs unconditionally at scope exit, from whichever thread owns
        // the block; a forgotten lease can only leak via mem::forget.
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot);
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("capacity", &self.len)
            .field("offset", &self.slot().offset())
            .finish()
    }
}

/// Inner pool state (shared across clones and leased blocks)
struct PoolShared {
    block_size: usize,
    blocks_per_slab: usize,
    slab_len: usize,
    /// Lock-free free-slot queue; no ordering guarantee on reuse.
    free: SegQueue<BlockSlot>,
    /// Append-only slab registry, drained at disposal.
    slabs: SegQueue<Arc<Slab>>,
    slab_count: AtomicUsize,
    disposed: AtomicBool,
    dispose_lock: Mutex<()>,
}

impl PoolShared {
    fn release(&self, slot: BlockSlot) {
        // A return racing the dispose transition may still land in the
        // queue; such a slot (and its slab reference) is freed when the
        // pool state itself drops.
        if self.disposed.load(Ordering::Acquire) {
            METRICS.block_abandoned();
            return;
        }
        self.free.push(slot);
        METRICS.block_returned();
    }

    /// Allocate and carve a fresh slab, queueing every window but one.
    ///
    /// The held-back slot goes straight to the caller, so the slab cost is
    /// amortized across every block the slab yields.
    fn allocate_slab(&self) -> BlockSlot {
        let slab = Arc::new(Slab::allocate(self.slab_len));
        let mut slots = slab.carve(self.block_size, self.blocks_per_slab).into_iter();
        let lease = slots.next().expect("blocks_per_slab is validated nonzero");
        for slot in slots {
            self.free.push(slot);
        }
        self.slabs.push(Arc::clone(&slab));
        let slab_count = self.slab_count.fetch_add(1, Ordering::AcqRel) + 1;
        METRICS.slab_allocated(self.blocks_per_slab as u64);
        debug!(
            slab_count,
            slab_len = self.slab_len,
            blocks = self.blocks_per_slab,
            "allocated slab"
        );
        lease
    }
}

/// Lock-free slab-backed buffer pool.
///
/// Grows by one slab whenever the free queue runs dry and never shrinks;
/// slabs are torn down only by [`dispose`](SlabPool::dispose).
#[derive(Clone)]
pub struct SlabPool {
    shared: Arc<PoolShared>,
}

impl SlabPool {
    /// Create a pool serving `block_size`-byte leases, carving
    /// `blocks_per_slab` blocks out of each slab.
    ///
    /// Each slab is one block longer than the carved span so the aligned
    /// carve always fits regardless of where the allocation lands.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero or not a power of two, or if
    /// `blocks_per_slab` is zero.
    pub fn new(block_size: usize, blocks_per_slab: usize) -> Self {
        assert!(
            block_size.is_power_of_two(),
            "block_size must be a nonzero power of two"
        );
        assert!(blocks_per_slab > 0, "blocks_per_slab must be > 0");

        let slab_len = block_size * (blocks_per_slab + 1);
        Self {
            shared: Arc::new(PoolShared {
                block_size,
                blocks_per_slab,
                slab_len,
                free: SegQueue::new(),
                slabs: SegQueue::new(),
                slab_count: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
                dispose_lock: Mutex::new(()),
            }),
        }
    }

    /// Create a pool from a validated [`PoolConfig`].
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.block_size, config.blocks_per_slab)
    }

    /// Rent a block of at least `size` usable bytes.
    ///
    /// Requests above the pool's block size fail immediately with
    /// [`PoolError::CapacityExceeded`]; the caller is expected to fall back
    /// to an unpooled allocation.
    pub fn rent(&self, size: usize) -> Result<Block, PoolError> {
        let shared = &self.shared;
        if size > shared.block_size {
            METRICS.rent_rejected();
            return Err(PoolError::CapacityExceeded {
                requested: size,
                block_size: shared.block_size,
            });
        }
        if shared.disposed.load(Ordering::Acquire) {
            METRICS.rent_rejected();
            return Err(PoolError::Disposed);
        }

        let slot = match shared.free.pop() {
            Some(slot) => slot,
            None => shared.allocate_slab(),
        };
        METRICS.block_rented();
        Ok(Block {
            slot: Some(slot),
            len: shared.block_size,
            pool: Arc::clone(shared),
        })
    }

    /// Tear down every slab and drain the free queue.
    ///
    /// Effective exactly once; later calls are no-ops. Outstanding leases
    /// are not validated here (the diagnostic wrapper does that); their
    /// windows stay valid and are abandoned on return.
    pub fn dispose(&self) {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            return;
        }
        let _guard = shared.dispose_lock.lock();
        if shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut slabs = 0usize;
        while let Some(slab) = shared.slabs.pop() {
            slab.dispose();
            slabs += 1;
        }
        let mut drained = 0usize;
        while shared.free.pop().is_some() {
            drained += 1;
        }
        debug!(slabs, drained, "buffer pool disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Fixed lease size served by this pool.
    pub fn block_size(&self) -> usize {
        self.shared.block_size
    }

    pub fn blocks_per_slab(&self) -> usize {
        self.shared.blocks_per_slab
    }

    /// Number of slabs allocated so far (never decreases).
    pub fn slab_count(&self) -> usize {
        self.shared.slab_count.load(Ordering::Acquire)
    }

    /// Free blocks currently queued. Approximate under concurrency.
    pub fn free_blocks(&self) -> usize {
        self.shared.free.len()
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            block_size: self.shared.block_size,
            blocks_per_slab: self.shared.blocks_per_slab,
            slabs_allocated: self.slab_count(),
            free_blocks: self.free_blocks(),
        }
    }
}

impl BufferSource for SlabPool {
    type Lease = Block;

    fn rent(&self, size: usize) -> Result<Block, PoolError> {
        SlabPool::rent(self, size)
    }

    fn dispose(&self) {
        SlabPool::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        SlabPool::is_disposed(self)
    }

    fn block_size(&self) -> usize {
        SlabPool::block_size(self)
    }
}

impl fmt::Debug for SlabPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabPool")
            .field("block_size", &self.shared.block_size)
            .field("blocks_per_slab", &self.shared.blocks_per_slab)
            .field("slabs_allocated", &self.slab_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Pool statistics snapshot
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub block_size: usize,
    pub blocks_per_slab: usize,
    pub slabs_allocated: usize,
    pub free_blocks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_rent_serves_full_block() {
        let pool = SlabPool::new(4096, 4);

        let block = pool.rent(64).unwrap();
        assert_eq!(block.capacity(), 4096);
        assert_eq!(block.len(), 4096);
        assert_eq!(pool.slab_count(), 1);
        assert_eq!(pool.free_blocks(), 3);
    }

    #[test]
    fn test_rent_oversize_fails_without_allocating() {
        let pool = SlabPool::new(4096, 4);

        let err = pool.rent(4097).unwrap_err();
        assert!(matches!(
            err,
            PoolError::CapacityExceeded {
                requested: 4097,
                block_size: 4096
            }
        ));
        assert_eq!(pool.slab_count(), 0);
    }

    #[test]
    fn test_block_data_round_trip() {
        let pool = SlabPool::new(4096, 4);

        let mut block = pool.rent(4096).unwrap();
        block[0] = 0x42;
        block[4095] = 0x99;
        assert_eq!(block[0], 0x42);
        assert_eq!(block[4095], 0x99);
    }

    #[test]
    fn test_return_and_re_rent_reuses_slab() {
        let pool = SlabPool::new(4096, 2);

        let block = pool.rent(16).unwrap();
        drop(block);
        let _b1 = pool.rent(16).unwrap();
        let _b2 = pool.rent(16).unwrap();
        // Two blocks per slab and one returned: still a single slab.
        assert_eq!(pool.slab_count(), 1);
    }

    #[test]
    fn test_exhausting_a_slab_allocates_the_next() {
        let pool = SlabPool::new(4096, 2);

        let _held: Vec<_> = (0..3).map(|_| pool.rent(1).unwrap()).collect();
        assert_eq!(pool.slab_count(), 2);
        assert_eq!(pool.free_blocks(), 1);
    }

    #[test]
    fn test_rent_after_dispose_fails() {
        let pool = SlabPool::new(4096, 2);
        pool.dispose();
        assert!(matches!(pool.rent(16), Err(PoolError::Disposed)));
    }

    #[test]
    fn test_dispose_is_effective_once() {
        let pool = SlabPool::new(4096, 2);
        let block = pool.rent(16).unwrap();
        pool.dispose();
        pool.dispose();
        assert!(pool.is_disposed());
        // The outstanding block's window is still valid and its return is
        // silently abandoned.
        drop(block);
        assert_eq!(pool.free_blocks(), 0);
    }

    #[test]
    fn test_concurrent_rent_return() {
        let pool = SlabPool::new(4096, 8);
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for i in 0..500u64 {
                        let mut block = pool.rent(64).unwrap();
                        block[..8].copy_from_slice(&i.to_le_bytes());
                        assert_eq!(&block[..8], &i.to_le_bytes());
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        // Everything came back: slabs * blocks_per_slab windows free.
        assert_eq!(pool.free_blocks(), pool.slab_count() * 8);
    }
}
