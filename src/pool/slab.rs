//! Slab allocation and carving
//!
//! One slab is a single large allocation subdivided into fixed-size,
//! block-aligned windows. Slabs are only ever torn down at pool disposal;
//! individual windows cycle through the pool's free queue.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One large contiguous allocation carved into fixed-size blocks.
///
/// The backing buffer never moves, so the base address taken at allocation
/// time stays valid for the slab's whole life. `dispose` only flips the
/// liveness flag; the memory itself is released when the last reference to
/// the slab (pool registry, free slot, or outstanding block) is dropped.
pub(crate) struct Slab {
    base: NonNull<u8>,
    len: usize,
    active: AtomicBool,
}

// SAFETY: the base pointer is only dereferenced through `BlockSlot` windows,
// and slot ownership guarantees no two threads touch the same window at the
// same time. The slab itself exposes only the address and an atomic flag.
unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

impl Slab {
    /// Allocate a zeroed slab of `len` bytes.
    pub(crate) fn allocate(len: usize) -> Self {
        let buf = vec![0u8; len].into_boxed_slice();
        let base = Box::into_raw(buf) as *mut u8;
        // SAFETY: Box allocations are never null.
        let base = unsafe { NonNull::new_unchecked(base) };
        Self {
            base,
            len,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Deactivate the slab. Idempotent: repeated disposal is a no-op.
    pub(crate) fn dispose(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Smallest non-negative offset at which a window aligned to
    /// `block_size` can start.
    pub(crate) fn aligned_offset(&self, block_size: usize) -> usize {
        let misalign = self.base.as_ptr() as usize % block_size;
        if misalign == 0 {
            0
        } else {
            block_size - misalign
        }
    }

    /// Carve `blocks` aligned, disjoint windows out of the slab.
    ///
    /// Windows start at the first block-aligned address at or after the
    /// base; slack bytes before the first window and after the last are
    /// never handed out.
    pub(crate) fn carve(self: &Arc<Self>, block_size: usize, blocks: usize) -> Vec<BlockSlot> {
        let first = self.aligned_offset(block_size);
        debug_assert!(first + blocks * block_size <= self.len);
        (0..blocks)
            .map(|i| BlockSlot::new(Arc::clone(self), first + i * block_size))
            .collect()
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` came from `Box::into_raw` of a boxed slice of
        // exactly `len` bytes in `allocate`, and are reconstituted exactly
        // once, here.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.base.as_ptr(),
                self.len,
            )));
        }
    }
}

/// One fixed-size window into a slab.
///
/// Whoever holds the slot owns the window exclusively: slots move between
/// the pool's free queue and exactly one leased block at a time. The slot
/// keeps its slab alive, so the window stays valid even after the pool has
/// been disposed.
pub(crate) struct BlockSlot {
    slab: Arc<Slab>,
    offset: usize,
}

impl BlockSlot {
    pub(crate) fn new(slab: Arc<Slab>, offset: usize) -> Self {
        Self { slab, offset }
    }

    pub(crate) fn ptr(&self) -> *mut u8 {
        // SAFETY: carving guarantees `offset + block_size <= slab.len()`,
        // so the window pointer is in bounds of the slab allocation.
        unsafe { self.slab.base_ptr().add(self.offset) }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn slab_active(&self) -> bool {
        self.slab.is_active()
    }
}
