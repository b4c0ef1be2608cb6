//! Kernel heap front-end over the buddy allocator.
//!
//! Binds the offset-based [`BuddyAllocator`] to the pool's base address and
//! exposes the pointer API the rest of the kernel uses, plus a
//! `GlobalAlloc` adapter so `alloc::*` collections draw from the buddy on
//! the target.

use crate::buddy::BuddyAllocator;
use crate::config::{ALIGN, POOL_SIZE};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use muon_core::SpinLock;

/// The buddy arena bound to its base address.
pub struct KernelHeap {
    buddy: BuddyAllocator,
    base: *mut u8,
}

// SAFETY: The raw base pointer is only dereferenced through &mut self, and
// the global instance is guarded by a SpinLock.
unsafe impl Send for KernelHeap {}

impl KernelHeap {
    /// Creates a heap over `POOL_SIZE` bytes starting at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to `POOL_SIZE` bytes of writable memory aligned to
    /// [`ALIGN`], exclusively owned by this heap for its whole lifetime.
    #[must_use]
    pub const unsafe fn new(base: *mut u8) -> Self {
        Self {
            buddy: BuddyAllocator::new(),
            base,
        }
    }

    /// Allocates `size` bytes, aligned to [`ALIGN`].
    ///
    /// Returns a null pointer on exhaustion or a degenerate size.
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        match self.buddy.alloc(size) {
            // SAFETY: The buddy returns offsets inside the pool.
            Some(offset) => unsafe { self.base.add(offset) },
            None => ptr::null_mut(),
        }
    }

    /// Releases a block previously returned by [`alloc`](Self::alloc).
    /// Null pointers and unknown addresses are ignored.
    pub fn free(&mut self, ptr: *mut u8) {
        if let Some(offset) = self.offset_of(ptr) {
            let _ = self.buddy.release(offset);
        }
    }

    /// Reallocates `ptr` to a block of `new_size` bytes, copying
    /// `min(old block size, new_size)` bytes and releasing the old block.
    ///
    /// With a null `ptr` this is a plain allocation. Returns null on
    /// failure, in which case the old block is left untouched.
    pub fn realloc(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        let Some(new_offset) = self.buddy.alloc(new_size) else {
            return ptr::null_mut();
        };

        if !ptr.is_null() {
            let Some(old_offset) = self.offset_of(ptr) else {
                // Not one of ours; back out the fresh block.
                let _ = self.buddy.release(new_offset);
                return ptr::null_mut();
            };
            let Some(old_size) = self.buddy.size_of(old_offset) else {
                let _ = self.buddy.release(new_offset);
                return ptr::null_mut();
            };

            let count = old_size.min(new_size);
            // SAFETY: Both offsets address live, disjoint blocks inside the
            // pool, and `count` does not exceed either block.
            unsafe {
                ptr::copy_nonoverlapping(
                    self.base.add(old_offset),
                    self.base.add(new_offset),
                    count,
                );
            }
            let _ = self.buddy.release(old_offset);
        }

        // SAFETY: The buddy returns offsets inside the pool.
        unsafe { self.base.add(new_offset) }
    }

    /// Translates a pointer back into a pool offset.
    fn offset_of(&self, ptr: *mut u8) -> Option<usize> {
        if ptr.is_null() {
            return None;
        }
        let offset = (ptr as usize).checked_sub(self.base as usize)?;
        (offset < POOL_SIZE).then_some(offset)
    }
}

/// Global heap instance; populated by [`init`].
static HEAP: SpinLock<Option<KernelHeap>> = SpinLock::new(None);

/// Binds the global heap to the pool region provided by the linker script.
///
/// # Safety
///
/// Same contract as [`KernelHeap::new`]; must be called exactly once,
/// before any allocation.
pub unsafe fn init(base: *mut u8) {
    // SAFETY: Forwarded caller contract.
    *HEAP.lock() = Some(unsafe { KernelHeap::new(base) });
}

/// Execute a closure with the global heap.
///
/// # Panics
///
/// Panics if [`init`] has not been called.
pub fn with_heap<R>(f: impl FnOnce(&mut KernelHeap) -> R) -> R {
    HEAP.with_init("heap", f)
}

/// `GlobalAlloc` adapter over the global heap.
///
/// The kernel binary installs it with `#[global_allocator]`; host builds
/// keep the system allocator.
pub struct KernelAllocator;

// SAFETY: Allocations are served by the buddy, which never hands out
// overlapping blocks, and every block is ALIGN-aligned.
unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN || layout.size() == 0 {
            return ptr::null_mut();
        }
        with_heap(|heap| heap.alloc(layout.size()))
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        with_heap(|heap| heap.free(ptr));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGN || new_size == 0 {
            return ptr::null_mut();
        }
        with_heap(|heap| heap.realloc(ptr, new_size))
    }
}
