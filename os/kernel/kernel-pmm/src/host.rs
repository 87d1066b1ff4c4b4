//! Heap-backed stand-in for physical memory.
//!
//! A [`HostArena`] reserves a page-aligned heap buffer and pretends it lives
//! at a chosen physical base address, so the allocator can run unchanged in
//! tests and host tools.

extern crate std;

use crate::{Frame, PAGE_BYTES};
use crate::phys_mapper::PhysMapper;
use core::ptr::NonNull;
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K};
use std::alloc::{self, Layout};
use std::vec::Vec;

/// Simulated physical memory covering `[base, base + len)`.
pub struct HostArena {
    base: PhysicalAddress,
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the arena is plain memory; synchronizing accesses to it is the
// allocator's job, exactly as with real RAM.
unsafe impl Send for HostArena {}
unsafe impl Sync for HostArena {}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("arena base {0} is not page aligned")]
    UnalignedBase(PhysicalAddress),
    #[error("arena of {0} bytes is empty, too large or not a whole number of pages")]
    InvalidLength(u64),
}

impl HostArena {
    /// Reserve `len` bytes of zeroed memory posing as physical `[base, base + len)`.
    ///
    /// # Errors
    /// See [`ArenaError`].
    pub fn new(base: PhysicalAddress, len: u64) -> Result<Self, ArenaError> {
        if !base.is_aligned::<Size4K>() {
            return Err(ArenaError::UnalignedBase(base));
        }
        let size = usize::try_from(len).map_err(|_| ArenaError::InvalidLength(len))?;
        let layout = Layout::from_size_align(size, PAGE_BYTES)
            .map_err(|_| ArenaError::InvalidLength(len))?;
        if size == 0 || !size.is_multiple_of(PAGE_BYTES) || base.checked_add(len).is_none() {
            return Err(ArenaError::InvalidLength(len));
        }
        // SAFETY: non-zero size checked above.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(layout);
        };
        Ok(Self { base, ptr, layout })
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// Exclusive end of the simulated range.
    #[must_use]
    pub const fn top(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_u64() + self.layout.size() as u64)
    }

    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress) -> bool {
        pa >= self.base && pa < self.top()
    }

    /// Copy of the bytes of `page`.
    ///
    /// Racy if another thread writes the frame concurrently; meant for
    /// single-threaded inspection.
    ///
    /// # Panics
    /// If `page` is outside the arena.
    #[must_use]
    pub fn read_page(&self, page: Frame) -> Vec<u8> {
        let ptr = self.checked_ptr(page.base());
        // SAFETY: `checked_ptr` guarantees a full frame behind `ptr`.
        unsafe { core::slice::from_raw_parts(ptr, PAGE_BYTES) }.to_vec()
    }

    /// Overwrite `page` with `byte`, the way an owner would use a frame.
    ///
    /// # Panics
    /// If `page` is outside the arena.
    pub fn fill_page(&self, page: Frame, byte: u8) {
        let ptr = self.checked_ptr(page.base());
        // SAFETY: see `read_page`.
        unsafe {
            core::ptr::write_bytes(ptr, byte, PAGE_BYTES);
        }
    }

    /// Pointer to `pa`; the frame-sized span starting there must lie in the arena.
    fn checked_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let fits = pa
            .checked_add(Size4K::SIZE)
            .is_some_and(|end| pa >= self.base && end <= self.top());
        assert!(fits, "{pa} is outside the host arena");
        #[allow(clippy::cast_possible_truncation)]
        let offset = (pa - self.base) as usize;
        // SAFETY: offset is within the allocation.
        unsafe { self.ptr.as_ptr().add(offset) }
    }
}

// SAFETY: every address accepted by `checked_ptr` has a whole frame of the
// owned buffer behind it.
unsafe impl PhysMapper for HostArena {
    unsafe fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        self.checked_ptr(pa)
    }
}

impl Drop for HostArena {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
