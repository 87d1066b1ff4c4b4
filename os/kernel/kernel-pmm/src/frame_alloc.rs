//! Frame allocation seam for page-table and address-space code.
//!
//! Collaborators that only need "give me a frame" / "take it back" depend on
//! [`FrameAlloc`] instead of the concrete allocator, which keeps them testable
//! with a stub.

use crate::Frame;
use crate::page_alloc::PageAllocator;
use crate::phys_mapper::PhysMapper;

/// Source of 4 KiB physical frames.
pub trait FrameAlloc {
    /// Allocate one page-aligned 4 KiB frame, or `None` when memory is exhausted.
    fn alloc_4k(&self) -> Option<Frame>;

    /// Release one ownership of a frame returned by [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&self, frame: Frame);
}

impl<M: PhysMapper> FrameAlloc for PageAllocator<'_, M> {
    fn alloc_4k(&self) -> Option<Frame> {
        self.alloc_page().ok()
    }

    fn free_4k(&self, frame: Frame) {
        self.free_page(frame);
    }
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &A {
    fn alloc_4k(&self) -> Option<Frame> {
        (**self).alloc_4k()
    }

    fn free_4k(&self, frame: Frame) {
        (**self).free_4k(frame);
    }
}
