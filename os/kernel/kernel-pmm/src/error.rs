//! Error taxonomy of the physical memory manager.
//!
//! Only [`AllocError`] and [`InitError`] are returned to callers. A [`Fault`]
//! is a defect in trusted kernel code and never travels as a value: it is
//! logged and the system halts via [`fatal`].

use kernel_memory_addresses::PhysicalAddress;
use log::error;

/// Recoverable allocation failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The free registry is empty.
    #[error("out of physical memory")]
    OutOfMemory,
}

/// Boot-time configuration errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("no whole page between {start} and {top}")]
    EmptyRange {
        start: PhysicalAddress,
        top: PhysicalAddress,
    },
    #[error("reference-count table holds {provided} entries but {needed} are required")]
    RefTableTooSmall { needed: usize, provided: usize },
    #[error("the physical memory manager is already initialized")]
    AlreadyInitialized,
}

/// Usage defects that leave the allocator unable to continue safely.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("address is not page aligned")]
    Misaligned,
    #[error("address lies below the managed range")]
    BelowManagedRange,
    #[error("address lies at or above the top of physical memory")]
    AboveManagedRange,
    #[error("reference count would drop below zero")]
    RefCountUnderflow,
    #[error("reference count would overflow")]
    RefCountOverflow,
    #[error("last reference must be released through free_page")]
    LastReference,
    #[error("frame is not allocated")]
    NotAllocated,
    #[error("free frame carries a non-zero reference count")]
    FreeFrameReferenced,
    #[error("free list is corrupt")]
    CorruptFreeList,
}

/// Report `fault` raised by `op` on `addr` and halt.
///
/// The kernel's panic handler stops the machine; under test the panic
/// unwinds, which lets `#[should_panic]` observe the defect.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(op: &'static str, addr: PhysicalAddress, fault: Fault) -> ! {
    error!("{op}: {fault} at {addr}");
    panic!("{op}: {fault} at {addr}");
}
