//! # Kernel-wide allocator slot
//!
//! Boot code constructs the allocator once and parks it here; everything else
//! borrows it as `&'static`. Holding it in a [`SyncOnceCell`] gives exactly one
//! well-defined owner and turns a second initialization into an error instead
//! of silently re-seeding the free list.

use crate::Frame;
use crate::config::PmmConfig;
use crate::error::{AllocError, InitError};
use crate::page_alloc::{PageAllocator, PmmStats};
use crate::ref_count::RefCount;
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::{OnceInitError, SyncOnceCell};

/// How the kernel reaches physical memory.
#[cfg(not(test))]
pub type SystemMapper = crate::phys_mapper::HhdmPhysMapper;

/// Under test there is no direct map; frames live in a leaked host arena.
#[cfg(test)]
pub type SystemMapper = &'static crate::host::HostArena;

pub type SystemPmm = PageAllocator<'static, SystemMapper>;

static PMM: SyncOnceCell<SystemPmm> = SyncOnceCell::new();

/// Construct the kernel's allocator. Call exactly once during boot.
///
/// # Errors
/// [`InitError::AlreadyInitialized`] on a second call, otherwise whatever
/// [`PageAllocator::new`] reports.
///
/// # Safety
/// Same contract as [`PageAllocator::new`].
pub unsafe fn init(
    mapper: SystemMapper,
    config: PmmConfig,
    ref_table: &'static mut [RefCount],
) -> Result<&'static SystemPmm, InitError> {
    PMM.try_init_with(|| unsafe { PageAllocator::new(mapper, config, ref_table) })
        .map_err(|e| match e {
            OnceInitError::AlreadyInitialized => InitError::AlreadyInitialized,
            OnceInitError::Init(e) => e,
        })
}

/// The kernel's allocator, if [`init`] has completed.
#[must_use]
pub fn try_pmm() -> Option<&'static SystemPmm> {
    PMM.get()
}

/// The kernel's allocator.
///
/// # Panics
/// If called before [`init`]; using the allocator before boot set it up is a
/// kernel bug.
#[must_use]
pub fn pmm() -> &'static SystemPmm {
    match PMM.get() {
        Some(pmm) => pmm,
        None => panic!("pmm: used before initialization"),
    }
}

/// See [`PageAllocator::alloc_page`].
///
/// # Errors
/// [`AllocError::OutOfMemory`].
pub fn alloc_page() -> Result<Frame, AllocError> {
    pmm().alloc_page()
}

/// See [`PageAllocator::free_page`].
pub fn free_page(addr: impl Into<PhysicalAddress>) {
    pmm().free_page(addr);
}

/// See [`PageAllocator::inc_ref`].
pub fn inc_ref(addr: impl Into<PhysicalAddress>) -> RefCount {
    pmm().inc_ref(addr)
}

/// See [`PageAllocator::dec_ref`].
pub fn dec_ref(addr: impl Into<PhysicalAddress>) -> RefCount {
    pmm().dec_ref(addr)
}

/// See [`PageAllocator::free_page_count`].
#[must_use]
pub fn free_page_count() -> usize {
    pmm().free_page_count()
}

/// See [`PageAllocator::stats`].
#[must_use]
pub fn stats() -> PmmStats {
    pmm().stats()
}
