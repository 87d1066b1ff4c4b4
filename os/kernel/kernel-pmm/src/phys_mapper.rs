//! # Physical memory access
//!
//! The allocator keeps its free list *inside* free frames and scrubs frames on
//! release, so it must be able to touch physical memory. A [`PhysMapper`]
//! turns a physical address into a pointer in the current address space.
//!
//! - [`HhdmPhysMapper`]: kernels with a higher-half direct map, where every
//!   physical address is reachable at `HHDM_BASE + pa`.
//! - `HostArena` (feature `std`): a heap buffer posing as physical memory,
//!   used by tests and host tools.
//!
//! ## Example
//! ```rust
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_pmm::phys_mapper::{HhdmPhysMapper, PhysMapper};
//!
//! let mapper = HhdmPhysMapper;
//! let pa = PhysicalAddress::new(0x0020_0000);
//! let ptr = unsafe { mapper.phys_to_ptr(pa) };
//! assert_eq!(ptr as u64, kernel_info::memory::HHDM_BASE + 0x0020_0000);
//! ```

use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::PhysicalAddress;

/// Converts physical addresses to usable pointers.
///
/// # Safety
/// Implementations must return pointers that, for every physical address the
/// allocator manages, refer to that frame's bytes and are valid for reads and
/// writes for as long as the mapper is alive.
pub unsafe trait PhysMapper {
    /// Pointer to the byte at physical address `pa`.
    ///
    /// # Safety
    /// `pa` must lie in memory covered by this mapper.
    unsafe fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;

    /// View the memory at `pa` as a `T`.
    ///
    /// # Safety
    /// - `pa` must be covered by the mapper and suitably aligned for `T`.
    /// - The caller must guarantee exclusive access for `'a`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        // SAFETY: forwarded to the caller.
        unsafe { &mut *self.phys_to_ptr(pa).cast::<T>() }
    }
}

// SAFETY: forwards to the underlying mapper.
unsafe impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    unsafe fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        unsafe { (**self).phys_to_ptr(pa) }
    }
}

/// [`PhysMapper`] for kernels with a higher-half direct map (HHDM).
///
/// # Safety
/// The HHDM mapping must be present, writable, and cover the managed range
/// before the allocator is constructed.
#[derive(Debug, Default, Copy, Clone)]
pub struct HhdmPhysMapper;

// SAFETY: the kernel maps all of physical memory at HHDM_BASE.
unsafe impl PhysMapper for HhdmPhysMapper {
    unsafe fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        (HHDM_BASE + pa.as_u64()) as *mut u8
    }
}
