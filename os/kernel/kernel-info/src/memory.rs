//! # Memory Layout

use kernel_memory_addresses::{PageSize, Size4K};

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything mapped at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel image is placed in *physical* memory.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Top of physical memory managed by the frame allocator (exclusive).
pub const PHYS_TOP: u64 = 0x0E00_0000; // 224 MiB

/// Granule of the physical frame allocator.
pub const PAGE_SIZE: u64 = 4096;

const _: () = {
    assert!(PHYS_TOP.is_multiple_of(PAGE_SIZE));
    assert!(PHYS_LOAD.is_multiple_of(PAGE_SIZE));
    assert!(PHYS_TOP > PHYS_LOAD);
    assert!(PAGE_SIZE == <Size4K as PageSize>::SIZE);
};
