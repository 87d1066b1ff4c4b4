//! # Physical Memory Address Types
//!
//! Strongly typed wrappers for physical addresses and page frames used by the
//! physical memory manager.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A raw 64-bit physical address. |
//! | [`PhysicalPage<S>`] | A page-aligned frame of size `S`, identified by base or frame index. |
//! | [`PageSize`] / [`Size4K`] | Page size marker carrying `SIZE`, `SHIFT` and `MASK`. |
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! // First byte after the kernel image, as reported by the loader.
//! let kernel_end = PhysicalAddress::new(0x0011_7A10);
//!
//! // The first whole frame the allocator may manage.
//! let first = kernel_end.align_up::<Size4K>().unwrap();
//! assert_eq!(first.as_u64(), 0x0011_8000);
//!
//! // Frame numbers index per-frame bookkeeping.
//! let page = first.page::<Size4K>();
//! assert_eq!(page.index(), 0x118);
//! assert_eq!(PhysicalPage::<Size4K>::from_index(0x118), page);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`, making them suitable as map keys or for FFI use.
//! - All alignment and index calculations are `const fn`.
//! - The phantom marker `S` enforces the page size at the type level.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page_size;
mod physical_address;
mod physical_page;

pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;

/// Number of whole pages of size `S` in `[start, end)`.
///
/// `start` is rounded **up** and `end` rounded **down**, so partial pages at
/// either edge are not counted. Returns `0` for empty or inverted ranges.
#[inline]
#[must_use]
pub const fn whole_pages<S: PageSize>(start: PhysicalAddress, end: PhysicalAddress) -> u64 {
    let Some(first) = start.align_up::<S>() else {
        return 0;
    };
    let last = end.align_down::<S>();
    if last.as_u64() <= first.as_u64() {
        0
    } else {
        (last.as_u64() - first.as_u64()) >> S::SHIFT
    }
}
