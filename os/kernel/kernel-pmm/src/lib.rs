//! # Physical Memory Manager
//!
//! A reference-counted allocator for 4 KiB physical frames.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            PageAllocator (page_alloc)               │
//! │    • alloc / free / inc_ref / dec_ref / count       │
//! │    • one SpinLock over both structures below        │
//! └──────────────┬─────────────────────┬────────────────┘
//!                │                     │
//! ┌──────────────▼──────────┐ ┌────────▼────────────────┐
//! │  FreeList (free_list)   │ │ RefCountTable           │
//! │  • links stored inside  │ │ (ref_count)             │
//! │    the free frames      │ │  • one u16 per frame    │
//! └──────────────┬──────────┘ └─────────────────────────┘
//!                │
//! ┌──────────────▼──────────────────────────────────────┐
//! │           PhysMapper (phys_mapper)                  │
//! │    • HHDM in the kernel, heap arena on the host     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Error model
//!
//! Running out of frames is an ordinary [`AllocError`] the caller handles.
//! Misuse (misaligned or out-of-range addresses, double frees, reference-count
//! underflow) is a kernel bug: it is logged and the system halts through
//! [`error::fatal`].
//!
//! ## Usage
//!
//! Boot code sizes the reference-count table at compile time and parks the
//! allocator in the [`global`] slot:
//!
//! ```rust,no_run
//! use kernel_info::boot::PhysMemoryInfo;
//! use kernel_info::memory::PHYS_TOP;
//! use kernel_pmm::phys_mapper::HhdmPhysMapper;
//! use kernel_pmm::{PmmConfig, RefCount, global, ref_table_len_for};
//!
//! const REFS: usize = ref_table_len_for(PHYS_TOP);
//! static mut REF_COUNTS: [RefCount; REFS] = [0; REFS];
//!
//! // Supplied by the loader: first byte after the kernel image.
//! let boot = PhysMemoryInfo::with_default_top(0x0011_7A10);
//!
//! let table = unsafe { &mut *(&raw mut REF_COUNTS) };
//! let pmm = unsafe { global::init(HhdmPhysMapper, PmmConfig::from_boot(&boot), table) }
//!     .expect("pmm init");
//!
//! let page = pmm.alloc_page().expect("out of memory");
//! pmm.inc_ref(page); // shared with a second address space
//! pmm.free_page(page); // first owner done; still allocated
//! pmm.free_page(page); // last owner done; back on the free list
//! ```
//!
//! With the `std` feature, `host::HostArena` stands in for RAM so the same
//! allocator runs in tests and host tools.

#![cfg_attr(not(any(test, doctest, feature = "std")), no_std)]
#![allow(unsafe_code)]

pub mod config;
pub mod error;
pub mod frame_alloc;
mod free_list;
pub mod global;
#[cfg(any(test, feature = "std"))]
pub mod host;
pub mod page_alloc;
pub mod phys_mapper;
pub mod ref_count;

use kernel_memory_addresses::{PageSize, PhysicalPage, Size4K};

pub use config::PmmConfig;
pub use error::{AllocError, Fault, InitError};
pub use frame_alloc::FrameAlloc;
pub use page_alloc::{JUNK_FILL, PageAllocator, PmmStats};
pub use ref_count::{RefCount, ref_table_len_for};

/// The allocation unit.
pub type Frame = PhysicalPage<Size4K>;

/// Bytes per frame.
#[allow(clippy::cast_possible_truncation)]
pub const PAGE_BYTES: usize = Size4K::SIZE as usize;
