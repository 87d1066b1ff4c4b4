//! # Kernel Memory Configuration
//!
//! Shared constants and boot handoff structures describing physical memory.
//! This is the single source of truth the loader and the physical memory
//! manager agree on.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! * **Physical top**: upper bound of RAM handed to the frame allocator
//! * **Direct map**: base of the higher-half direct map (HHDM) through which
//!   the kernel touches physical frames
//!
//! ### Boot Information ([`boot`])
//! * **Kernel image extent**: the first physical byte after the loaded image,
//!   which is where allocatable memory begins
//!
//! ```text
//! Physical memory:
//!
//! 0x0000_0000  ┌────────────────────────────┐
//!              │ firmware / low memory      │
//! PHYS_LOAD    ├────────────────────────────┤
//!              │ kernel image               │
//! kernel_end   ├────────────────────────────┤ (rounded up to 4 KiB)
//!              │ frames managed by the PMM  │
//! PHYS_TOP     └────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod boot;
pub mod memory;
