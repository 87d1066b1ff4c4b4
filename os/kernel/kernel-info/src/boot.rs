//! # Kernel Boot Information

use kernel_memory_addresses::PhysicalAddress;

/// Physical memory facts the loader hands to the kernel.
/// Keep this `#[repr(C)]` and prefer fixed-size integers at the ABI boundary.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PhysMemoryInfo {
    /// First physical byte after the loaded kernel image (`end` in the linker script).
    pub kernel_end: u64,

    /// Exclusive upper bound of usable physical memory.
    pub phys_top: u64,
}

impl PhysMemoryInfo {
    /// Handoff for an image ending at `kernel_end`, using the configured
    /// [`PHYS_TOP`](crate::memory::PHYS_TOP).
    #[must_use]
    pub const fn with_default_top(kernel_end: u64) -> Self {
        Self {
            kernel_end,
            phys_top: crate::memory::PHYS_TOP,
        }
    }

    #[must_use]
    pub const fn kernel_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.kernel_end)
    }

    #[must_use]
    pub const fn phys_top(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_top)
    }
}
