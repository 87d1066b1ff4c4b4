//! Boot-time description of the managed physical range.

use crate::Frame;
use crate::error::InitError;
use crate::ref_count::ref_table_len_for;
use kernel_info::boot::PhysMemoryInfo;
use kernel_memory_addresses::{PhysicalAddress, Size4K, whole_pages};

/// Where managed memory begins and ends.
///
/// `kernel_end` is the first byte after the kernel image; it is rounded up to
/// the next page boundary. `phys_top` is exclusive; a trailing partial page is
/// never managed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PmmConfig {
    kernel_end: PhysicalAddress,
    phys_top: PhysicalAddress,
}

impl PmmConfig {
    #[must_use]
    pub const fn new(kernel_end: PhysicalAddress, phys_top: PhysicalAddress) -> Self {
        Self {
            kernel_end,
            phys_top,
        }
    }

    #[must_use]
    pub const fn from_boot(info: &PhysMemoryInfo) -> Self {
        Self::new(info.kernel_end(), info.phys_top())
    }

    #[must_use]
    pub const fn kernel_end(&self) -> PhysicalAddress {
        self.kernel_end
    }

    #[must_use]
    pub const fn phys_top(&self) -> PhysicalAddress {
        self.phys_top
    }

    /// First managed frame and the (page aligned, exclusive) top.
    ///
    /// # Errors
    /// [`InitError::EmptyRange`] if not a single whole page fits.
    pub fn managed_range(&self) -> Result<(Frame, PhysicalAddress), InitError> {
        let empty = InitError::EmptyRange {
            start: self.kernel_end,
            top: self.phys_top,
        };
        let first = self.kernel_end.align_up::<Size4K>().ok_or(empty)?;
        let top = self.phys_top.align_down::<Size4K>();
        if first >= top {
            return Err(empty);
        }
        Ok((first.page(), top))
    }

    /// Number of whole pages the allocator will manage.
    #[must_use]
    pub const fn page_count(&self) -> u64 {
        whole_pages::<Size4K>(self.kernel_end, self.phys_top)
    }

    /// Entries the reference-count table must provide.
    #[must_use]
    pub const fn ref_table_len(&self) -> usize {
        ref_table_len_for(self.phys_top.as_u64())
    }
}
