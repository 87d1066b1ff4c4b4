//! Per-frame owner counts.
//!
//! The table is dense and indexed by absolute frame number, so it covers
//! `[0, phys_top)`. Storage is borrowed from the caller: boot code typically
//! hands in a `static` array sized with [`ref_table_len_for`].

use crate::Frame;
use crate::error::{Fault, InitError};
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K};

/// Number of owners of one frame.
pub type RefCount = u16;

/// Table length needed to cover every frame below `phys_top`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn ref_table_len_for(phys_top: u64) -> usize {
    phys_top.div_ceil(Size4K::SIZE) as usize
}

pub(crate) struct RefCountTable<'t> {
    counts: &'t mut [RefCount],
}

impl<'t> RefCountTable<'t> {
    pub(crate) fn new(counts: &'t mut [RefCount], top: PhysicalAddress) -> Result<Self, InitError> {
        let needed = ref_table_len_for(top.as_u64());
        if counts.len() < needed {
            return Err(InitError::RefTableTooSmall {
                needed,
                provided: counts.len(),
            });
        }
        Ok(Self { counts })
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn slot(page: Frame) -> usize {
        page.index() as usize
    }

    pub(crate) fn get(&self, page: Frame) -> RefCount {
        self.counts[Self::slot(page)]
    }

    pub(crate) fn reset(&mut self, page: Frame) {
        self.counts[Self::slot(page)] = 0;
    }

    /// `0 -> 1` transition of a frame leaving the free registry.
    pub(crate) fn claim(&mut self, page: Frame) -> Result<(), Fault> {
        let count = &mut self.counts[Self::slot(page)];
        if *count != 0 {
            return Err(Fault::FreeFrameReferenced);
        }
        *count = 1;
        Ok(())
    }

    pub(crate) fn increment(&mut self, page: Frame) -> Result<RefCount, Fault> {
        let count = &mut self.counts[Self::slot(page)];
        *count = count.checked_add(1).ok_or(Fault::RefCountOverflow)?;
        Ok(*count)
    }

    pub(crate) fn decrement(&mut self, page: Frame) -> Result<RefCount, Fault> {
        let count = &mut self.counts[Self::slot(page)];
        *count = count.checked_sub(1).ok_or(Fault::RefCountUnderflow)?;
        Ok(*count)
    }
}
