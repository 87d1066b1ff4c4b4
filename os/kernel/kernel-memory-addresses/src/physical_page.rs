use crate::{PageSize, PhysicalAddress};
use core::fmt;
use core::marker::PhantomData;

/// Physical memory page (frame) of size `S`.
///
/// A `PhysicalPage<S>` is the **page-aligned base** of a physical frame of
/// `S::SIZE` bytes. Frames are what the physical allocator hands out; the
/// type guarantees the low `S::SHIFT` bits are zero.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pp = PhysicalPage::<Size4K>::from_index(0x200);
/// assert_eq!(pp.base().as_u64(), 0x20_0000);
/// assert_eq!(pp.index(), 0x200);
/// assert_eq!(pp.next().index(), 0x201);
///
/// assert!(PhysicalPage::<Size4K>::from_aligned(PhysicalAddress::new(0x1001)).is_none());
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize> {
    base: u64,
    _phantom: PhantomData<S>,
}

impl<S: PageSize> PhysicalPage<S> {
    /// Page that contains `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self {
            base: addr.as_u64() & !S::MASK,
            _phantom: PhantomData,
        }
    }

    /// Page starting exactly at `addr`, or `None` if `addr` is unaligned.
    #[inline]
    #[must_use]
    pub const fn from_aligned(addr: PhysicalAddress) -> Option<Self> {
        if addr.is_aligned::<S>() {
            Some(Self::containing(addr))
        } else {
            None
        }
    }

    /// Page with frame number `index`.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u64) -> Self {
        Self {
            base: index << S::SHIFT,
            _phantom: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    /// Frame number (`base / S::SIZE`).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u64 {
        self.base >> S::SHIFT
    }

    /// The page immediately following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self::from_index(self.index() + 1)
    }
}

impl<S> fmt::Display for PhysicalPage<S>
where
    S: PageSize,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/{}", self.base, S::as_str())
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage<{}>({:#018X})", S::as_str(), self.base)
    }
}
