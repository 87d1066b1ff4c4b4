use crate::Frame;
use crate::error::Fault;
use crate::phys_mapper::PhysMapper;
use kernel_memory_addresses::{PhysicalAddress, Size4K};

/// End-of-list marker stored in the link word.
const NIL: u64 = u64::MAX;

/// View of the first machine word of a **free** frame.
///
/// ```text
/// +-------------------+----------------------------------+
/// | next (frame idx)  |   junk fill (rest of the frame)  |
/// +-------------------+----------------------------------+
/// ^ frame base
/// ```
///
/// The link holds the *frame index* of the next free frame rather than a
/// pointer, so a link can be range-checked before it is followed.
#[repr(C)]
struct FreeSlot {
    next: u64,
}

/// Intrusive LIFO of free frames.
///
/// # Invariants
/// - Every linked frame lies in `[first, end)` (frame indices).
/// - No frame is linked twice; the chain has at most `end - first` elements.
/// - Link words are only read or written while the allocator lock is held.
pub(crate) struct FreeList {
    head: u64,
    first: u64,
    end: u64,
}

impl FreeList {
    /// Empty list accepting frames of `[first, top)`.
    pub(crate) const fn new(first: Frame, top: PhysicalAddress) -> Self {
        Self {
            head: NIL,
            first: first.index(),
            end: top.frame_index::<Size4K>(),
        }
    }

    #[inline]
    pub(crate) const fn is_empty(&self) -> bool {
        self.head == NIL
    }

    /// Largest number of frames the list can legally hold.
    #[inline]
    const fn capacity(&self) -> u64 {
        self.end - self.first
    }

    #[inline]
    const fn is_valid_link(&self, link: u64) -> bool {
        link == NIL || (link >= self.first && link < self.end)
    }

    /// Link `page` in as the new head.
    ///
    /// # Safety
    /// - `page` must be covered by `mapper` and must not already be linked.
    /// - Nobody else may access the frame while it is on the list.
    pub(crate) unsafe fn push<M: PhysMapper>(&mut self, mapper: &M, page: Frame) {
        debug_assert!(self.is_valid_link(page.index()));
        let slot = unsafe { mapper.phys_to_mut::<FreeSlot>(page.base()) };
        slot.next = self.head;
        self.head = page.index();
    }

    /// Unlink and return the head frame.
    ///
    /// # Errors
    /// [`Fault::CorruptFreeList`] if the head's link word was overwritten with
    /// something that is not a managed frame.
    ///
    /// # Safety
    /// The list must only contain frames covered by `mapper`.
    pub(crate) unsafe fn pop<M: PhysMapper>(&mut self, mapper: &M) -> Result<Option<Frame>, Fault> {
        if self.is_empty() {
            return Ok(None);
        }
        let page = Frame::from_index(self.head);
        let slot = unsafe { mapper.phys_to_mut::<FreeSlot>(page.base()) };
        if !self.is_valid_link(slot.next) {
            return Err(Fault::CorruptFreeList);
        }
        self.head = slot.next;
        Ok(Some(page))
    }

    /// Walk the chain from head to end.
    ///
    /// # Safety
    /// See [`pop`](Self::pop); the list must not be modified while iterating.
    pub(crate) unsafe fn iter<'m, M: PhysMapper>(&self, mapper: &'m M) -> Iter<'_, 'm, M> {
        Iter {
            list: self,
            mapper,
            cursor: self.head,
            seen: 0,
        }
    }

    /// Number of linked frames, counted by traversal.
    ///
    /// # Errors
    /// [`Fault::CorruptFreeList`] on an out-of-range link or a chain longer
    /// than the managed range (a cycle).
    ///
    /// # Safety
    /// See [`iter`](Self::iter).
    pub(crate) unsafe fn len<M: PhysMapper>(&self, mapper: &M) -> Result<usize, Fault> {
        unsafe { self.iter(mapper) }.try_fold(0usize, |n, page| page.map(|_| n + 1))
    }
}

pub(crate) struct Iter<'l, 'm, M> {
    list: &'l FreeList,
    mapper: &'m M,
    cursor: u64,
    seen: u64,
}

impl<M: PhysMapper> Iterator for Iter<'_, '_, M> {
    type Item = Result<Frame, Fault>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        if !self.list.is_valid_link(self.cursor) || self.seen == self.list.capacity() {
            // Stop after reporting once.
            self.cursor = NIL;
            return Some(Err(Fault::CorruptFreeList));
        }
        let page = Frame::from_index(self.cursor);
        let slot = unsafe { self.mapper.phys_to_mut::<FreeSlot>(page.base()) };
        self.cursor = slot.next;
        self.seen += 1;
        Some(Ok(page))
    }
}
