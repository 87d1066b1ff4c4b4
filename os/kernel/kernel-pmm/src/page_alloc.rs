//! # Reference-counted page allocator
//!
//! [`PageAllocator`] owns the managed range `[first, top)` and two pieces of
//! bookkeeping, both behind one [`SpinLock`]:
//!
//! - the **free list**, threaded through the free frames themselves, and
//! - the **reference-count table**, one owner count per frame.
//!
//! Keeping them under a single lock means no context can ever observe a frame
//! that is on the free list while still counted as owned, or vice versa.
//!
//! ## Sharing protocol
//!
//! ```text
//!   alloc_page ──► count 1 ──inc_ref──► count 2 ──free_page──► count 1 ──free_page──► count 0
//!       ▲                                                                              │
//!       └──────────────────────────── free list ◄── junk fill ◄────────────────────────┘
//! ```
//!
//! A frame returns to the free list only when [`free_page`](PageAllocator::free_page)
//! drops its count to zero. [`inc_ref`](PageAllocator::inc_ref) and
//! [`dec_ref`](PageAllocator::dec_ref) register and retire *additional* owners
//! and never move a frame on or off the list.

use crate::{Frame, PAGE_BYTES};
use crate::config::PmmConfig;
use crate::error::{AllocError, Fault, InitError, fatal};
use crate::free_list::FreeList;
use crate::phys_mapper::PhysMapper;
use crate::ref_count::{RefCount, RefCountTable};
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::SpinLock;
use log::{debug, info, trace, warn};

/// Byte pattern written over every released frame.
///
/// Non-zero so that a stale reader sees obvious garbage instead of plausible
/// zeroed data or the previous owner's contents.
pub const JUNK_FILL: u8 = 0x01;

/// Everything guarded by the allocator lock.
struct PmmState<'t> {
    free: FreeList,
    refs: RefCountTable<'t>,
}

/// Snapshot of allocator occupancy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PmmStats {
    /// Frames in `[first, top)`.
    pub managed_pages: u64,
    /// Frames on the free list.
    pub free_pages: u64,
    /// Frames handed out to at least one owner.
    pub allocated_pages: u64,
}

/// Physical page allocator for 4 KiB frames.
pub struct PageAllocator<'t, M: PhysMapper> {
    mapper: M,
    first: Frame,
    top: PhysicalAddress,
    managed_pages: u64,
    state: SpinLock<PmmState<'t>>,
}

impl<'t, M: PhysMapper> PageAllocator<'t, M> {
    /// Take ownership of the range described by `config` and free every whole
    /// page in it once, in ascending address order.
    ///
    /// `ref_table` must provide [`PmmConfig::ref_table_len`] entries; its
    /// previous contents are irrelevant.
    ///
    /// # Errors
    /// [`InitError::EmptyRange`] or [`InitError::RefTableTooSmall`]. Nothing
    /// is written to physical memory on error.
    ///
    /// # Safety
    /// - Every frame in the managed range must be RAM reachable through
    ///   `mapper` and must not be used by anyone else from now on.
    /// - The range must not already be managed by another allocator.
    pub unsafe fn new(
        mapper: M,
        config: PmmConfig,
        ref_table: &'t mut [RefCount],
    ) -> Result<Self, InitError> {
        let (first, top) = config.managed_range()?;
        let refs = RefCountTable::new(ref_table, top)?;
        let mut state = PmmState {
            free: FreeList::new(first, top),
            refs,
        };

        let mut managed_pages = 0;
        let mut page = first;
        while page.base() < top {
            state.refs.reset(page);
            // SAFETY: the caller hands us exclusive ownership of the range.
            unsafe {
                scrub(&mapper, page);
                state.free.push(&mapper, page);
            }
            managed_pages += 1;
            page = page.next();
        }

        info!(
            "pmm: managing {managed_pages} pages in [{}, {top}) after kernel end {}",
            first.base(),
            config.kernel_end()
        );

        Ok(Self {
            mapper,
            first,
            top,
            managed_pages,
            state: SpinLock::named("pmm", state),
        })
    }

    /// Hand out one frame with a reference count of 1.
    ///
    /// Never waits for memory to become available.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] when no frame is free.
    pub fn alloc_page(&self) -> Result<Frame, AllocError> {
        let mut st = self.state.lock();
        // SAFETY: the list only ever holds frames of our range.
        let page = match unsafe { st.free.pop(&self.mapper) } {
            Ok(Some(page)) => page,
            Ok(None) => {
                drop(st);
                warn!("pmm: out of physical pages");
                return Err(AllocError::OutOfMemory);
            }
            Err(fault) => fatal("alloc_page", self.first.base(), fault),
        };
        if let Err(fault) = st.refs.claim(page) {
            fatal("alloc_page", page.base(), fault);
        }
        drop(st);

        trace!("pmm: alloc {page}");
        Ok(page)
    }

    /// Drop one owner of the frame at `addr`.
    ///
    /// The frame is scrubbed with [`JUNK_FILL`] and returned to the free list
    /// only if this was the last owner; otherwise its contents stay intact for
    /// the remaining owners.
    ///
    /// # Panics
    /// Halts if `addr` is misaligned or outside the managed range, or if the
    /// frame is not currently allocated (double free).
    pub fn free_page(&self, addr: impl Into<PhysicalAddress>) {
        const OP: &str = "free_page";
        let page = self.checked_frame(OP, addr.into());

        let mut st = self.state.lock();
        let remaining = match st.refs.decrement(page) {
            Ok(n) => n,
            Err(Fault::RefCountUnderflow) => fatal(OP, page.base(), Fault::NotAllocated),
            Err(fault) => fatal(OP, page.base(), fault),
        };
        if remaining == 0 {
            // SAFETY: the last owner just let go; the frame is ours again.
            unsafe {
                scrub(&self.mapper, page);
                st.free.push(&self.mapper, page);
            }
        }
        drop(st);

        if remaining == 0 {
            trace!("pmm: free {page}");
        } else {
            debug!("pmm: {page} still shared by {remaining} owner(s)");
        }
    }

    /// Register one more owner of an allocated frame; returns the new count.
    ///
    /// # Panics
    /// Halts on an invalid address, a free frame, or counter overflow.
    pub fn inc_ref(&self, addr: impl Into<PhysicalAddress>) -> RefCount {
        const OP: &str = "inc_ref";
        let page = self.checked_frame(OP, addr.into());

        let mut st = self.state.lock();
        if st.refs.get(page) == 0 {
            fatal(OP, page.base(), Fault::NotAllocated);
        }
        st.refs
            .increment(page)
            .unwrap_or_else(|fault| fatal(OP, page.base(), fault))
    }

    /// Retire one additional owner registered with [`inc_ref`](Self::inc_ref);
    /// returns the new count.
    ///
    /// The last owner must leave through [`free_page`](Self::free_page), so
    /// the count never reaches zero here.
    ///
    /// # Panics
    /// Halts on an invalid address, a free frame (underflow), or when only
    /// one owner is left.
    pub fn dec_ref(&self, addr: impl Into<PhysicalAddress>) -> RefCount {
        const OP: &str = "dec_ref";
        let page = self.checked_frame(OP, addr.into());

        let mut st = self.state.lock();
        match st.refs.get(page) {
            0 => fatal(OP, page.base(), Fault::RefCountUnderflow),
            1 => fatal(OP, page.base(), Fault::LastReference),
            _ => st
                .refs
                .decrement(page)
                .unwrap_or_else(|fault| fatal(OP, page.base(), fault)),
        }
    }

    /// Current number of owners of the frame at `addr`.
    ///
    /// # Panics
    /// Halts on an invalid address.
    #[must_use]
    pub fn ref_count(&self, addr: impl Into<PhysicalAddress>) -> RefCount {
        let page = self.checked_frame("ref_count", addr.into());
        self.state.lock().refs.get(page)
    }

    /// Number of frames on the free list, counted under the lock.
    ///
    /// # Panics
    /// Halts if the free list turns out to be corrupt.
    #[must_use]
    pub fn free_page_count(&self) -> usize {
        let st = self.state.lock();
        // SAFETY: the list only ever holds frames of our range.
        match unsafe { st.free.len(&self.mapper) } {
            Ok(n) => n,
            Err(fault) => fatal("free_page_count", self.first.base(), fault),
        }
    }

    /// Occupancy snapshot.
    ///
    /// # Panics
    /// See [`free_page_count`](Self::free_page_count).
    #[must_use]
    pub fn stats(&self) -> PmmStats {
        let free_pages = self.free_page_count() as u64;
        PmmStats {
            managed_pages: self.managed_pages,
            free_pages,
            allocated_pages: self.managed_pages - free_pages,
        }
    }

    /// The managed range `[first, top)`.
    #[must_use]
    pub const fn managed_range(&self) -> (PhysicalAddress, PhysicalAddress) {
        (self.first.base(), self.top)
    }

    #[must_use]
    pub const fn managed_pages(&self) -> u64 {
        self.managed_pages
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Validate a caller-supplied frame address, halting on misuse.
    fn checked_frame(&self, op: &'static str, addr: PhysicalAddress) -> Frame {
        let Some(page) = Frame::from_aligned(addr) else {
            fatal(op, addr, Fault::Misaligned);
        };
        if addr < self.first.base() {
            fatal(op, addr, Fault::BelowManagedRange);
        }
        if addr >= self.top {
            fatal(op, addr, Fault::AboveManagedRange);
        }
        page
    }
}

/// Overwrite the whole frame with [`JUNK_FILL`].
///
/// # Safety
/// The frame must be covered by `mapper` and have no other users.
unsafe fn scrub<M: PhysMapper>(mapper: &M, page: Frame) {
    unsafe {
        core::ptr::write_bytes(mapper.phys_to_ptr(page.base()), JUNK_FILL, PAGE_BYTES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostArena;
    use crate::ref_count::ref_table_len_for;
    use std::collections::HashSet;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Barrier;
    use std::thread;

    const BASE: u64 = 0x0010_0000;

    /// Arena of `pages` frames at `BASE`; the "kernel" ends `kernel_bytes` in.
    struct Fixture {
        arena: HostArena,
        table: Vec<RefCount>,
        config: PmmConfig,
    }

    impl Fixture {
        fn new(pages: u64, kernel_bytes: u64) -> Self {
            let arena = HostArena::new(PhysicalAddress::new(BASE), pages * 4096).unwrap();
            let config = PmmConfig::new(PhysicalAddress::new(BASE + kernel_bytes), arena.top());
            let table = vec![0; ref_table_len_for(arena.top().as_u64())];
            Self {
                arena,
                table,
                config,
            }
        }

        fn pmm(&mut self) -> PageAllocator<'_, &HostArena> {
            unsafe { PageAllocator::new(&self.arena, self.config, &mut self.table) }.unwrap()
        }
    }

    fn panics(f: impl FnOnce()) -> bool {
        panic::catch_unwind(AssertUnwindSafe(f)).is_err()
    }

    #[test]
    fn init_frees_every_whole_page_after_kernel() {
        // kernel ends mid-page: first managed frame is the next boundary
        let mut fx = Fixture::new(16, 0x2010);
        assert_eq!(fx.config.page_count(), 13);
        let pmm = fx.pmm();
        assert_eq!(pmm.free_page_count(), 13);
        assert_eq!(pmm.managed_pages(), 13);
        assert_eq!(
            pmm.managed_range(),
            (PhysicalAddress::new(BASE + 0x3000), PhysicalAddress::new(BASE + 0x10000))
        );
    }

    #[test]
    fn init_rejects_bad_configuration() {
        let arena = HostArena::new(PhysicalAddress::new(BASE), 0x4000).unwrap();
        let mut table = vec![0; ref_table_len_for(arena.top().as_u64())];

        let empty = PmmConfig::new(PhysicalAddress::new(BASE + 0x3001), arena.top());
        let err = unsafe { PageAllocator::new(&arena, empty, &mut table) }.err();
        assert!(matches!(err, Some(InitError::EmptyRange { .. })));

        let mut short = vec![0; 3];
        let cfg = PmmConfig::new(arena.base(), arena.top());
        let err = unsafe { PageAllocator::new(&arena, cfg, &mut short) }.err();
        assert!(matches!(err, Some(InitError::RefTableTooSmall { provided: 3, .. })));
    }

    #[test]
    fn allocation_order_is_most_recently_freed_first() {
        let mut fx = Fixture::new(4, 0);
        let pmm = fx.pmm();
        // pushed ascending, so the highest frame comes out first
        let a = pmm.alloc_page().unwrap();
        assert_eq!(a.base().as_u64(), BASE + 0x3000);
        let b = pmm.alloc_page().unwrap();
        pmm.free_page(b);
        pmm.free_page(a);
        assert_eq!(pmm.alloc_page(), Ok(a));
        assert_eq!(pmm.alloc_page(), Ok(b));
    }

    #[test]
    fn allocated_pages_are_aligned_and_in_range() {
        let mut fx = Fixture::new(32, 0x1234);
        let pmm = fx.pmm();
        let (first, top) = pmm.managed_range();
        let mut seen = HashSet::new();
        while let Ok(page) = pmm.alloc_page() {
            let pa = page.base();
            assert!(pa.is_aligned::<kernel_memory_addresses::Size4K>());
            assert!(pa >= first && pa < top, "{pa} outside [{first}, {top})");
            assert!(seen.insert(pa), "{pa} handed out twice");
            assert_eq!(pmm.ref_count(pa), 1);
        }
        assert_eq!(seen.len() as u64, pmm.managed_pages());
    }

    #[test]
    fn alloc_free_round_trip_restores_count() {
        let mut fx = Fixture::new(8, 0);
        let pmm = fx.pmm();
        let before = pmm.free_page_count();
        let page = pmm.alloc_page().unwrap();
        assert_eq!(pmm.free_page_count(), before - 1);
        pmm.free_page(page);
        assert_eq!(pmm.free_page_count(), before);
        assert_eq!(pmm.ref_count(page), 0);
    }

    #[test]
    fn exhaustion_is_reported_not_fatal() {
        let mut fx = Fixture::new(3, 0);
        let pmm = fx.pmm();
        let pages: Vec<_> = (0..3).map(|_| pmm.alloc_page().unwrap()).collect();
        assert_eq!(pmm.free_page_count(), 0);
        assert_eq!(pmm.alloc_page(), Err(AllocError::OutOfMemory));
        // still usable afterwards
        pmm.free_page(pages[1]);
        assert_eq!(pmm.alloc_page(), Ok(pages[1]));
    }

    #[test]
    fn shared_page_survives_until_last_free() {
        let mut fx = Fixture::new(2, 0);
        let pmm = fx.pmm();
        let shared = pmm.alloc_page().unwrap();
        let other = pmm.alloc_page().unwrap();
        assert_eq!(pmm.inc_ref(shared), 2);

        pmm.free_page(shared);
        assert_eq!(pmm.ref_count(shared), 1);
        assert_eq!(pmm.free_page_count(), 0);
        // the only free-able frame is still owned, so nothing can be allocated
        assert_eq!(pmm.alloc_page(), Err(AllocError::OutOfMemory));

        pmm.free_page(shared);
        assert_eq!(pmm.ref_count(shared), 0);
        assert_eq!(pmm.free_page_count(), 1);
        assert_eq!(pmm.alloc_page(), Ok(shared));
        pmm.free_page(other);
    }

    #[test]
    fn shared_page_contents_are_kept_until_reclaimed() {
        let mut fx = Fixture::new(2, 0);
        let pmm = fx.pmm();
        let page = pmm.alloc_page().unwrap();
        pmm.mapper().fill_page(page, 0xAB);
        pmm.inc_ref(page);

        pmm.free_page(page);
        assert!(pmm.mapper().read_page(page).iter().all(|&b| b == 0xAB));

        pmm.free_page(page);
        let bytes = pmm.mapper().read_page(page);
        // first word is the free-list link, the rest is junk
        assert!(bytes[8..].iter().all(|&b| b == JUNK_FILL));
    }

    #[test]
    fn inc_dec_ref_do_not_touch_free_list() {
        let mut fx = Fixture::new(4, 0);
        let pmm = fx.pmm();
        let page = pmm.alloc_page().unwrap();
        let free = pmm.free_page_count();
        assert_eq!(pmm.inc_ref(page), 2);
        assert_eq!(pmm.inc_ref(page), 3);
        assert_eq!(pmm.dec_ref(page), 2);
        assert_eq!(pmm.dec_ref(page), 1);
        assert_eq!(pmm.free_page_count(), free);
    }

    #[test]
    fn free_page_count_handles_small_lists() {
        let mut fx = Fixture::new(2, 0);
        let pmm = fx.pmm();
        assert_eq!(pmm.free_page_count(), 2);
        let a = pmm.alloc_page().unwrap();
        assert_eq!(pmm.free_page_count(), 1);
        let b = pmm.alloc_page().unwrap();
        assert_eq!(pmm.free_page_count(), 0);
        pmm.free_page(a);
        assert_eq!(pmm.free_page_count(), 1);
        pmm.free_page(b);
        assert_eq!(pmm.free_page_count(), 2);
    }

    #[test]
    fn stats_reflect_occupancy() {
        let mut fx = Fixture::new(10, 0);
        let pmm = fx.pmm();
        let _a = pmm.alloc_page().unwrap();
        let _b = pmm.alloc_page().unwrap();
        assert_eq!(
            pmm.stats(),
            PmmStats {
                managed_pages: 10,
                free_pages: 8,
                allocated_pages: 2
            }
        );
    }

    #[test]
    #[should_panic(expected = "free_page: address is not page aligned")]
    fn free_one_byte_below_range_is_fatal() {
        let mut fx = Fixture::new(4, 0x1000);
        let pmm = fx.pmm();
        let (first, _) = pmm.managed_range();
        pmm.free_page(PhysicalAddress::new(first.as_u64() - 1));
    }

    #[test]
    #[should_panic(expected = "free_page: address lies below the managed range")]
    fn free_kernel_page_is_fatal() {
        let mut fx = Fixture::new(4, 0x1000);
        let pmm = fx.pmm();
        pmm.free_page(PhysicalAddress::new(BASE));
    }

    #[test]
    #[should_panic(expected = "free_page: address lies at or above the top of physical memory")]
    fn trailing_partial_page_is_not_managed() {
        let arena = HostArena::new(PhysicalAddress::new(BASE), 0x5000).unwrap();
        let mut table = vec![0; ref_table_len_for(arena.top().as_u64())];
        let config = PmmConfig::new(arena.base(), PhysicalAddress::new(BASE + 0x4800));
        let pmm = unsafe { PageAllocator::new(&arena, config, &mut table) }.unwrap();

        assert_eq!(pmm.free_page_count(), 4);
        assert_eq!(pmm.managed_range().1, PhysicalAddress::new(BASE + 0x4000));
        pmm.free_page(PhysicalAddress::new(BASE + 0x4000));
    }

    #[test]
    fn invalid_addresses_are_fatal() {
        let mut fx = Fixture::new(4, 0);
        let pmm = fx.pmm();
        let (_, top) = pmm.managed_range();
        assert!(panics(|| pmm.free_page(PhysicalAddress::new(BASE + 0x10))));
        assert!(panics(|| pmm.free_page(top)));
        assert!(panics(|| {
            pmm.inc_ref(top);
        }));
        assert!(panics(|| {
            let _ = pmm.ref_count(PhysicalAddress::new(BASE + 0x800));
        }));
        // the lock was released by unwinding; the allocator still works
        assert_eq!(pmm.free_page_count(), 4);
    }

    #[test]
    fn double_free_is_fatal() {
        let mut fx = Fixture::new(4, 0);
        let pmm = fx.pmm();
        let page = pmm.alloc_page().unwrap();
        pmm.free_page(page);
        assert!(panics(|| pmm.free_page(page)));
        assert_eq!(pmm.free_page_count(), 4, "double free must not link twice");
    }

    #[test]
    fn refcount_misuse_is_fatal() {
        let mut fx = Fixture::new(4, 0);
        let pmm = fx.pmm();
        let page = pmm.alloc_page().unwrap();
        // the last owner must go through free_page
        assert!(panics(|| {
            pmm.dec_ref(page);
        }));
        assert_eq!(pmm.ref_count(page), 1);

        pmm.free_page(page);
        assert!(panics(|| {
            pmm.dec_ref(page);
        }));
        assert!(panics(|| {
            pmm.inc_ref(page);
        }));
        assert_eq!(pmm.ref_count(page), 0);
    }

    #[test]
    fn corrupt_link_is_detected() {
        let mut fx = Fixture::new(4, 0);
        let pmm = fx.pmm();
        // scribble over the head frame's link word through a dangling pointer
        let head = pmm.alloc_page().unwrap();
        pmm.free_page(head);
        pmm.mapper().fill_page(head, 0xEE);
        assert!(panics(|| {
            let _ = pmm.free_page_count();
        }));
        assert!(panics(|| {
            let _ = pmm.alloc_page();
        }));
    }

    #[test]
    fn concurrent_alloc_free_never_duplicates() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 2_000;

        let mut fx = Fixture::new(THREADS as u64, 0);
        let pmm = fx.pmm();
        let owners: Vec<_> = (0..ref_table_len_for(pmm.managed_range().1.as_u64()))
            .map(|_| std::sync::atomic::AtomicUsize::new(usize::MAX))
            .collect();
        let start = Barrier::new(THREADS);

        thread::scope(|s| {
            for id in 0..THREADS {
                let (pmm, owners, start) = (&pmm, &owners, &start);
                s.spawn(move || {
                    use std::sync::atomic::Ordering;
                    start.wait();
                    for _ in 0..ROUNDS {
                        let Ok(page) = pmm.alloc_page() else {
                            // a pool of N frames for N threads never runs dry
                            panic!("exhausted with at most {THREADS} pages in use");
                        };
                        let slot = &owners[page.index() as usize];
                        let prev = slot.swap(id, Ordering::SeqCst);
                        assert_eq!(prev, usize::MAX, "{page} handed to two owners");
                        thread::yield_now();
                        assert_eq!(slot.swap(usize::MAX, Ordering::SeqCst), id);
                        pmm.free_page(page);
                    }
                });
            }
        });

        assert_eq!(pmm.free_page_count(), THREADS);
        let stats = pmm.stats();
        assert_eq!(stats.allocated_pages, 0);
    }

    #[test]
    fn concurrent_sharing_conserves_pages() {
        const THREADS: usize = 4;
        const ROUNDS: usize = 1_000;

        let mut fx = Fixture::new(16, 0);
        let pmm = fx.pmm();
        let shared = pmm.alloc_page().unwrap();
        let start = Barrier::new(THREADS);

        thread::scope(|s| {
            for _ in 0..THREADS {
                let (pmm, start) = (&pmm, &start);
                s.spawn(move || {
                    start.wait();
                    for _ in 0..ROUNDS {
                        pmm.inc_ref(shared);
                        let own = pmm.alloc_page().unwrap();
                        assert_ne!(own, shared);
                        pmm.free_page(own);
                        pmm.free_page(shared);
                    }
                });
            }
        });

        assert_eq!(pmm.ref_count(shared), 1);
        assert_eq!(pmm.free_page_count(), 15);
        pmm.free_page(shared);
        assert_eq!(pmm.free_page_count(), 16);
    }
}
