use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

/// 0 = UNINIT, 1 = INITING, 2 = READY
const UNINIT: u8 = 0;
const INITING: u8 = 1;
const READY: u8 = 2;

/// A write-once cell that can be shared between execution contexts.
///
/// Used as the single ownership slot for boot-time singletons: the value is
/// written exactly once and borrowed for the rest of the kernel's lifetime.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Failure of [`SyncOnceCell::try_init_with`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OnceInitError<E> {
    /// Another caller already initialized (or is initializing) the cell.
    #[error("cell is already initialized")]
    AlreadyInitialized,
    /// The initializer itself failed; the cell stays empty.
    #[error("initializer failed: {0}")]
    Init(E),
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Returns `Some(&T)` if already initialized.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            // SAFETY: READY guarantees the write is done
            Some(unsafe { &*(*self.value.get()).as_ptr() })
        } else {
            None
        }
    }

    /// Initialize at most once and return `&T`.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        loop {
            match self
                .state
                .compare_exchange(UNINIT, INITING, Ordering::Acquire, Ordering::Acquire)
            {
                // We are the initializer
                Ok(_) => {
                    let claim = Claim(&self.state);
                    let v = init();
                    claim.keep();
                    return unsafe { self.publish(v) };
                }
                // SAFETY: READY
                Err(READY) => return unsafe { &*(*self.value.get()).as_ptr() },
                // Someone else is initializing; a failed or panicking init drops back to UNINIT
                Err(_) => spin_loop(),
            }
        }
    }

    /// Run a fallible initializer, but only if nobody has claimed the cell.
    ///
    /// Unlike [`get_or_init`](Self::get_or_init), a second caller does not
    /// receive the existing value: it gets [`OnceInitError::AlreadyInitialized`]
    /// and its initializer never runs. If `init` fails or panics the cell is
    /// released again and may be initialized later.
    ///
    /// # Errors
    /// See [`OnceInitError`].
    pub fn try_init_with<E>(
        &self,
        init: impl FnOnce() -> Result<T, E>,
    ) -> Result<&T, OnceInitError<E>> {
        if self
            .state
            .compare_exchange(UNINIT, INITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(OnceInitError::AlreadyInitialized);
        }

        // Dropping the claim (error or unwind) releases the cell.
        let claim = Claim(&self.state);
        match init() {
            Ok(v) => {
                claim.keep();
                Ok(unsafe { self.publish(v) })
            }
            Err(e) => Err(OnceInitError::Init(e)),
        }
    }

    /// # Safety
    /// The caller must have moved the state from `UNINIT` to `INITING`.
    unsafe fn publish(&self, v: T) -> &T {
        unsafe {
            (*self.value.get()).write(v);
        }
        // Publish value before marking READY
        self.state.store(READY, Ordering::Release);
        // SAFETY: just wrote it
        unsafe { &*(*self.value.get()).as_ptr() }
    }
}

/// Holds the `INITING` state; resets it to `UNINIT` unless kept.
struct Claim<'a>(&'a AtomicU8);

impl Claim<'_> {
    fn keep(self) {
        core::mem::forget(self);
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.0.store(UNINIT, Ordering::Release);
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // SAFETY: READY and we have exclusive access
            unsafe { self.value.get_mut().assume_init_drop() }
        }
    }
}

// Safety: shared after READY; initialization is single-writer.
unsafe impl<T: Sync + Send> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}
