// The counter orderings are adapted from the rust standard library Arc.

use base::cell::UnsafeCell;
use base::mem;
use base::ptr::NonNull;
use base::sync::atomic;
use base::sync::atomic::Ordering::{Acquire, Relaxed, Release, SeqCst};

use base::prelude::v1::*;

/// A soft limit on the amount of owners a single control block may track.
///
/// Going above this limit will abort your program (although not
/// necessarily) at _exactly_ `MAX_REFCOUNT + 1` references.
const MAX_REFCOUNT: usize = (isize::MAX) as usize;

macro_rules! acquire {
    ($x:expr) => {
        atomic::fence(Acquire)
    };
}

/// A user supplied callable that releases a managed object.
///
/// It receives the address the owning handle was created from and is called at most once per
/// control block. It should treat a null address as a no-op.
pub type Deleter<T> = Box<dyn FnOnce(*mut T) + Send>;

/// The deleter used when none is given: reclaims a pointer obtained from [`Box::into_raw`].
///
/// # Safety
///
/// `ptr` must be null or a pointer produced by `Box::into_raw` that has not been reclaimed yet.
pub unsafe fn default_deleter<T>(ptr: *mut T) {
    if ptr.is_null() {
        return;
    }

    trace!(payload = ?ptr, "default deleter");
    unsafe { drop(Box::from_raw(ptr)) };
}

enum DeleterSlot<T> {
    Default,
    Custom(Deleter<T>),
    Spent,
}

/// Ownership bookkeeping for one managed object.
///
/// `shared` starts at one for the handle that created the block. `weak` counts weak observers
/// plus one reference held collectively by all shared owners, which the last shared owner gives
/// up after running the deleter. The payload is released when `shared` drops to zero, the block
/// by whoever drives `weak` to zero.
pub(crate) struct ControlBlock<T> {
    payload: *mut T,
    shared: atomic::AtomicUsize,
    weak: atomic::AtomicUsize,
    // Only touched by whichever owner drives `shared` to zero.
    deleter: UnsafeCell<DeleterSlot<T>>,
}

impl<T> ControlBlock<T> {
    /// Allocates a block that releases `payload` with the default deleter.
    pub(crate) fn new(payload: *mut T) -> NonNull<Self> {
        Self::allocate(payload, DeleterSlot::Default)
    }

    /// Allocates a block that releases `payload` with `deleter`.
    pub(crate) fn with_deleter(payload: *mut T, deleter: Deleter<T>) -> NonNull<Self> {
        Self::allocate(payload, DeleterSlot::Custom(deleter))
    }

    fn allocate(payload: *mut T, deleter: DeleterSlot<T>) -> NonNull<Self> {
        let x: Box<_> = Box::new(ControlBlock {
            payload,
            shared: atomic::AtomicUsize::new(1),
            weak: atomic::AtomicUsize::new(1),
            deleter: UnsafeCell::new(deleter),
        });
        let block: NonNull<Self> = Box::leak(x).into();

        trace!(block = ?block.as_ptr(), payload = ?payload, "control block created");
        block
    }

    /// Frees the block allocation. The payload is left alone.
    ///
    /// # Safety
    ///
    /// `this` must come from [`ControlBlock::new`] or [`ControlBlock::with_deleter`], both
    /// `decrement_weak` must have returned `true` and no reference to the block may outlive
    /// this call.
    pub(crate) unsafe fn destroy(this: NonNull<Self>) {
        trace!(block = ?this.as_ptr(), "control block destroyed");
        unsafe { drop(Box::from_raw(this.as_ptr())) };
    }

    pub(crate) fn payload(&self) -> *mut T {
        self.payload
    }

    pub(crate) fn shared_count(&self) -> usize {
        self.shared.load(SeqCst)
    }

    /// Weak observers, not counting the reference held by the shared owners.
    pub(crate) fn weak_count(&self) -> usize {
        let weak = self.weak.load(SeqCst);
        if self.shared_count() > 0 {
            weak.saturating_sub(1)
        } else {
            weak
        }
    }

    #[inline]
    pub(crate) fn increment_shared(&self) {
        // Relaxed is enough: a new owner can only be made from an existing one, and handing
        // that one to another thread already synchronizes.
        let old_size = self.shared.fetch_add(1, Relaxed);

        // Guard against counts overflowing when handles are leaked with `mem::forget`.
        if old_size > MAX_REFCOUNT {
            core::panic!("shared count overflow");
        }
    }

    /// Gives up one shared ownership and reports whether it was the last one.
    ///
    /// The subtraction is a single read-modify-write, so exactly one caller observes the
    /// transition to zero. A count that is already zero stays zero and `false` is returned.
    #[inline]
    pub(crate) fn decrement_shared(&self) -> bool {
        match self.shared.fetch_update(Release, Relaxed, |n| n.checked_sub(1)) {
            Ok(1) => {
                // Pairs with the `Release` above so that every use of the payload through
                // other owners happens before it is released.
                acquire!(self.shared);
                true
            }
            Ok(_) => false,
            Err(_) => {
                trace!(block = ?(self as *const Self), "decrement of a zero shared count");
                false
            }
        }
    }

    // There is no weak handle type yet, observers only delay freeing the block.
    #[allow(dead_code)]
    pub(crate) fn increment_weak(&self) {
        let old_size = self.weak.fetch_add(1, Relaxed);

        if old_size > MAX_REFCOUNT {
            core::panic!("weak count overflow");
        }
    }

    /// Gives up one weak reference, either an observer's or the one held by the shared owners.
    /// Returns `true` for exactly one caller, the one that took the count to zero, which must
    /// then destroy the block.
    pub(crate) fn decrement_weak(&self) -> bool {
        match self.weak.fetch_update(Release, Relaxed, |n| n.checked_sub(1)) {
            Ok(1) => {
                acquire!(self.weak);
                true
            }
            _ => false,
        }
    }

    /// Runs the deleter on the payload. Later calls do nothing.
    ///
    /// # Safety
    ///
    /// Only the owner that drove the shared count to zero may call this, and no other
    /// reference to the payload may be used afterwards.
    pub(crate) unsafe fn invoke_deleter(&self) {
        let slot = unsafe { mem::replace(&mut *self.deleter.get(), DeleterSlot::Spent) };

        match slot {
            DeleterSlot::Default => {
                trace!(payload = ?self.payload, "invoking default deleter");
                unsafe { default_deleter(self.payload) }
            }
            DeleterSlot::Custom(deleter) => {
                trace!(payload = ?self.payload, "invoking custom deleter");
                deleter(self.payload)
            }
            DeleterSlot::Spent => {}
        }
    }
}
