use base::cmp::Ordering;
use base::convert::From;
use base::fmt;
use base::hash::{Hash, Hasher};
use base::marker::{PhantomData, Unpin};
use base::mem;
use base::ops::Deref;
use base::ptr::{self, NonNull};

use base::prelude::v1::*;

use crate::control_block::ControlBlock;
use crate::ReferenceCounted;

/// A thread-safe shared-ownership pointer that may be empty.
///
/// Every non-empty handle refers to a control block that counts the handles sharing it. Cloning
/// adds an owner, dropping removes one, and the last owner to leave releases the object through
/// the block's deleter.
///
/// New owners of an existing object must be produced with [`Clone`] or by moving a handle.
/// Adopting the same raw address with [`SharedHandle::from_raw`] twice gives two unrelated
/// control blocks, each of which will release the object.
pub struct SharedHandle<T> {
    // Mirrors the block's payload; null iff `block` is `None`.
    raw: *mut T,
    block: Option<NonNull<ControlBlock<T>>>,
    phantom: PhantomData<ControlBlock<T>>,
}

unsafe impl<T: Sync + Send> Send for SharedHandle<T> {}
unsafe impl<T: Sync + Send> Sync for SharedHandle<T> {}

impl<T> SharedHandle<T> {
    /// Creates a handle that owns nothing.
    pub const fn empty() -> Self {
        SharedHandle {
            raw: ptr::null_mut(),
            block: None,
            phantom: PhantomData,
        }
    }

    /// Moves `data` to the heap and returns its first owner.
    pub fn new(data: T) -> Self {
        unsafe { Self::from_raw(Box::into_raw(Box::new(data))) }
    }

    /// Takes ownership of `ptr`, which will be released with [`default_deleter`]. A null `ptr`
    /// gives an empty handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from [`Box::into_raw`], and must not be owned by anything
    /// else, including another handle created by this function.
    ///
    /// [`default_deleter`]: crate::default_deleter
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        if ptr.is_null() {
            return Self::empty();
        }

        trace!(payload = ?ptr, "handle created");
        Self::from_block(ControlBlock::new(ptr))
    }

    /// Takes ownership of `ptr`, which will be released by calling `deleter` once the last
    /// owner is gone. A null `ptr` gives an empty handle and `deleter` is dropped unused.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads until `deleter` runs and must not be owned by anything
    /// else, including another handle created by this function.
    pub unsafe fn from_raw_with_deleter<D>(ptr: *mut T, deleter: D) -> Self
    where
        D: FnOnce(*mut T) + Send + 'static,
    {
        if ptr.is_null() {
            return Self::empty();
        }

        trace!(payload = ?ptr, "handle created with deleter");
        Self::from_block(ControlBlock::with_deleter(ptr, Box::new(deleter)))
    }

    fn from_block(block: NonNull<ControlBlock<T>>) -> Self {
        SharedHandle {
            raw: unsafe { block.as_ref() }.payload(),
            block: Some(block),
            phantom: PhantomData,
        }
    }

    #[inline]
    fn inner(&self) -> Option<&ControlBlock<T>> {
        // While this handle is alive it holds a share, so the block has not been freed.
        self.block.map(|block| unsafe { &*block.as_ptr() })
    }

    /// Gives up this handle's share, leaving it empty.
    ///
    /// The share is decremented first. Only if that was the last one is the payload released,
    /// after which the owners' weak reference is given up and the block freed if it was the
    /// last weak reference.
    fn release(&mut self) {
        let block = match self.block.take() {
            Some(block) => block,
            None => return,
        };
        self.raw = ptr::null_mut();

        unsafe {
            let inner = block.as_ref();
            if !inner.decrement_shared() {
                return;
            }

            inner.invoke_deleter();

            if inner.decrement_weak() {
                ControlBlock::destroy(block);
            }
        }
    }

    /// Returns the managed object's address, or null if the handle is empty.
    #[inline]
    pub fn get(&self) -> *mut T {
        self.raw
    }

    /// Returns a reference to the managed object, or `None` if the handle is empty.
    #[inline]
    pub fn get_ref(&self) -> Option<&T> {
        match self.inner() {
            Some(inner) => {
                debug_assert_eq!(inner.payload(), self.raw);
                Some(unsafe { &*self.raw })
            }
            None => None,
        }
    }

    /// Returns the number of handles sharing the object, or zero if the handle is empty.
    pub fn use_count(&self) -> usize {
        self.inner().map_or(0, |inner| inner.shared_count())
    }

    /// Returns whether the handle owns a control block.
    #[inline]
    pub fn is_some(&self) -> bool {
        self.block.is_some()
    }

    /// Returns whether the handle is empty, the counterpart of comparing against null.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.block.is_none()
    }

    /// Returns whether both handles share the same control block. Two empty handles are equal.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }

    /// Gives up this handle's share and leaves it empty.
    ///
    /// The object is only released if this was its last owner; other handles keep it alive.
    pub fn reset(&mut self) {
        trace!(payload = ?self.raw, "reset");
        self.release();
    }

    /// Gives up this handle's share, then takes ownership of `ptr` with a fresh control block
    /// and the default deleter.
    ///
    /// # Safety
    ///
    /// Same contract as [`SharedHandle::from_raw`]. In particular `ptr` must not be the object
    /// this handle currently shares.
    pub unsafe fn reset_with(&mut self, ptr: *mut T) {
        trace!(old = ?self.raw, new = ?ptr, "reset with pointer");
        self.release();
        *self = unsafe { Self::from_raw(ptr) };
    }

    /// Makes this handle share `other`'s object, giving up its own share first.
    ///
    /// Assigning a handle that already shares the same control block changes nothing.
    pub fn assign(&mut self, other: &Self) {
        if Self::ptr_eq(self, other) {
            return;
        }

        trace!(old = ?self.raw, new = ?other.raw, "assign");
        self.release();

        self.raw = other.raw;
        self.block = other.block;
        if let Some(inner) = self.inner() {
            inner.increment_shared();
        }
    }

    /// Moves `other`'s ownership into this handle, giving up this handle's share first.
    /// `other` is left empty and no counter of its block changes.
    pub fn assign_from(&mut self, other: &mut Self) {
        trace!(old = ?self.raw, new = ?other.raw, "move assign");
        self.release();
        mem::swap(self, other);
    }

    /// Takes ownership of a boxed value without moving it out of its allocation.
    pub fn from_box(b: Box<T>) -> Self {
        unsafe { Self::from_raw(Box::into_raw(b)) }
    }

    /// Moves ownership out of this handle, leaving it empty.
    pub fn take(&mut self) -> Self {
        mem::replace(self, Self::empty())
    }
}

impl<T> Clone for SharedHandle<T> {
    /// Makes a clone of the `SharedHandle`.
    ///
    /// This creates another owner of the same object, increasing the shared count. Cloning an
    /// empty handle gives an empty handle.
    #[inline]
    fn clone(&self) -> SharedHandle<T> {
        if let Some(inner) = self.inner() {
            trace!(payload = ?self.raw, "clone");
            inner.increment_shared();
        }

        SharedHandle {
            raw: self.raw,
            block: self.block,
            phantom: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source)
    }
}

impl<T> Drop for SharedHandle<T> {
    /// Drops the `SharedHandle`.
    ///
    /// This will decrement the shared count, release the object if that was the last owner,
    /// and free the control block if no weak references remain.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared_handle::SharedHandle;
    ///
    /// struct Foo;
    ///
    /// impl Drop for Foo {
    ///     fn drop(&mut self) {
    ///         println!("dropped!");
    ///     }
    /// }
    ///
    /// let foo  = SharedHandle::new(Foo);
    /// let foo2 = foo.clone();
    ///
    /// drop(foo);    // Doesn't print anything
    /// drop(foo2);   // Prints "dropped!"
    /// ```
    #[inline]
    fn drop(&mut self) {
        if self.block.is_some() {
            trace!(payload = ?self.raw, "handle dropped");
        }
        self.release();
    }
}

impl<T> Deref for SharedHandle<T> {
    type Target = T;

    /// Dereferences the managed object.
    ///
    /// # Panics
    ///
    /// Panics if the handle is empty. Use [`SharedHandle::get_ref`] to check instead.
    #[inline]
    fn deref(&self) -> &T {
        match self.get_ref() {
            Some(data) => data,
            None => core::panic!("dereferenced an empty SharedHandle"),
        }
    }
}

impl<T> Default for SharedHandle<T> {
    /// Creates an empty `SharedHandle`.
    fn default() -> SharedHandle<T> {
        SharedHandle::empty()
    }
}

impl<T: fmt::Display> fmt::Display for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get_ref() {
            Some(data) => fmt::Display::fmt(data, f),
            None => f.write_str("(null)"),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get_ref() {
            Some(data) => fmt::Debug::fmt(data, f),
            None => f.write_str("(null)"),
        }
    }
}

impl<T> fmt::Pointer for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&(self.raw as *const T), f)
    }
}

impl<T> ReferenceCounted<T> for SharedHandle<T> {
    fn reference_count(this: &Self) -> usize {
        this.use_count()
    }
}

impl<T: PartialEq> PartialEq for SharedHandle<T> {
    /// Equality for two `SharedHandle`s.
    ///
    /// Two handles are equal if their objects are equal, even if they are stored in different
    /// allocations, or if both are empty.
    #[inline]
    fn eq(&self, other: &SharedHandle<T>) -> bool {
        self.get_ref() == other.get_ref()
    }
}

impl<T: Eq> Eq for SharedHandle<T> {}

impl<T: PartialOrd> PartialOrd for SharedHandle<T> {
    /// Partial comparison for two `SharedHandle`s.
    ///
    /// Objects are compared with `partial_cmp()`, an empty handle is less than any other.
    fn partial_cmp(&self, other: &SharedHandle<T>) -> Option<Ordering> {
        self.get_ref().partial_cmp(&other.get_ref())
    }
}

impl<T: Ord> Ord for SharedHandle<T> {
    /// Comparison for two `SharedHandle`s.
    ///
    /// Objects are compared with `cmp()`, an empty handle is less than any other.
    fn cmp(&self, other: &SharedHandle<T>) -> Ordering {
        self.get_ref().cmp(&other.get_ref())
    }
}

impl<T: Hash> Hash for SharedHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.get_ref().hash(state)
    }
}

impl<T> From<T> for SharedHandle<T> {
    fn from(t: T) -> Self {
        SharedHandle::new(t)
    }
}

impl<T> Unpin for SharedHandle<T> {}
