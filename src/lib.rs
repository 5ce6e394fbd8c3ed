#![no_std]
#![allow(unused_unsafe)]
//! A shared-ownership smart pointer.
//!
//! A [`SharedHandle`] owns a heap allocated object together with every other handle that was
//! cloned from it. The object is released through its [`Deleter`] once the last owning handle
//! goes away. Ownership bookkeeping lives in a separately allocated control block whose
//! counters are atomic, so handles to the same object may be cloned, moved and dropped from
//! different threads. Mutating the object itself is not synchronized.
//!
//! Handles over an object must all descend from the single handle that adopted the raw pointer.
//! Adopting the same address twice creates two unrelated control blocks and releases the object
//! twice.
extern crate maybe_std as base;

/// Emits a `tracing` event at trace level when the `tracing` feature is enabled.
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        tracing::trace!(target: "shared_handle", $($arg)*);
    };
}

/// A smart pointer that keeps track of how many pointers refer to the same allocation and
/// exposes this information in its API.
pub trait ReferenceCounted<T: ?Sized>: Clone {
    /// Get the number of owning pointers referring to the same allocation, or zero if this
    /// pointer owns nothing.
    fn reference_count(this: &Self) -> usize;
}

mod control_block;
pub use control_block::{default_deleter, Deleter};

mod handle;
pub use handle::*;
