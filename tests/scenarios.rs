use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;

use shared_handle::{default_deleter, ReferenceCounted, SharedHandle};

fn counted(value: i32, calls: &Arc<AtomicUsize>) -> SharedHandle<i32> {
    let calls = Arc::clone(calls);
    unsafe {
        SharedHandle::from_raw_with_deleter(Box::into_raw(Box::new(value)), move |ptr| {
            calls.fetch_add(1, SeqCst);
            default_deleter(ptr);
        })
    }
}

#[test]
fn dereference_yields_constructed_value() {
    let number = unsafe { SharedHandle::from_raw(Box::into_raw(Box::new(-3i64))) };
    let text = SharedHandle::new(String::from("hello"));
    let list = SharedHandle::new(vec![1, 2, 3]);

    assert_eq!(*number, -3);
    assert_eq!(text.len(), 5);
    assert_eq!(list[2], 3);
}

#[test]
fn copy_then_drop_copy() {
    let calls = Arc::new(AtomicUsize::new(0));
    let h1 = counted(42, &calls);
    let h2 = h1.clone();

    assert_eq!(h1.use_count(), 2);

    drop(h2);
    assert_eq!(h1.use_count(), 1);
    assert_eq!(*h1, 42);
    assert_eq!(calls.load(SeqCst), 0);

    drop(h1);
    assert_eq!(calls.load(SeqCst), 1);
}

#[test]
fn move_into_new_handle() {
    let mut h1 = SharedHandle::new(99u32);
    let h2 = h1.take();

    assert!(!h1.is_some());
    assert!(h1.get().is_null());
    assert_eq!(h1.use_count(), 0);
    assert_eq!(h2.use_count(), 1);
    assert_eq!(*h2, 99);
}

#[test]
fn plain_move_keeps_count() {
    let calls = Arc::new(AtomicUsize::new(0));
    let h1 = counted(1, &calls);
    let copy = h1.clone();

    let moved = h1;
    assert_eq!(moved.use_count(), 2);
    assert_eq!(copy.use_count(), 2);

    drop(moved);
    drop(copy);
    assert_eq!(calls.load(SeqCst), 1);
}

#[test]
fn reset_runs_custom_deleter_once() {
    let flag = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut h1 = {
        let flag = Arc::clone(&flag);
        let calls = Arc::clone(&calls);
        unsafe {
            SharedHandle::from_raw_with_deleter(Box::into_raw(Box::new(7u8)), move |ptr| {
                flag.store(true, SeqCst);
                calls.fetch_add(1, SeqCst);
                default_deleter(ptr);
            })
        }
    };

    h1.reset();
    drop(h1);

    assert!(flag.load(SeqCst));
    assert_eq!(calls.load(SeqCst), 1);
}

#[test]
fn custom_deleter_replaces_default() {
    // The deleter keeps the value alive elsewhere, so the default deleter must not run.
    let stash: Arc<std::sync::Mutex<Vec<Box<String>>>> = Arc::default();
    let sink = Arc::clone(&stash);

    let h = unsafe {
        SharedHandle::from_raw_with_deleter(
            Box::into_raw(Box::new(String::from("kept"))),
            move |ptr| sink.lock().unwrap().push(Box::from_raw(ptr)),
        )
    };
    let copy = h.clone();
    drop(h);
    assert!(stash.lock().unwrap().is_empty());

    drop(copy);
    let stash = stash.lock().unwrap();
    assert_eq!(stash.len(), 1);
    assert_eq!(*stash[0], "kept");
}

#[test]
fn every_copy_reports_the_same_count() {
    let calls = Arc::new(AtomicUsize::new(0));
    let first = counted(0, &calls);
    let mut copies = vec![first];

    for n in 2..=16 {
        copies.push(copies[0].clone());
        assert!(copies.iter().all(|h| h.use_count() == n));
    }

    while copies.len() > 1 {
        copies.pop();
        assert!(copies.iter().all(|h| SharedHandle::reference_count(h) == copies.len()));
    }

    assert_eq!(*copies[0], 0);
    copies.clear();
    assert_eq!(calls.load(SeqCst), 1);
}

#[test]
fn self_assignment_changes_nothing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut h = counted(5, &calls);
    let before = h.get();

    h = h.clone();
    let alias = h.clone();
    h.assign(&alias);

    assert_eq!(h.get(), before);
    assert_eq!(h.use_count(), 2);
    assert_eq!(calls.load(SeqCst), 0);
}

#[test]
fn overwriting_with_assignment_releases_old_object() {
    let old_calls = Arc::new(AtomicUsize::new(0));
    let new_calls = Arc::new(AtomicUsize::new(0));
    let mut h = counted(1, &old_calls);
    let mut other = counted(2, &new_calls);

    h.assign_from(&mut other);

    assert_eq!(old_calls.load(SeqCst), 1);
    assert!(other.is_null());
    assert_eq!(*h, 2);

    h = SharedHandle::empty();
    assert!(h.is_null());
    assert_eq!(new_calls.load(SeqCst), 1);
}
