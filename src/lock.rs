//! Lock acquisition that survives poisoning.
//!
//! A panic while holding one of these locks abandons that request, not the
//! process. The next caller takes the guard anyway and works with whatever
//! state the panicking thread left behind, which for this crate's locks is
//! always safe to serve or re-derive.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn note_recovery(target: &'static str, op: &'static str, kind: &'static str) {
    warn!(
        op,
        target_module = target,
        lock_kind = kind,
        result = "poisoned_recovered",
        "Recovered from poisoned lock"
    );
}

pub(crate) fn read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        note_recovery(target, op, "rwlock.read");
        poisoned.into_inner()
    })
}

pub(crate) fn write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        note_recovery(target, op, "rwlock.write");
        poisoned.into_inner()
    })
}

pub(crate) fn acquire<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        note_recovery(target, op, "mutex.lock");
        poisoned.into_inner()
    })
}
