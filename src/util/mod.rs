//! Utility module
//!
//! Lock helpers for state shared with synchronous listener callbacks. A
//! panicking callback poisons the lock it held; the data behind it is still
//! consistent, so it is recovered and the event logged.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Recovering poisoned mutex");
        poisoned.into_inner()
    })
}

pub(crate) fn read<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(|poisoned| {
        warn!("Recovering poisoned lock");
        poisoned.into_inner()
    })
}

pub(crate) fn write<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(|poisoned| {
        warn!("Recovering poisoned lock");
        poisoned.into_inner()
    })
}
