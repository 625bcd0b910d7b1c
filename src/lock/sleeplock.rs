//! Sleeping locks
use std::cell::UnsafeCell;

use parking_lot::{Condvar, Mutex};

/// Long-term locks that sleep instead of busy wait.
///
/// Acquiring returns no guard: the holder marks the lock held, and must pair
/// the [`acquire`](Self::acquire) with exactly one [`release`](Self::release)
/// along every path. This allows the lock to be held across blocking I/O and
/// handed between threads, which a guard tied to a stack frame cannot do.
pub struct SleepLock<T> {
    /// Whether the lock is held.
    locked: Mutex<bool>,
    /// WaitChannel saying the lock is released.
    waitchannel: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: the inner data is only reachable through `get_mut_raw`, whose
// callers must hold the lock, so all access is serialized.
unsafe impl<T: Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    /// Returns a new `SleepLock` holding `data`.
    pub const fn new(data: T) -> Self {
        Self {
            locked: Mutex::new(false),
            waitchannel: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquires the lock, sleeping until it is free.
    pub fn acquire(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.waitchannel.wait(&mut locked);
        }
        *locked = true;
    }

    /// Releases the lock and wakes every waiting acquirer.
    pub fn release(&self) {
        let mut locked = self.locked.lock();
        *locked = false;
        self.waitchannel.notify_all();
    }

    /// Returns a raw pointer to the inner data.
    /// The caller must hold the lock while dereferencing it.
    pub fn get_mut_raw(&self) -> *mut T {
        self.data.get()
    }

    /// Returns a mutable reference to the inner data.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the lock and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}
