//! Sleepable locks
use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Sleepable locks
pub struct SleepableLock<T> {
    /// WaitChannel saying the protected state may have changed.
    waitchannel: Condvar,
    data: Mutex<T>,
}

pub struct SleepableLockGuard<'s, T> {
    lock: &'s SleepableLock<T>,
    guard: MutexGuard<'s, T>,
}

impl<T> SleepableLock<T> {
    /// Returns a new `SleepableLock` holding `data`.
    pub const fn new(data: T) -> Self {
        Self {
            waitchannel: Condvar::new(),
            data: Mutex::new(data),
        }
    }

    /// Acquires the lock and returns the lock guard.
    pub fn lock(&self) -> SleepableLockGuard<'_, T> {
        SleepableLockGuard {
            lock: self,
            guard: self.data.lock(),
        }
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

impl<T> SleepableLockGuard<'_, T> {
    /// Atomically releases the lock and suspends the caller until another
    /// holder calls [`wakeup`](Self::wakeup). The lock is reacquired before
    /// returning.
    pub fn sleep(&mut self) {
        self.lock.waitchannel.wait(&mut self.guard);
    }

    /// Wakes every sleeper on this lock's wait channel.
    pub fn wakeup(&self) {
        self.lock.waitchannel.notify_all();
    }

    /// Temporarily releases the lock and calls function `f`.
    /// After `f` returns, reacquires the lock and returns the result of the
    /// function call.
    pub fn reacquire_after<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce() -> U,
    {
        MutexGuard::unlocked(&mut self.guard, f)
    }
}

impl<T> Deref for SleepableLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for SleepableLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
