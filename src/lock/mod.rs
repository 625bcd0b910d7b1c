//! The lock module.
//! Contains types that provide mutual exclusion.
//!
//! [`SleepableLock`] is a mutex whose guard doubles as a wait channel:
//! a holder may atomically release the lock and suspend until another
//! holder broadcasts a wakeup. [`SleepLock`] is a long-term lock whose
//! holder is a plain value rather than a guard, so it can be held across
//! blocking I/O and released on a different thread than the one that
//! acquired it.

mod sleepablelock;
mod sleeplock;

pub use sleepablelock::{SleepableLock, SleepableLockGuard};
pub use sleeplock::SleepLock;
