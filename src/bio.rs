//! Buffer cache.
//!
//! The buffer cache is a fixed pool of buffers holding cached copies of
//! disk block contents. Caching disk blocks in memory reduces the number
//! of disk reads and also provides a synchronization point for blocks used
//! by multiple threads.
//!
//! Interface:
//! * To get a buffer for a particular disk block, call [`Bcache::read`].
//! * After changing buffer data, call [`Bcache::write`] to write it to disk.
//! * When done with the buffer, drop it.
//! * [`Buf::unlock`] trades the locked buffer for a [`BufUnlocked`], which
//!   keeps the entry referenced without holding its lock. The cache never
//!   recycles a referenced entry, so holding a `BufUnlocked` pins the block
//!   in the cache.
//! * Only one thread at a time can use a buffer, so do not keep them longer
//!   than necessary.

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::disk::BlockDevice;
use crate::lock::SleepLock;
use crate::param::{BSIZE, NBUF};

/// Block contents.
#[derive(Clone, PartialEq, Eq)]
pub struct BufData([u8; BSIZE]);

impl BufData {
    /// Returns zero-filled block contents.
    pub const fn zeroed() -> Self {
        Self([0; BSIZE])
    }

    /// Copies `other`'s contents over self.
    pub fn copy_from(&mut self, other: &BufData) {
        self.0 = other.0;
    }
}

impl Deref for BufData {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl fmt::Debug for BufData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufData({:02x?}..)", &self.0[..8])
    }
}

/// No real block lives at this number; marks entries never assigned one.
const NOBLOCK: u32 = u32::MAX;

/// A cache entry.
///
/// `blockno` changes only under the pool lock while no handle to the entry
/// is outstanding, so it is stable for as long as a handle exists. `valid`
/// is cleared the same way and set while holding the buffer lock; the lock
/// hand-off orders the store before any later holder's load.
struct BufEntry {
    /// Block number of the cached copy.
    blockno: AtomicU32,
    /// Whether data has been read from disk.
    valid: AtomicBool,
    /// The block contents.
    data: SleepLock<BufData>,
}

/// The buffer cache for one block device.
pub struct Bcache {
    disk: Arc<dyn BlockDevice>,
    /// Pool of buffers, most recently used first.
    pool: Mutex<VecDeque<Arc<BufEntry>>>,
}

impl Bcache {
    /// Returns a cache of [`NBUF`] buffers over `disk`.
    pub fn new(disk: Arc<dyn BlockDevice>) -> Self {
        let pool = (0..NBUF)
            .map(|_| {
                Arc::new(BufEntry {
                    blockno: AtomicU32::new(NOBLOCK),
                    valid: AtomicBool::new(false),
                    data: SleepLock::new(BufData::zeroed()),
                })
            })
            .collect();
        Self {
            disk,
            pool: Mutex::new(pool),
        }
    }

    /// Looks through the cache for block `blockno`. If not found, recycles
    /// the least recently used unreferenced buffer. In either case, returns
    /// the referenced entry, moved to the front of the pool.
    fn bget(&self, blockno: u32) -> Arc<BufEntry> {
        let mut pool = self.pool.lock();

        // Is the block already cached?
        if let Some(pos) = pool
            .iter()
            .position(|e| e.blockno.load(Ordering::Relaxed) == blockno)
        {
            let entry = Arc::clone(&pool[pos]);
            pool.remove(pos);
            pool.push_front(Arc::clone(&entry));
            return entry;
        }

        // Not cached; recycle the least recently used buffer nobody holds.
        if let Some(pos) = pool.iter().rposition(|e| Arc::strong_count(e) == 1) {
            let entry = Arc::clone(&pool[pos]);
            entry.blockno.store(blockno, Ordering::Relaxed);
            entry.valid.store(false, Ordering::Relaxed);
            pool.remove(pos);
            pool.push_front(Arc::clone(&entry));
            return entry;
        }

        panic!("bget: no buffers");
    }

    /// Returns a locked buffer with the contents of block `blockno`.
    pub fn read(&self, blockno: u32) -> Buf {
        let entry = self.bget(blockno);
        entry.data.acquire();
        let mut buf = Buf { entry };
        if !buf.entry.valid.load(Ordering::Relaxed) {
            self.disk.read_block(blockno, buf.data_mut());
            buf.entry.valid.store(true, Ordering::Relaxed);
        }
        buf
    }

    /// Writes `buf`'s contents through to the device. Durable on return.
    pub fn write(&self, buf: &Buf) {
        self.disk.write_block(buf.blockno(), buf.data());
    }
}

/// A locked, referenced buffer.
///
/// Holding a `Buf` gives exclusive access to the block contents. Dropping
/// it releases the buffer.
pub struct Buf {
    entry: Arc<BufEntry>,
}

impl Buf {
    /// The block number this buffer caches.
    pub fn blockno(&self) -> u32 {
        self.entry.blockno.load(Ordering::Relaxed)
    }

    /// The block contents.
    pub fn data(&self) -> &BufData {
        // SAFETY: self holds the entry's sleep lock.
        unsafe { &*self.entry.data.get_mut_raw() }
    }

    /// The block contents, mutably.
    pub fn data_mut(&mut self) -> &mut BufData {
        // SAFETY: self holds the entry's sleep lock, and `&mut self` is
        // exclusive.
        unsafe { &mut *self.entry.data.get_mut_raw() }
    }

    /// Releases the buffer lock but keeps the entry referenced, so the
    /// cache cannot recycle it.
    pub fn unlock(self) -> BufUnlocked {
        self.entry.data.release();
        // SAFETY: `self` is forgotten below, so the reference moves into
        // the returned handle without touching the count and without a
        // second release from `drop`.
        let entry = unsafe { ptr::read(&self.entry) };
        mem::forget(self);
        BufUnlocked { entry }
    }
}

impl Drop for Buf {
    fn drop(&mut self) {
        self.entry.data.release();
    }
}

/// An unlocked but still referenced buffer.
///
/// The cache cannot recycle the entry while this exists, so the cached
/// copy of the block stays resident.
pub struct BufUnlocked {
    entry: Arc<BufEntry>,
}

impl BufUnlocked {
    /// The block number this buffer caches.
    pub fn blockno(&self) -> u32 {
        self.entry.blockno.load(Ordering::Relaxed)
    }

    /// Reacquires the buffer lock.
    pub fn lock(self) -> Buf {
        self.entry.data.acquire();
        Buf { entry: self.entry }
    }
}
