//! Simple logging that allows concurrent FS operations.
//!
//! A log transaction contains the updates of multiple FS operations. The
//! logging system only commits when there are no FS operations active.
//! Thus there is never any reasoning required about whether a commit might
//! write an uncommitted operation's updates to disk.
//!
//! An operation should call begin_op()/end_op() to mark its start and end.
//! Usually begin_op() just increments the count of in-progress FS
//! operations and returns. But if it thinks the log is close to running
//! out, it sleeps until the last outstanding end_op() commits.
//!
//! The log is a physical re-do log containing disk blocks. The on-disk log
//! format:
//!   header block, containing block #s for block A, B, C, ...
//!   block A
//!   block B
//!   block C
//!   ...
//! Log appends are synchronous.

use std::mem;
use std::sync::Arc;

use arrayvec::ArrayVec;
use itertools::izip;
use static_assertions::const_assert;
use zerocopy::byteorder::{LittleEndian, I32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::bio::{Bcache, Buf, BufUnlocked};
use crate::fs::Superblock;
use crate::lock::SleepableLock;
use crate::param::{BSIZE, LOGSIZE, MAXOPBLOCKS};

pub struct Log {
    start: u32,
    size: u32,
    bcache: Arc<Bcache>,
    inner: SleepableLock<LogInner>,
}

struct LogInner {
    /// How many FS operations are executing?
    outstanding: u32,

    /// In commit(), please wait.
    committing: bool,

    /// Blocks enlisted by the open transaction group, used to keep track in
    /// memory of logged block #s before commit. Holding each handle keeps
    /// the block pinned in the cache until it is installed.
    bufs: ArrayVec<BufUnlocked, LOGSIZE>,
}

/// Contents of the header block, used for the on-disk header block.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct LogHeader {
    n: I32<LittleEndian>,
    block: [I32<LittleEndian>; LOGSIZE],
}

// `LogHeader` must fit in a block.
const_assert!(mem::size_of::<LogHeader>() < BSIZE);

impl Log {
    /// Initializes the log over the region `sb` describes and recovers any
    /// committed transaction a crash left behind. Runs once per device,
    /// before the log accepts operations.
    pub fn new(bcache: Arc<Bcache>, sb: &Superblock) -> Self {
        let log = Self {
            start: sb.logstart,
            size: sb.nlog,
            bcache,
            inner: SleepableLock::new(LogInner {
                outstanding: 0,
                committing: false,
                bufs: ArrayVec::new(),
            }),
        };
        log.recover_from_log();
        log
    }

    /// Reads the log header from disk.
    fn read_head(&self) -> ArrayVec<u32, LOGSIZE> {
        let buf = self.bcache.read(self.start);
        let lh = LogHeader::read_from_prefix(&buf.data()[..]).expect("header fits in a block");
        let n = lh.n.get();
        assert!(
            n >= 0 && n as usize <= LOGSIZE && (n as u32) < self.size,
            "log: corrupt header"
        );
        lh.block[..n as usize].iter().map(|b| b.get() as u32).collect()
    }

    /// Writes the in-memory log header to disk.
    /// This is the true point at which the current transaction commits.
    fn write_head(&self, bufs: &[BufUnlocked]) {
        let mut buf = self.bcache.read(self.start);
        let mut lh = LogHeader::read_from_prefix(&buf.data()[..]).expect("header fits in a block");
        lh.n = I32::new(bufs.len() as i32);
        for (db, b) in izip!(&mut lh.block, bufs) {
            *db = I32::new(b.blockno() as i32);
        }
        lh.write_to_prefix(&mut buf.data_mut()[..]).expect("header fits in a block");
        self.bcache.write(&buf);
    }

    fn recover_from_log(&self) {
        let blocks = self.read_head();
        if !blocks.is_empty() {
            tracing::info!(n = blocks.len(), "installing committed transaction from log");
        }

        // If committed, copy from log to disk. The previous boot pinned
        // nothing, so plain reads and writes suffice.
        for (tail, blockno) in blocks.iter().enumerate() {
            let lbuf = self.bcache.read(self.start + tail as u32 + 1);
            let mut dbuf = self.bcache.read(*blockno);
            dbuf.data_mut().copy_from(lbuf.data());
            self.bcache.write(&dbuf);
        }

        // Clear the log.
        self.write_head(&[]);
    }

    /// Called at the start of each FS operation.
    pub fn begin_op(&self) {
        let mut guard = self.inner.lock();
        loop {
            if guard.committing ||
            // This op might exhaust log space; wait for commit.
            guard.bufs.len() + (guard.outstanding as usize + 1) * MAXOPBLOCKS > LOGSIZE
            {
                guard.sleep();
            } else {
                guard.outstanding += 1;
                break;
            }
        }
    }

    /// Called at the end of each FS operation.
    /// Commits if this was the last outstanding operation.
    pub fn end_op(&self) {
        let mut guard = self.inner.lock();
        assert!(!guard.committing, "end_op: already committing");
        assert!(guard.outstanding > 0, "end_op: no outstanding operation");
        guard.outstanding -= 1;

        if guard.outstanding == 0 {
            // Since outstanding is 0, no ongoing transaction exists.
            // The lock is still held, so new transactions cannot start.
            guard.committing = true;
            // Committing is true, so new transactions cannot start even
            // after releasing the lock.
            let bufs = mem::take(&mut guard.bufs);

            // Call commit without holding the lock, since commit sleeps in
            // buffer and disk I/O.
            guard.reacquire_after(|| self.commit(bufs));
            guard.committing = false;
        }

        // begin_op() may be waiting for log space, and decrementing
        // outstanding has decreased the amount of reserved space.
        guard.wakeup();
    }

    /// Copies modified blocks from the cache to the log slots.
    fn write_log(&self, bufs: &[BufUnlocked]) {
        for (tail, from) in bufs.iter().enumerate() {
            // Log block.
            let mut to = self.bcache.read(self.start + tail as u32 + 1);
            // Cache block.
            let from = self.bcache.read(from.blockno());
            to.data_mut().copy_from(from.data());
            // Write the log.
            self.bcache.write(&to);
        }
    }

    /// Copies committed blocks from the log to their home location.
    fn install_trans(&self, bufs: &mut ArrayVec<BufUnlocked, LOGSIZE>) {
        for (tail, dbuf) in bufs.drain(..).enumerate() {
            // Read log block.
            let lbuf = self.bcache.read(self.start + tail as u32 + 1);
            // Read dst.
            let mut dbuf = dbuf.lock();
            // Copy block to dst.
            dbuf.data_mut().copy_from(lbuf.data());
            // Write dst to disk.
            self.bcache.write(&dbuf);
            // Dropping the handle unpins dst; the cache may recycle it now.
        }
    }

    fn commit(&self, mut bufs: ArrayVec<BufUnlocked, LOGSIZE>) {
        if bufs.is_empty() {
            return;
        }
        tracing::debug!(n = bufs.len(), "committing");

        // Write modified blocks from cache to log.
        self.write_log(&bufs);
        // Write header to disk -- the real commit.
        self.write_head(&bufs);
        // Now install writes to home locations.
        self.install_trans(&mut bufs);
        // Erase the transaction from the log.
        self.write_head(&bufs);
    }

    /// Caller has modified `b`'s data and is done with the buffer.
    /// Records the block number and pins the block in the cache by keeping
    /// its handle; commit will do the disk write.
    ///
    /// `Log::write` replaces [`Bcache::write`]; a typical use is:
    ///   let mut bp = bcache.read(...);
    ///   // modify bp.data_mut()
    ///   log.write(bp);
    pub fn write(&self, b: Buf) {
        let mut guard = self.inner.lock();
        assert!(
            !(guard.bufs.len() >= LOGSIZE || guard.bufs.len() as u32 >= self.size - 1),
            "too big a transaction"
        );
        assert!(guard.outstanding >= 1, "write outside of trans");

        // Log absorption: a block already enlisted keeps its slot, and the
        // buffer it arrived in is simply released.
        if guard.bufs.iter().all(|buf| buf.blockno() != b.blockno()) {
            // Add new block to log.
            guard.bufs.push(b.unlock());
        }
    }

    /// Starts a transaction, blocking until the log admits it.
    pub fn begin_tx(&self) -> Tx<'_> {
        self.begin_op();
        Tx { log: self }
    }
}

/// A transaction handle.
///
/// Dropping it ends the operation and, if it was the last one outstanding,
/// drives the group commit inline.
pub struct Tx<'s> {
    log: &'s Log,
}

impl Tx<'_> {
    /// Enlists a modified buffer in this transaction.
    pub fn write(&self, b: Buf) {
        self.log.write(b);
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        self.log.end_op();
    }
}
