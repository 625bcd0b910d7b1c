//! Crash-safe block logging for filesystem-style storage.
//!
//! `blklog` gives concurrent operations atomic multi-block updates over a
//! block device. Operations bracket their work with a transaction, read
//! and modify blocks through a shared buffer cache, and enlist each
//! modified buffer in the log. When the last operation of a batch ends,
//! the whole group commits: the blocks are staged in an on-disk log
//! region, a header write makes the group durable, and the blocks are then
//! installed to their home locations. After a crash, recovery replays any
//! committed group and discards anything else, so the device always
//! reflects all or none of every committed group.
//!
//! The crate is layered bottom-up:
//!   + [`disk`]: the block device seam, with file-backed and in-memory
//!     implementations.
//!   + [`bio`]: the buffer cache.
//!   + [`fs`]: the superblock view and the log itself.
//!
//! ```
//! use std::sync::Arc;
//! use blklog::{Bcache, Log, MemDisk, Superblock};
//!
//! let disk = Arc::new(MemDisk::new(64));
//! let bcache = Arc::new(Bcache::new(disk));
//! let sb = Superblock::new(64, 28, 0, 31, 2, 0, 0);
//! let log = Log::new(bcache.clone(), &sb);
//!
//! let tx = log.begin_tx();
//! let mut buf = bcache.read(40);
//! buf.data_mut().fill(0x2a);
//! tx.write(buf);
//! drop(tx); // last operation out commits the group
//! ```

pub mod bio;
pub mod disk;
pub mod fs;
pub mod lock;
pub mod param;

pub use bio::{Bcache, Buf, BufData, BufUnlocked};
pub use disk::{BlockDevice, DiskError, FileDisk, MemDisk};
pub use fs::{Log, Superblock, Tx};
