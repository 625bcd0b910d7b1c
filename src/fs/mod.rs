//! File system support layers.
//!
//! Two layers live here:
//!   + Log: crash recovery for multi-step updates.
//!   + Superblock: the on-disk description of the disk layout.
//!
//! The layers above (block allocator, inodes, directories, names) belong to
//! the embedding file system; they drive the log by bracketing each
//! operation with a transaction and enlisting every modified buffer.

mod log;
mod superblock;

pub use log::{Log, Tx};
pub use superblock::Superblock;
