//! Block devices.
//!
//! [`BlockDevice`] is the seam between the buffer cache and whatever
//! actually stores blocks. The log's commit protocol depends on one
//! property of this seam: a write is durable when `write_block` returns.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

use crate::bio::BufData;
use crate::param::BSIZE;

/// A block-addressable storage device.
pub trait BlockDevice: Send + Sync {
    /// Reads block `blockno` into `data`.
    fn read_block(&self, blockno: u32, data: &mut BufData);

    /// Writes `data` to block `blockno`. The write must be durable when
    /// this returns.
    fn write_block(&self, blockno: u32, data: &BufData);
}

/// Errors opening or creating a disk image.
#[derive(Debug, Error)]
pub enum DiskError {
    #[error("disk image {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("disk image {} is {len} bytes, not a multiple of the block size", .path.display())]
    Misaligned { path: PathBuf, len: u64 },
}

/// A disk image file.
///
/// Every write is followed by `fdatasync`, so `write_block` is durable on
/// return. Runtime I/O failure is fatal: a half-finished commit cannot be
/// reported to callers, and recovery at the next open handles whatever
/// state the device was left in.
pub struct FileDisk {
    file: File,
    nblocks: u32,
}

impl FileDisk {
    /// Opens an existing disk image.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DiskError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| DiskError::Io {
                path: path.to_owned(),
                source,
            })?;
        let len = file
            .metadata()
            .map_err(|source| DiskError::Io {
                path: path.to_owned(),
                source,
            })?
            .len();
        if len % BSIZE as u64 != 0 {
            return Err(DiskError::Misaligned {
                path: path.to_owned(),
                len,
            });
        }
        Ok(Self {
            file,
            nblocks: (len / BSIZE as u64) as u32,
        })
    }

    /// Creates a zero-filled disk image of `nblocks` blocks, truncating any
    /// existing file at `path`.
    pub fn create(path: impl AsRef<Path>, nblocks: u32) -> Result<Self, DiskError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| DiskError::Io {
                path: path.to_owned(),
                source,
            })?;
        file.set_len(nblocks as u64 * BSIZE as u64)
            .map_err(|source| DiskError::Io {
                path: path.to_owned(),
                source,
            })?;
        Ok(Self { file, nblocks })
    }

    /// Number of blocks in the image.
    pub fn nblocks(&self) -> u32 {
        self.nblocks
    }
}

impl BlockDevice for FileDisk {
    fn read_block(&self, blockno: u32, data: &mut BufData) {
        assert!(blockno < self.nblocks, "read_block: block {blockno} out of range");
        let off = blockno as u64 * BSIZE as u64;
        if let Err(err) = self.file.read_exact_at(&mut data[..], off) {
            panic!("disk: read block {blockno}: {err}");
        }
    }

    fn write_block(&self, blockno: u32, data: &BufData) {
        assert!(blockno < self.nblocks, "write_block: block {blockno} out of range");
        let off = blockno as u64 * BSIZE as u64;
        if let Err(err) = self
            .file
            .write_all_at(&data[..], off)
            .and_then(|()| self.file.sync_data())
        {
            panic!("disk: write block {blockno}: {err}");
        }
    }
}

/// An in-memory block device, for tests and embedding.
pub struct MemDisk {
    blocks: Mutex<Vec<BufData>>,
}

impl MemDisk {
    /// Returns a zero-filled device of `nblocks` blocks.
    pub fn new(nblocks: u32) -> Self {
        Self {
            blocks: Mutex::new(vec![BufData::zeroed(); nblocks as usize]),
        }
    }

    /// Returns a device holding `blocks`.
    pub fn from_blocks(blocks: Vec<BufData>) -> Self {
        Self {
            blocks: Mutex::new(blocks),
        }
    }

    /// Copies out the entire device contents.
    pub fn snapshot(&self) -> Vec<BufData> {
        self.blocks.lock().clone()
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, blockno: u32, data: &mut BufData) {
        let blocks = self.blocks.lock();
        assert!((blockno as usize) < blocks.len(), "read_block: block {blockno} out of range");
        data.copy_from(&blocks[blockno as usize]);
    }

    fn write_block(&self, blockno: u32, data: &BufData) {
        let mut blocks = self.blocks.lock();
        assert!((blockno as usize) < blocks.len(), "write_block: block {blockno} out of range");
        blocks[blockno as usize].copy_from(data);
    }
}
