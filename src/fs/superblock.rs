use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::bio::Bcache;

/// Must be FSMAGIC
const FSMAGIC: u32 = 0x10203040;

/// Disk layout:
/// [ boot block | super block | log | inode blocks |
///                                          free bit map | data blocks]
///
/// The format tool computes the super block and builds an initial file
/// system. The super block describes the disk layout:
#[derive(Copy, Clone, Debug, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct Superblock {
    /// Must be FSMAGIC
    magic: u32,

    /// Size of file system image (blocks)
    pub size: u32,

    /// Number of data blocks
    pub nblocks: u32,

    /// Number of inodes
    pub ninodes: u32,

    /// Number of log blocks
    pub nlog: u32,

    /// Block number of first log block
    pub logstart: u32,

    /// Block number of first inode block
    pub inodestart: u32,

    /// Block number of first free map block
    pub bmapstart: u32,
}

impl Superblock {
    /// Builds the superblock for a freshly formatted image.
    pub fn new(
        size: u32,
        nblocks: u32,
        ninodes: u32,
        nlog: u32,
        logstart: u32,
        inodestart: u32,
        bmapstart: u32,
    ) -> Self {
        Self {
            magic: FSMAGIC,
            size,
            nblocks,
            ninodes,
            nlog,
            logstart,
            inodestart,
            bmapstart,
        }
    }

    /// Reads the super block from block 1.
    pub fn read(bcache: &Bcache) -> Self {
        let buf = bcache.read(1);
        let sb = Superblock::read_from_prefix(&buf.data()[..]).expect("superblock fits in a block");
        assert_eq!(sb.magic, FSMAGIC, "invalid file system");
        sb
    }
}
