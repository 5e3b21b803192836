//! A minimal block-based filesystem engine over a fixed 1 MiB disk image.
//!
//! The image is a flat array of 2048 blocks of 512 bytes each. Block 0 holds
//! the root directory, block 1 the free bitmap; everything else is allocated
//! on demand for directories, file inodes, and file data.

mod alloc;
mod fs;
mod io;
mod layout;
mod path;

pub use crate::fs::{EntryKind, MfsError, MFS};
pub use crate::io::{BlockNumber, BlockStorage, FileBlockDevice, FileBlockDeviceBuilder};
pub use crate::layout::{DirEntry, Directory, Inode};

/// Size of one block in bytes, the smallest allocation granularity.
pub const BLOCK_SIZE: usize = 512;
/// Total size of a backing image in bytes.
pub const DISK_SIZE: usize = 1 << 20;
/// Number of addressable blocks in an image.
pub const NUM_BLOCKS: usize = DISK_SIZE / BLOCK_SIZE;

/// Width of every on-disk name field: 27 usable bytes plus a NUL.
pub const NAME_LEN: usize = 28;
/// Entry slots per directory block, `.` and `..` included.
pub const DIR_CAPACITY: usize = 14;
/// Data-block reference slots per inode.
pub const INODE_SLOTS: usize = 119;
/// Content bytes per data block.
pub const DATA_CAPACITY: usize = 508;
/// Largest file the inode's direct slots can address.
pub const MAX_FILE_SIZE: usize = INODE_SLOTS * DATA_CAPACITY;

/// An in-memory copy of one disk block.
pub type Block = [u8; BLOCK_SIZE];
