//! sectorfs: a hierarchical, block-addressed file system over a fixed-size
//! raw block device.
//!
//! Layers, bottom to top:
//!
//! * **Device**: a [`BlockDevice`] of 512-byte sectors ([`MemDisk`],
//!   [`FileDisk`], or anything else implementing the trait).
//! * **Buffer cache**: a fixed pool of sector frames with write-back,
//!   clock replacement, a read-ahead worker, and a periodic flush worker
//!   (the `block_cache` crate). The only path to the device.
//! * **Free map**: a bitmap allocator for sectors, persisted as a file.
//! * **Inodes**: UNIX-style indexed inodes with direct, singly-indirect,
//!   and doubly-indirect pointers; sparse files grow implicitly on write.
//! * **Directories**: name → inode-sector tables stored as regular files.
//! * **Paths and handles**: `/`-separated path resolution, [`File`] and
//!   [`Dir`] handles.
//!
//! ```
//! use sectorfs::{FileSys, MemDisk, Params};
//!
//! let fs = FileSys::format(MemDisk::new(4096), Params::default()).unwrap();
//! fs.create("/hello", 0).unwrap();
//! let mut file = fs.open("/hello").unwrap();
//! assert_eq!(file.write(b"hi"), 2);
//! let mut buf = [0; 2];
//! assert_eq!(file.read_at(&mut buf, 0), 2);
//! assert_eq!(&buf, b"hi");
//! ```

mod device;
mod dir;
mod error;
mod file;
mod free_map;
mod fs;
mod inode;
mod path;

pub use block_cache::BlockDevice;
pub use sectorfs_types::{
    DIR_ENTRY_SIZE, MAX_FILE_SIZE, NAME_MAX, ROOT_DIR_SECTOR, SECTOR_SIZE, SectorNo,
};

pub use self::{
    device::{FileDisk, MemDisk},
    dir::Dir,
    error::Error,
    file::File,
    fs::{FileSys, Params},
    inode::{Inode, LockedInode},
};

/// A sector-sized block device, as this file system consumes it.
pub trait Device: BlockDevice<SECTOR_SIZE> {}

impl<T: BlockDevice<SECTOR_SIZE>> Device for T {}
