//! On-disk data types for the sectorfs file system.
//!
//! The persistent layout:
//!
//! | sector                | content                                    | type         |
//! |-----------------------|--------------------------------------------|--------------|
//! | 0                     | free-map file inode                        | [`DiskInode`] |
//! | 1                     | root directory inode                       | [`DiskInode`] |
//! | allocated on demand   | file data, directory tables, index sectors | `[u8; SECTOR_SIZE]`, [`DirEntry`] array, [`IndexSector`] |
//!
//! Every inode occupies exactly one sector. Sector pointers are stored as
//! little-endian `u32`; the value 0 marks an unallocated block (sector 0 can
//! never be the target of a data pointer), so sparse files are represented by
//! zeroed pointers.

#![cfg_attr(not(test), no_std)]

use core::fmt;

use dataview::Pod;

/// Unit of device I/O, in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Number of direct sector pointers in an inode.
pub const DIRECT_COUNT: usize = 124;

/// Number of sector pointers held by one index sector.
pub const PTRS_PER_SECTOR: usize = 125;

/// Pointer slot holding the singly-indirect index sector.
pub const INDIRECT_SLOT: usize = DIRECT_COUNT;

/// Pointer slot holding the doubly-indirect index sector.
pub const DOUBLY_INDIRECT_SLOT: usize = DIRECT_COUNT + 1;

/// Total pointer slots in an on-disk inode.
pub const PTR_COUNT: usize = DIRECT_COUNT + 2;

/// Largest number of data sectors a single inode can address.
pub const MAX_FILE_SECTORS: usize =
    DIRECT_COUNT + PTRS_PER_SECTOR + PTRS_PER_SECTOR * PTRS_PER_SECTOR;

/// Hard cap on a file's byte length.
pub const MAX_FILE_SIZE: usize = MAX_FILE_SECTORS * SECTOR_SIZE;
const _: () = const { assert!(MAX_FILE_SIZE == 8_127_488) };

/// Longest directory entry name, in bytes.
pub const NAME_MAX: usize = 14;

/// Home sector of the free-map file inode.
pub const FREE_MAP_SECTOR: SectorNo = SectorNo::new(0);

/// Home sector of the root directory inode.
pub const ROOT_DIR_SECTOR: SectorNo = SectorNo::new(1);

/// Device sector number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Pod)]
#[repr(transparent)]
pub struct SectorNo(u32);

impl fmt::Display for SectorNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SectorNo {
    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    fn from_raw(raw: u32) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    fn to_raw(this: Option<Self>) -> u32 {
        this.map_or(0, |s| {
            assert_ne!(s.0, 0);
            s.0
        })
    }
}

/// On-disk inode record. Exactly one sector.
///
/// `sectors[0..DIRECT_COUNT]` point at data sectors; the next slot points at
/// the singly-indirect index sector, the last at the doubly-indirect one.
#[derive(Pod)]
#[repr(C)]
pub struct DiskInode {
    /// File length in bytes, non-negative.
    length: i32,
    is_dir: u8,
    _pad: [u8; 3],
    sectors: [u32; PTR_COUNT],
}
const _: () = const { assert!(size_of::<DiskInode>() == SECTOR_SIZE) };

impl DiskInode {
    /// Resets the record to a fresh inode of the given length and kind with
    /// every pointer cleared.
    pub fn init(&mut self, length: usize, is_dir: bool) {
        self.set_length(length);
        self.is_dir = u8::from(is_dir);
        self._pad = [0; 3];
        self.sectors = [0; PTR_COUNT];
    }

    #[must_use]
    pub fn length(&self) -> usize {
        usize::try_from(self.length).unwrap()
    }

    pub fn set_length(&mut self, length: usize) {
        assert!(length <= MAX_FILE_SIZE);
        self.length = i32::try_from(length).unwrap();
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    #[must_use]
    pub fn ptr(&self, slot: usize) -> Option<SectorNo> {
        SectorNo::from_raw(self.sectors[slot])
    }

    pub fn set_ptr(&mut self, slot: usize, sector: Option<SectorNo>) {
        self.sectors[slot] = SectorNo::to_raw(sector);
    }
}

/// One level of the indirect pointer tree. Exactly one sector.
#[derive(Pod)]
#[repr(C)]
pub struct IndexSector {
    ptrs: [u32; PTRS_PER_SECTOR],
    _pad: [u8; SECTOR_SIZE - 4 * PTRS_PER_SECTOR],
}
const _: () = const { assert!(size_of::<IndexSector>() == SECTOR_SIZE) };

impl IndexSector {
    #[must_use]
    pub fn get(&self, i: usize) -> Option<SectorNo> {
        SectorNo::from_raw(self.ptrs[i])
    }

    pub fn set(&mut self, i: usize, sector: Option<SectorNo>) {
        self.ptrs[i] = SectorNo::to_raw(sector);
    }

    /// All allocated pointers in slot order.
    pub fn entries(&self) -> impl Iterator<Item = SectorNo> + '_ {
        self.ptrs.iter().filter_map(|&raw| SectorNo::from_raw(raw))
    }
}

/// One directory table slot: an in-use flag, a NUL-terminated name, and the
/// home sector of the named inode.
#[derive(Debug, Pod)]
#[repr(C)]
pub struct DirEntry {
    in_use: u8,
    name: [u8; NAME_MAX + 1],
    inode_sector: u32,
}
const _: () = const { assert!(size_of::<DirEntry>() == 20) };

/// Byte size of one directory table slot.
pub const DIR_ENTRY_SIZE: usize = size_of::<DirEntry>();

impl DirEntry {
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.in_use != 0
    }

    #[must_use]
    pub fn sector(&self) -> SectorNo {
        SectorNo::new(self.inode_sector)
    }

    /// Name bytes up to the terminator.
    #[must_use]
    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(NAME_MAX);
        &self.name[..len]
    }

    #[must_use]
    pub fn is_name(&self, name: &str) -> bool {
        self.name_bytes() == name.as_bytes()
    }

    /// Fills the slot with `name` → `sector` and marks it in use.
    pub fn set(&mut self, name: &str, sector: SectorNo) {
        assert!(!name.is_empty() && name.len() <= NAME_MAX);
        self.in_use = 1;
        self.name[..name.len()].copy_from_slice(name.as_bytes());
        self.name[name.len()..].fill(0);
        self.inode_sector = sector.value();
    }

    /// Marks the slot unused; the slot itself stays in place.
    pub fn clear(&mut self) {
        self.in_use = 0;
    }
}
