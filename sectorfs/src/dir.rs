//! Directories.
//!
//! A directory is an ordinary file whose inode carries the directory flag
//! and whose content is a dense array of fixed-size [`DirEntry`] slots.
//! Slots 0 and 1 are reserved for `.` and `..`, written at creation;
//! removal clears a slot's in-use flag and leaves it for reuse.
//!
//! Mutations (`add`, `remove`) run under the directory inode's structural
//! lock. Lookups run without it: they may race a concurrent writer but an
//! entry is a single slot, written through one buffer-cache lease.

use std::sync::Arc;

use arrayvec::ArrayString;
use dataview::PodMethods as _;
use sectorfs_types::{DIR_ENTRY_SIZE, DirEntry, NAME_MAX, SectorNo};

use crate::{error::Error, fs::FsCore, inode::Inode};

/// An open directory: an inode handle plus a read cursor.
pub struct Dir<D: crate::Device> {
    inode: Inode<D>,
    pos: usize,
}

impl<D: crate::Device> Dir<D> {
    /// Initializes a directory of `capacity` slots at `sector`, with `.`
    /// naming itself and `..` naming `parent`.
    pub(crate) fn create(
        core: &Arc<FsCore<D>>,
        sector: SectorNo,
        parent: SectorNo,
        capacity: usize,
    ) -> Result<(), Error> {
        Inode::create(core, sector, capacity * DIR_ENTRY_SIZE, true);
        let dir = Self::open(Inode::open(core, sector))?;
        dir.add(".", sector)?;
        dir.add("..", parent)?;
        Ok(())
    }

    /// Wraps an inode handle; fails unless it is a directory.
    pub fn open(inode: Inode<D>) -> Result<Self, Error> {
        if !inode.is_dir() {
            return Err(Error::NotADirectory);
        }
        Ok(Self { inode, pos: 0 })
    }

    pub fn inode(&self) -> &Inode<D> {
        &self.inode
    }

    /// A fresh handle on the same directory with a rewound cursor.
    pub fn reopen(&self) -> Self {
        Self {
            inode: self.inode.clone(),
            pos: 0,
        }
    }

    /// Reads the slot at byte `offset`; `None` past end of file.
    fn entry_at(&self, offset: usize) -> Option<DirEntry> {
        let mut entry = DirEntry::zeroed();
        (self.inode.read_at(entry.as_bytes_mut(), offset) == DIR_ENTRY_SIZE).then_some(entry)
    }

    fn find(&self, name: &str) -> Option<(DirEntry, usize)> {
        let mut offset = 0;
        while let Some(entry) = self.entry_at(offset) {
            if entry.in_use() && entry.is_name(name) {
                return Some((entry, offset));
            }
            offset += DIR_ENTRY_SIZE;
        }
        None
    }

    /// Looks up `name`, returning the home sector of its inode.
    pub fn lookup(&self, name: &str) -> Option<SectorNo> {
        self.find(name).map(|(entry, _)| entry.sector())
    }

    /// Inserts `name` → `sector`.
    ///
    /// Rejects empty names, names longer than [`NAME_MAX`], and names
    /// already present. The entry goes into the first unused slot, or into
    /// a new slot appended at end of file.
    pub fn add(&self, name: &str, sector: SectorNo) -> Result<(), Error> {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(Error::InvalidName);
        }

        let mut locked = self.inode.lock();
        if self.find(name).is_some() {
            return Err(Error::AlreadyExists);
        }

        // First unused slot. A short read can only mean end of file, which
        // is exactly where a fresh slot belongs.
        let mut offset = 0;
        while let Some(entry) = self.entry_at(offset) {
            if !entry.in_use() {
                break;
            }
            offset += DIR_ENTRY_SIZE;
        }

        let mut entry = DirEntry::zeroed();
        entry.set(name, sector);
        if locked.write_at(entry.as_bytes(), offset) != DIR_ENTRY_SIZE {
            return Err(Error::NoSpace);
        }
        Ok(())
    }

    /// Removes the entry for `name`.
    ///
    /// A directory must be empty to be removed. The target inode is marked
    /// removed; its storage is reclaimed when its last opener closes.
    pub fn remove(&self, name: &str) -> Result<(), Error> {
        if name == "." || name == ".." {
            return Err(Error::InvalidName);
        }

        let mut locked = self.inode.lock();
        let Some((entry, offset)) = self.find(name) else {
            return Err(Error::NotFound);
        };

        let target = Inode::open(self.inode.core(), entry.sector());
        if target.is_dir() && !inode_is_empty(&target) {
            return Err(Error::NotEmpty);
        }

        let mut cleared = entry;
        cleared.clear();
        if locked.write_at(cleared.as_bytes(), offset) != DIR_ENTRY_SIZE {
            return Err(Error::NoSpace);
        }
        target.mark_removed();
        Ok(())
    }

    /// Returns the next in-use entry name and advances the cursor. `.` and
    /// `..` are never reported. `None` signals the end of the directory.
    pub fn read_entry(&mut self) -> Option<ArrayString<NAME_MAX>> {
        if self.pos == 0 {
            self.pos = 2 * DIR_ENTRY_SIZE;
        }
        loop {
            let entry = self.entry_at(self.pos)?;
            self.pos += DIR_ENTRY_SIZE;
            if !entry.in_use() {
                continue;
            }
            let name = core::str::from_utf8(entry.name_bytes())
                .ok()
                .and_then(|name| ArrayString::from(name).ok());
            if let Some(name) = name {
                return Some(name);
            }
        }
    }

    /// Whether the directory holds no entries beyond `.` and `..`.
    pub fn is_empty(&self) -> bool {
        inode_is_empty(&self.inode)
    }
}

fn inode_is_empty<D: crate::Device>(inode: &Inode<D>) -> bool {
    // Slots 0 and 1 are the reserved entries.
    let mut offset = 2 * DIR_ENTRY_SIZE;
    loop {
        let mut entry = DirEntry::zeroed();
        if inode.read_at(entry.as_bytes_mut(), offset) != DIR_ENTRY_SIZE {
            return true;
        }
        if entry.in_use() {
            return false;
        }
        offset += DIR_ENTRY_SIZE;
    }
}
