//! Inodes.
//!
//! An inode describes a single unnamed file or directory. The on-disk
//! record ([`sectorfs_types::DiskInode`]) occupies exactly one sector and
//! holds the length, the directory flag, and the sector-pointer index; the
//! sector it lives in is the inode's identity.
//!
//! For every distinct open on-disk inode the file system keeps exactly one
//! in-memory entry, found through a registry keyed by home sector. The
//! [`Inode`] handle is a reference to that entry:
//!
//! * opening a sector that is already open returns a handle to the same
//!   entry (observable through [`Inode::is_same`]),
//! * cloning a handle reopens it (the open count grows),
//! * dropping the last handle deregisters the entry and, if the inode was
//!   marked removed, returns every sector it owned to the free map.
//!
//! The record itself is never cached in memory: length and kind are read
//! through the buffer cache on every query, so concurrent extension by a
//! writer is visible to other handles immediately.
//!
//! Structural changes (block allocation, length extension, directory
//! mutations) serialize on the per-inode lock taken via [`Inode::lock`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use sectorfs_types::{DiskInode, MAX_FILE_SIZE, SectorNo};

use crate::fs::FsCore;

mod content;

/// Open-inode registry: home sector → shared entry.
pub(crate) type InodeTable = Mutex<HashMap<u32, Arc<InodeShared>>>;

pub(crate) struct InodeShared {
    sector: SectorNo,
    state: Mutex<OpenState>,
    /// Serializes structural changes to the inode's content.
    lock: Mutex<()>,
}

struct OpenState {
    open_count: u32,
    /// 0 means writes are permitted.
    deny_write_count: u32,
    /// Unlink is pending; storage is reclaimed on last close.
    removed: bool,
}

/// Handle to an open inode. Clone to reopen; drop to close.
pub struct Inode<D: crate::Device> {
    core: Arc<FsCore<D>>,
    shared: Arc<InodeShared>,
}

impl<D: crate::Device> Inode<D> {
    /// Initializes a fresh on-disk inode at `sector` with the given length,
    /// all pointers cleared. Data sectors are allocated lazily by writes.
    pub(crate) fn create(core: &Arc<FsCore<D>>, sector: SectorNo, length: usize, is_dir: bool) {
        assert!(length <= MAX_FILE_SIZE);
        let mut frame = core.cache.acquire(sector.value());
        frame.fill_zero();
        frame.data_mut::<DiskInode>().init(length, is_dir);
    }

    /// Opens the inode stored at `sector`, reusing the live entry if the
    /// sector is already open.
    pub(crate) fn open(core: &Arc<FsCore<D>>, sector: SectorNo) -> Self {
        let mut table = core.inodes.lock().unwrap();
        if let Some(shared) = table.get(&sector.value()) {
            shared.state.lock().unwrap().open_count += 1;
            return Self {
                core: Arc::clone(core),
                shared: Arc::clone(shared),
            };
        }

        let shared = Arc::new(InodeShared {
            sector,
            state: Mutex::new(OpenState {
                open_count: 1,
                deny_write_count: 0,
                removed: false,
            }),
            lock: Mutex::new(()),
        });
        table.insert(sector.value(), Arc::clone(&shared));
        Self {
            core: Arc::clone(core),
            shared,
        }
    }

    pub(crate) fn core(&self) -> &Arc<FsCore<D>> {
        &self.core
    }

    /// Home sector of the on-disk record.
    pub fn sector(&self) -> SectorNo {
        self.shared.sector
    }

    /// Whether two handles refer to the same open inode.
    pub fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Current file length in bytes, re-read from the on-disk record.
    pub fn length(&self) -> usize {
        self.with_disk(|d| d.length())
    }

    /// Whether the inode holds a directory, re-read from the on-disk record.
    pub fn is_dir(&self) -> bool {
        self.with_disk(|d| d.is_dir())
    }

    /// Marks the inode for deletion once the last handle closes.
    pub(crate) fn mark_removed(&self) {
        self.shared.state.lock().unwrap().removed = true;
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.shared.state.lock().unwrap().removed
    }

    /// Disables writes through any handle to this inode.
    ///
    /// May be called at most once per opener.
    pub fn deny_write(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.deny_write_count += 1;
        assert!(state.deny_write_count <= state.open_count);
    }

    /// Re-enables writes; pairs with one earlier [`Inode::deny_write`].
    pub fn allow_write(&self) {
        let mut state = self.shared.state.lock().unwrap();
        assert!(state.deny_write_count > 0);
        assert!(state.deny_write_count <= state.open_count);
        state.deny_write_count -= 1;
    }

    fn write_denied(&self) -> bool {
        self.shared.state.lock().unwrap().deny_write_count > 0
    }

    /// Takes the structural lock, enabling mutations of the inode content.
    pub fn lock(&self) -> LockedInode<'_, D> {
        LockedInode {
            inode: self,
            _guard: self.shared.lock.lock().unwrap(),
        }
    }

    /// Writes `buf` at `offset`, taking the structural lock for the call.
    pub fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        self.lock().write_at(buf, offset)
    }

    fn with_disk<R>(&self, f: impl FnOnce(&DiskInode) -> R) -> R {
        let frame = self.core.cache.acquire(self.shared.sector.value());
        f(frame.data::<DiskInode>())
    }

    fn update_disk<R>(&self, f: impl FnOnce(&mut DiskInode) -> R) -> R {
        let mut frame = self.core.cache.acquire(self.shared.sector.value());
        f(frame.data_mut::<DiskInode>())
    }
}

impl<D: crate::Device> Clone for Inode<D> {
    /// Reopens the inode: same entry, one more opener.
    fn clone(&self) -> Self {
        self.shared.state.lock().unwrap().open_count += 1;
        Self {
            core: Arc::clone(&self.core),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: crate::Device> Drop for Inode<D> {
    fn drop(&mut self) {
        let mut table = self.core.inodes.lock().unwrap();
        let mut state = self.shared.state.lock().unwrap();
        state.open_count -= 1;
        if state.open_count > 0 {
            return;
        }
        let removed = state.removed;
        drop(state);
        table.remove(&self.shared.sector.value());
        drop(table);

        if removed {
            self.release_sectors();
            self.core.free_map.release(self.shared.sector, 1);
        }
    }
}

/// An inode with its structural lock held.
pub struct LockedInode<'a, D: crate::Device> {
    inode: &'a Inode<D>,
    _guard: MutexGuard<'a, ()>,
}
