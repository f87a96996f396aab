//! Mount, format, and path-level entry points.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use block_cache::{BlockCache, Workers};
use sectorfs_types::{ROOT_DIR_SECTOR, SECTOR_SIZE};

use crate::{
    dir::Dir,
    error::Error,
    file::File,
    free_map::{self, FreeMap},
    inode::{Inode, InodeTable},
    path,
};

/// Slots in a freshly created directory. Directories grow past this on
/// demand.
const DIR_CAPACITY: usize = 16;

/// Mount-time tunables.
#[derive(Debug, Clone)]
pub struct Params {
    /// Frames in the buffer cache.
    pub cache_frames: usize,
    /// Write-back worker period.
    pub write_interval: Duration,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            cache_frames: 64,
            write_interval: Duration::from_millis(100),
        }
    }
}

/// State shared by every handle of one mounted file system.
pub(crate) struct FsCore<D> {
    pub(crate) cache: Arc<BlockCache<D, SECTOR_SIZE>>,
    pub(crate) free_map: FreeMap,
    pub(crate) inodes: InodeTable,
}

/// A mounted file system.
///
/// Dropping it (or calling [`FileSys::close`]) persists the free map,
/// flushes every dirty frame, and stops the background workers.
pub struct FileSys<D: crate::Device> {
    core: Arc<FsCore<D>>,
    workers: Option<Workers>,
}

impl<D: crate::Device> FileSys<D> {
    /// Writes an empty file system onto `device` and mounts it.
    pub fn format(device: D, params: Params) -> Result<Self, Error> {
        let fs = Self::start(device, params);
        fs.core.free_map.mark_used(sectorfs_types::FREE_MAP_SECTOR);
        fs.core.free_map.mark_used(ROOT_DIR_SECTOR);
        Dir::create(&fs.core, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR, DIR_CAPACITY)?;
        free_map::create(&fs.core);
        Ok(fs)
    }

    /// Mounts an already formatted device.
    pub fn mount(device: D, params: Params) -> Self {
        let fs = Self::start(device, params);
        free_map::load(&fs.core);
        fs
    }

    fn start(device: D, params: Params) -> Self {
        let sectors = device.sector_count();
        let cache = Arc::new(BlockCache::new(device, params.cache_frames));
        let workers = BlockCache::spawn_workers(&cache, params.write_interval);
        Self {
            core: Arc::new(FsCore {
                cache,
                free_map: FreeMap::new(sectors),
                inodes: Mutex::new(HashMap::new()),
            }),
            workers: Some(workers),
        }
    }

    /// The root directory.
    pub fn root(&self) -> Dir<D> {
        Dir::open(Inode::open(&self.core, ROOT_DIR_SECTOR)).unwrap()
    }

    /// Creates a file of `initial_size` bytes (its blocks are allocated on
    /// first write, not here).
    pub fn create(&self, path: &str, initial_size: usize) -> Result<(), Error> {
        self.create_impl(None, path, initial_size)
    }

    /// [`FileSys::create`] with relative paths resolved against `cwd`.
    pub fn create_at(&self, cwd: &Dir<D>, path: &str, initial_size: usize) -> Result<(), Error> {
        self.create_impl(Some(cwd), path, initial_size)
    }

    fn create_impl(
        &self,
        cwd: Option<&Dir<D>>,
        path: &str,
        initial_size: usize,
    ) -> Result<(), Error> {
        let (dir, name) = path::resolve_parent(&self.core, cwd, path)?;
        let sector = self.core.free_map.allocate(1).ok_or(Error::NoSpace)?;
        Inode::create(&self.core, sector, initial_size, false);
        if let Err(err) = dir.add(&name, sector) {
            self.core.free_map.release(sector, 1);
            return Err(err);
        }
        Ok(())
    }

    /// Creates an empty directory.
    pub fn create_dir(&self, path: &str) -> Result<(), Error> {
        self.create_dir_impl(None, path)
    }

    /// [`FileSys::create_dir`] with relative paths resolved against `cwd`.
    pub fn create_dir_at(&self, cwd: &Dir<D>, path: &str) -> Result<(), Error> {
        self.create_dir_impl(Some(cwd), path)
    }

    fn create_dir_impl(&self, cwd: Option<&Dir<D>>, path: &str) -> Result<(), Error> {
        let (dir, name) = path::resolve_parent(&self.core, cwd, path)?;
        let sector = self.core.free_map.allocate(1).ok_or(Error::NoSpace)?;
        let result = Dir::create(&self.core, sector, dir.inode().sector(), DIR_CAPACITY)
            .and_then(|()| dir.add(&name, sector));
        if let Err(err) = result {
            // Reclaim the half-built directory with its slots.
            let child = Inode::open(&self.core, sector);
            child.mark_removed();
            return Err(err);
        }
        Ok(())
    }

    /// Opens the file or directory at `path`.
    ///
    /// A trailing `/` requires the object to be a directory.
    pub fn open(&self, path: &str) -> Result<File<D>, Error> {
        self.open_impl(None, path)
    }

    /// [`FileSys::open`] with relative paths resolved against `cwd`.
    pub fn open_at(&self, cwd: &Dir<D>, path: &str) -> Result<File<D>, Error> {
        self.open_impl(Some(cwd), path)
    }

    fn open_impl(&self, cwd: Option<&Dir<D>>, path: &str) -> Result<File<D>, Error> {
        let inode = path::resolve(&self.core, cwd, path)?;
        if path.len() > 1 && path.ends_with('/') && !inode.is_dir() {
            return Err(Error::NotADirectory);
        }
        Ok(File::new(inode))
    }

    /// Opens the directory at `path`.
    pub fn open_dir(&self, path: &str) -> Result<Dir<D>, Error> {
        Dir::open(path::resolve(&self.core, None, path)?)
    }

    /// [`FileSys::open_dir`] with relative paths resolved against `cwd`.
    pub fn open_dir_at(&self, cwd: &Dir<D>, path: &str) -> Result<Dir<D>, Error> {
        Dir::open(path::resolve(&self.core, Some(cwd), path)?)
    }

    /// Removes the file or empty directory at `path`. Storage is reclaimed
    /// once the last open handle closes.
    pub fn remove(&self, path: &str) -> Result<(), Error> {
        self.remove_impl(None, path)
    }

    /// [`FileSys::remove`] with relative paths resolved against `cwd`.
    pub fn remove_at(&self, cwd: &Dir<D>, path: &str) -> Result<(), Error> {
        self.remove_impl(Some(cwd), path)
    }

    fn remove_impl(&self, cwd: Option<&Dir<D>>, path: &str) -> Result<(), Error> {
        let (dir, name) = path::resolve_parent(&self.core, cwd, path)?;
        dir.remove(&name)
    }

    /// Writes every dirty frame to the device now.
    pub fn sync(&self) {
        self.core.cache.flush_all_dirty();
    }

    /// Frames whose payload has not reached the device yet.
    pub fn dirty_frames(&self) -> usize {
        self.core.cache.dirty_count()
    }

    /// Currently unallocated sectors.
    pub fn free_sectors(&self) -> usize {
        self.core.free_map.free_count()
    }

    /// Unmounts: persists the free map, flushes the cache, stops the
    /// workers. Also performed on drop.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(workers) = self.workers.take() else {
            return;
        };
        free_map::store(&self.core);
        self.core.cache.flush_all_dirty();
        self.core.cache.shutdown();
        workers.join();
    }
}

impl<D: crate::Device> Drop for FileSys<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
