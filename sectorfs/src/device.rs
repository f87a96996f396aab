//! Block device implementations.
//!
//! Per the fatal-error contract of the cache layer, unrecoverable host I/O
//! failures abort instead of propagating.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read as _, Seek as _, SeekFrom, Write as _},
    path::Path,
    sync::{Arc, Mutex},
};

use block_cache::BlockDevice;
use sectorfs_types::SECTOR_SIZE;

/// In-memory disk image.
///
/// Clones share the backing storage, so a handle kept outside the file
/// system can inspect device state or remount the same image later.
#[derive(Clone)]
pub struct MemDisk {
    data: Arc<Mutex<Box<[u8]>>>,
    sectors: u32,
}

impl MemDisk {
    /// Creates a zero-filled image of `sectors` sectors.
    #[must_use]
    pub fn new(sectors: u32) -> Self {
        Self {
            data: Arc::new(Mutex::new(
                vec![0; sectors as usize * SECTOR_SIZE].into_boxed_slice(),
            )),
            sectors,
        }
    }
}

impl BlockDevice<SECTOR_SIZE> for MemDisk {
    fn sector_count(&self) -> u32 {
        self.sectors
    }

    fn read(&self, sector: u32, data: &mut [u8; SECTOR_SIZE]) {
        let image = self.data.lock().unwrap();
        let offset = sector as usize * SECTOR_SIZE;
        data.copy_from_slice(&image[offset..offset + SECTOR_SIZE]);
    }

    fn write(&self, sector: u32, data: &[u8; SECTOR_SIZE]) {
        let mut image = self.data.lock().unwrap();
        let offset = sector as usize * SECTOR_SIZE;
        image[offset..offset + SECTOR_SIZE].copy_from_slice(data);
    }
}

/// Disk image stored in a host file.
pub struct FileDisk {
    file: Mutex<File>,
    sectors: u32,
}

impl FileDisk {
    /// Creates (or truncates) an image file of `sectors` sectors.
    pub fn create(path: impl AsRef<Path>, sectors: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(u64::from(sectors) * SECTOR_SIZE as u64)?;
        Ok(Self {
            file: Mutex::new(file),
            sectors,
        })
    }

    /// Opens an existing image file; its length determines the sector count.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let sectors = u32::try_from(len / SECTOR_SIZE as u64)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "image too large"))?;
        Ok(Self {
            file: Mutex::new(file),
            sectors,
        })
    }
}

impl BlockDevice<SECTOR_SIZE> for FileDisk {
    fn sector_count(&self) -> u32 {
        self.sectors
    }

    fn read(&self, sector: u32, data: &mut [u8; SECTOR_SIZE]) {
        assert!(sector < self.sectors);
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(u64::from(sector) * SECTOR_SIZE as u64))
            .and_then(|_| file.read_exact(data))
            .expect("disk read failed");
    }

    fn write(&self, sector: u32, data: &[u8; SECTOR_SIZE]) {
        assert!(sector < self.sectors);
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(u64::from(sector) * SECTOR_SIZE as u64))
            .and_then(|_| file.write_all(data))
            .expect("disk write failed");
    }
}
