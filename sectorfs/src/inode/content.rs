//! Inode content: block mapping, reads, writes, and storage teardown.
//!
//! The first `DIRECT_COUNT` sector pointers live in the on-disk record
//! itself; the next `PTRS_PER_SECTOR` logical sectors go through the
//! singly-indirect index sector, and the rest through two index levels.
//! A zero pointer is a hole: reads of it yield zeros, writes allocate.

use sectorfs_types::{
    DIRECT_COUNT, DOUBLY_INDIRECT_SLOT, INDIRECT_SLOT, IndexSector, MAX_FILE_SIZE,
    PTRS_PER_SECTOR, SECTOR_SIZE, SectorNo,
};

use super::{Inode, LockedInode};

impl<D: crate::Device> Inode<D> {
    /// Maps the logical sector `index` to its physical sector.
    ///
    /// With `allocate`, missing data and index sectors are claimed from the
    /// free map, zero-filled, and recorded in their parent; without it a
    /// hole maps to `None`. Returns `None` on allocation failure.
    ///
    /// Callers that allocate must hold the structural lock.
    fn map_sector(&self, index: usize, allocate: bool) -> Option<SectorNo> {
        if index < DIRECT_COUNT {
            return self.map_slot(index, allocate);
        }

        let index = index - DIRECT_COUNT;
        if index < PTRS_PER_SECTOR {
            let indirect = self.map_slot(INDIRECT_SLOT, allocate)?;
            return self.map_index_entry(indirect, index, allocate);
        }

        let index = index - PTRS_PER_SECTOR;
        let outer = index / PTRS_PER_SECTOR;
        let inner = index % PTRS_PER_SECTOR;
        assert!(outer < PTRS_PER_SECTOR, "logical sector out of range");
        let doubly = self.map_slot(DOUBLY_INDIRECT_SLOT, allocate)?;
        let middle = self.map_index_entry(doubly, outer, allocate)?;
        self.map_index_entry(middle, inner, allocate)
    }

    /// Resolves one pointer slot of the on-disk record.
    fn map_slot(&self, slot: usize, allocate: bool) -> Option<SectorNo> {
        if let Some(sector) = self.with_disk(|d| d.ptr(slot)) {
            return Some(sector);
        }
        if !allocate {
            return None;
        }
        let sector = self.alloc_zeroed()?;
        self.update_disk(|d| d.set_ptr(slot, Some(sector)));
        Some(sector)
    }

    /// Resolves entry `entry` of the index sector at `index_sector`.
    fn map_index_entry(
        &self,
        index_sector: SectorNo,
        entry: usize,
        allocate: bool,
    ) -> Option<SectorNo> {
        {
            let frame = self.core.cache.acquire(index_sector.value());
            if let Some(sector) = frame.data::<IndexSector>().get(entry) {
                return Some(sector);
            }
        }
        if !allocate {
            return None;
        }
        let sector = self.alloc_zeroed()?;
        let mut frame = self.core.cache.acquire(index_sector.value());
        frame.data_mut::<IndexSector>().set(entry, Some(sector));
        Some(sector)
    }

    /// Claims a sector from the free map and zero-fills it through the cache.
    fn alloc_zeroed(&self) -> Option<SectorNo> {
        let sector = self.core.free_map.allocate(1)?;
        self.core.cache.acquire(sector.value()).fill_zero();
        Some(sector)
    }

    /// Reads up to `buf.len()` bytes at `offset` into `buf`, returning the
    /// number of bytes transferred. Reads stop at end of file; holes read
    /// as zeros.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let length = self.length();
        if offset >= length {
            return 0;
        }
        let n = usize::min(buf.len(), length - offset);

        let mut done = 0;
        while done < n {
            let pos = offset + done;
            let index = pos / SECTOR_SIZE;
            let sector_off = pos % SECTOR_SIZE;
            let chunk = usize::min(n - done, SECTOR_SIZE - sector_off);
            match self.map_sector(index, false) {
                Some(sector) => {
                    let frame = self.core.cache.acquire(sector.value());
                    buf[done..done + chunk]
                        .copy_from_slice(&frame.bytes()[sector_off..sector_off + chunk]);
                }
                // Hole: the block was never written.
                None => buf[done..done + chunk].fill(0),
            }
            done += chunk;
        }

        if done > 0 {
            self.request_read_ahead(offset + done, length);
        }
        done
    }

    /// Asks the cache to warm the sector after the last one touched, if the
    /// file extends that far.
    fn request_read_ahead(&self, end: usize, length: usize) {
        let next = (end - 1) / SECTOR_SIZE + 1;
        if next * SECTOR_SIZE >= length {
            return;
        }
        if let Some(sector) = self.map_sector(next, false) {
            self.core.cache.prefetch(sector.value());
        }
    }

    /// Releases every data and index sector of a removed inode back to the
    /// free map. Runs on last close; no other handle exists.
    pub(super) fn release_sectors(&self) {
        for slot in 0..DIRECT_COUNT {
            if let Some(sector) = self.with_disk(|d| d.ptr(slot)) {
                self.core.free_map.release(sector, 1);
            }
        }
        if let Some(indirect) = self.with_disk(|d| d.ptr(INDIRECT_SLOT)) {
            self.release_index(indirect, 0);
        }
        if let Some(doubly) = self.with_disk(|d| d.ptr(DOUBLY_INDIRECT_SLOT)) {
            self.release_index(doubly, 1);
        }
    }

    /// Frees an index sector and everything below it; `depth` is the number
    /// of further index levels beneath this one.
    fn release_index(&self, sector: SectorNo, depth: usize) {
        let children: Vec<SectorNo> = {
            let frame = self.core.cache.acquire(sector.value());
            frame.data::<IndexSector>().entries().collect()
        };
        for child in children {
            if depth == 0 {
                self.core.free_map.release(child, 1);
            } else {
                self.release_index(child, depth - 1);
            }
        }
        self.core.free_map.release(sector, 1);
    }
}

impl<D: crate::Device> LockedInode<'_, D> {
    /// Writes `buf` at `offset`, returning the number of bytes transferred.
    ///
    /// Returns 0 while writes are denied. Writing past the current length
    /// extends the file; writing past [`MAX_FILE_SIZE`] truncates the
    /// transfer. A failed sector allocation ends the transfer early with
    /// the bytes that made it.
    pub fn write_at(&mut self, buf: &[u8], offset: usize) -> usize {
        if self.inode.write_denied() {
            return 0;
        }
        if offset >= MAX_FILE_SIZE {
            return 0;
        }
        let n = usize::min(buf.len(), MAX_FILE_SIZE - offset);

        let mut done = 0;
        while done < n {
            let pos = offset + done;
            let index = pos / SECTOR_SIZE;
            let sector_off = pos % SECTOR_SIZE;
            let chunk = usize::min(n - done, SECTOR_SIZE - sector_off);
            let Some(sector) = self.inode.map_sector(index, true) else {
                break;
            };
            let mut frame = self.inode.core.cache.acquire(sector.value());
            frame.bytes_mut()[sector_off..sector_off + chunk]
                .copy_from_slice(&buf[done..done + chunk]);
            done += chunk;
        }

        let end = offset + done;
        if done > 0 && end > self.inode.length() {
            self.inode.update_disk(|d| d.set_length(end));
        }
        done
    }
}
