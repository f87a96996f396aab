//! Write-back buffer cache for sector-addressed block devices.
//!
//! The cache owns a fixed pool of sector-sized frames and is the only path
//! to the device. Clients take short exclusive leases on frames through
//! [`BlockCache::acquire`]; modifications are deferred to disk until the
//! frame is evicted, flushed explicitly, or picked up by the periodic
//! write-back worker. Eviction uses a clock (second-chance) scan over the
//! pool in release order.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use dataview::{Pod, PodMethods as _};

/// A device made of fixed-size sectors.
///
/// Device I/O failure is unrecoverable at this layer: implementations abort
/// (panic) instead of surfacing errors to the cache.
pub trait BlockDevice<const SECTOR_SIZE: usize>: Send + Sync + 'static {
    /// Number of sectors on the device.
    fn sector_count(&self) -> u32;

    /// Reads sector `sector` into `data`.
    fn read(&self, sector: u32, data: &mut [u8; SECTOR_SIZE]);

    /// Writes `data` to sector `sector`.
    fn write(&self, sector: u32, data: &[u8; SECTOR_SIZE]);
}

/// Bookkeeping for one frame. The payload lives in `BlockCache::slots` so a
/// lease holder can touch it without the pool lock.
struct Frame {
    /// Bound sector, or `None` while the frame is unused.
    sector: Option<u32>,
    /// Payload differs from the device.
    dirty: bool,
    /// Clock reference bit.
    accessed: bool,
    /// Leased out; not evictable, payload owned by the lease holder.
    busy: bool,
}

struct CacheState {
    frames: Box<[Frame]>,
    /// Eviction scan order; released frames move to the back.
    order: VecDeque<usize>,
    /// One-slot read-ahead mailbox. A new request overwrites an unconsumed
    /// one, so at most one prefetch is ever outstanding.
    prefetch_pending: Option<u32>,
    shutdown: bool,
}

/// A fixed pool of sector buffers in front of a [`BlockDevice`].
pub struct BlockCache<D, const SECTOR_SIZE: usize> {
    device: D,
    slots: Box<[Mutex<Box<[u8; SECTOR_SIZE]>>]>,
    state: Mutex<CacheState>,
    cond: Condvar,
}

impl<D, const SECTOR_SIZE: usize> BlockCache<D, SECTOR_SIZE>
where
    D: BlockDevice<SECTOR_SIZE>,
{
    /// Creates a cache of `num_frames` frames over `device`.
    ///
    /// # Panics
    ///
    /// Panics if `num_frames` is 0.
    pub fn new(device: D, num_frames: usize) -> Self {
        assert!(num_frames > 0);
        let frames = (0..num_frames)
            .map(|_| Frame {
                sector: None,
                dirty: false,
                accessed: false,
                busy: false,
            })
            .collect();
        let slots = (0..num_frames)
            .map(|_| Mutex::new(Box::new([0; SECTOR_SIZE])))
            .collect();
        Self {
            device,
            slots,
            state: Mutex::new(CacheState {
                frames,
                order: (0..num_frames).collect(),
                prefetch_pending: None,
                shutdown: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Leases the frame bound to `sector`, binding one if necessary.
    ///
    /// If the sector is resident but leased out, waits for release. On a
    /// miss a victim is chosen by the clock scan, flushed if dirty, and
    /// refilled from the device; if every frame is leased out, waits until
    /// one is released.
    pub fn acquire(&self, sector: u32) -> FrameGuard<'_, D, SECTOR_SIZE> {
        debug_assert!(sector < self.device.sector_count());
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(index) = state.frames.iter().position(|f| f.sector == Some(sector)) {
                if state.frames[index].busy {
                    state = self.cond.wait(state).unwrap();
                    continue;
                }
                let frame = &mut state.frames[index];
                frame.busy = true;
                frame.accessed = true;
                return self.lease(index, sector, state);
            }

            let Some(index) = Self::pick_victim(&mut state) else {
                state = self.cond.wait(state).unwrap();
                continue;
            };

            let frame = &mut state.frames[index];
            let evicted = frame.sector.replace(sector);
            let flush = if frame.dirty { evicted } else { None };
            frame.dirty = false;
            frame.busy = true;
            frame.accessed = true;

            // Fill the frame while the pool lock is held: nothing else can
            // bind this sector (or rebind the evicted one) mid-transfer.
            {
                let mut data = self.slots[index].lock().unwrap();
                if let Some(old) = flush {
                    self.device.write(old, &data);
                }
                self.device.read(sector, &mut data);
            }
            return self.lease(index, sector, state);
        }
    }

    /// Wraps an already-busy frame in a guard. The busy bit keeps the
    /// payload mutex uncontended.
    fn lease<'a>(
        &'a self,
        index: usize,
        sector: u32,
        state: MutexGuard<'_, CacheState>,
    ) -> FrameGuard<'a, D, SECTOR_SIZE> {
        drop(state);
        let data = self.slots[index].lock().unwrap();
        FrameGuard {
            cache: self,
            index,
            sector,
            data: Some(data),
            dirty: false,
        }
    }

    /// Clock scan in list order: leased frames are skipped, a set reference
    /// bit buys one more pass. The first pass clears every idle frame's bit,
    /// so the second pass finds a victim unless all frames are leased out.
    fn pick_victim(state: &mut CacheState) -> Option<usize> {
        for _ in 0..2 {
            for pos in 0..state.order.len() {
                let index = state.order[pos];
                let frame = &mut state.frames[index];
                if frame.busy {
                    continue;
                }
                if frame.accessed {
                    frame.accessed = false;
                    continue;
                }
                return Some(index);
            }
        }
        None
    }

    /// Writes every dirty frame back to the device.
    ///
    /// Frames are visited by pool position; a leased frame is waited for.
    /// Frames dirtied behind the scan are left for the next cycle, so one
    /// call is one best-effort pass, not a barrier.
    pub fn flush_all_dirty(&self) {
        for index in 0..self.slots.len() {
            let mut state = self.state.lock().unwrap();
            loop {
                let frame = &state.frames[index];
                if !frame.dirty {
                    break;
                }
                if frame.busy {
                    state = self.cond.wait(state).unwrap();
                    continue;
                }
                let sector = frame.sector.unwrap();
                let data = self.slots[index].lock().unwrap();
                self.device.write(sector, &data);
                drop(data);
                state.frames[index].dirty = false;
                self.cond.notify_all();
                break;
            }
        }
    }

    /// Number of frames whose payload has not been written back yet.
    pub fn dirty_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.frames.iter().filter(|f| f.dirty).count()
    }

    /// Hands `sector` to the read-ahead worker without blocking. A request
    /// made before the worker drains the previous one replaces it.
    pub fn prefetch(&self, sector: u32) {
        let mut state = self.state.lock().unwrap();
        state.prefetch_pending = Some(sector);
        self.cond.notify_all();
    }

    /// Asks the workers to exit; they observe the flag at their next wait.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        self.cond.notify_all();
    }

    /// Spawns the read-ahead and write-back workers. They run until
    /// [`BlockCache::shutdown`].
    pub fn spawn_workers(cache: &Arc<Self>, write_interval: Duration) -> Workers {
        let read_ahead = {
            let cache = Arc::clone(cache);
            thread::spawn(move || cache.read_ahead_loop())
        };
        let write_back = {
            let cache = Arc::clone(cache);
            thread::spawn(move || cache.write_back_loop(write_interval))
        };
        Workers {
            handles: vec![read_ahead, write_back],
        }
    }

    fn read_ahead_loop(&self) {
        loop {
            let sector = {
                let mut state = self.state.lock().unwrap();
                loop {
                    if state.shutdown {
                        return;
                    }
                    if let Some(sector) = state.prefetch_pending.take() {
                        break sector;
                    }
                    state = self.cond.wait(state).unwrap();
                }
            };
            // Warm the cache: bind the sector, release it clean.
            drop(self.acquire(sector));
        }
    }

    fn write_back_loop(&self, interval: Duration) {
        loop {
            let deadline = Instant::now() + interval;
            {
                let mut state = self.state.lock().unwrap();
                loop {
                    if state.shutdown {
                        return;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _) = self.cond.wait_timeout(state, deadline - now).unwrap();
                    state = guard;
                }
            }
            self.flush_all_dirty();
        }
    }
}

impl<D, const SECTOR_SIZE: usize> BlockCache<D, SECTOR_SIZE> {
    /// Returns a leased frame to the pool: clears busy, folds in the dirty
    /// bit, moves the frame to the back of the scan order, wakes waiters.
    fn release(&self, index: usize, dirty: bool) {
        let mut state = self.state.lock().unwrap();
        let frame = &mut state.frames[index];
        frame.busy = false;
        frame.dirty |= dirty;
        if let Some(pos) = state.order.iter().position(|&i| i == index) {
            state.order.remove(pos);
        }
        state.order.push_back(index);
        self.cond.notify_all();
    }
}

/// Background worker threads of a cache.
pub struct Workers {
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Waits for the workers to observe shutdown and exit.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

/// Exclusive lease on a frame bound to one sector.
///
/// Dropping the guard releases the frame and wakes waiters; mutating
/// accessors mark the frame dirty so the write-back machinery persists the
/// payload.
pub struct FrameGuard<'a, D, const SECTOR_SIZE: usize> {
    cache: &'a BlockCache<D, SECTOR_SIZE>,
    index: usize,
    sector: u32,
    data: Option<MutexGuard<'a, Box<[u8; SECTOR_SIZE]>>>,
    dirty: bool,
}

impl<D, const SECTOR_SIZE: usize> FrameGuard<'_, D, SECTOR_SIZE> {
    /// The sector this frame is bound to.
    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn bytes(&self) -> &[u8; SECTOR_SIZE] {
        self.data.as_ref().unwrap()
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; SECTOR_SIZE] {
        self.dirty = true;
        self.data.as_mut().unwrap()
    }

    /// Views the payload as a POD value.
    pub fn data<T>(&self) -> &T
    where
        T: Pod,
    {
        self.bytes().as_data_view().get(0)
    }

    /// Views the payload as a mutable POD value, marking the frame dirty.
    pub fn data_mut<T>(&mut self) -> &mut T
    where
        T: Pod,
    {
        self.bytes_mut().as_data_view_mut().get_mut(0)
    }

    /// Zero-fills the payload, marking the frame dirty.
    pub fn fill_zero(&mut self) {
        self.bytes_mut().fill(0);
    }
}

impl<D, const SECTOR_SIZE: usize> Drop for FrameGuard<'_, D, SECTOR_SIZE> {
    fn drop(&mut self) {
        // Let go of the payload before publishing the frame as idle.
        drop(self.data.take());
        self.cache.release(self.index, self.dirty);
    }
}
