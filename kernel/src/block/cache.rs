//! Unified write-back page cache sitting between the device table and drivers.
//!
//! Cache blocks are 8 sectors (4 KiB) aligned on 8-sector boundaries. Lookup
//! is a linear scan of a fixed-size slot table keyed by (device id, aligned
//! LBA); eviction picks the slot with the smallest access counter, writing it
//! back first if dirty.

use spin::Mutex;

use super::{BlockError, SECTOR_SIZE};

pub const SECTORS_PER_BLOCK: u64 = 8;
pub const CACHE_BLOCK_SIZE: usize = SECTORS_PER_BLOCK as usize * SECTOR_SIZE;

const NUM_SLOTS: usize = 64;

struct Slot {
    valid: bool,
    dirty: bool,
    device_id: u32,
    aligned_lba: u64,
    access_counter: u64,
    data: [u8; CACHE_BLOCK_SIZE],
}

impl Slot {
    const fn empty() -> Self {
        Slot {
            valid: false,
            dirty: false,
            device_id: 0,
            aligned_lba: 0,
            access_counter: 0,
            data: [0; CACHE_BLOCK_SIZE],
        }
    }
}

/// A driver callback pair used by the cache to fill and write back slots.
/// The cache never holds a reference to the device table directly so it
/// can be driven by tests with a fake backend.
pub trait CacheBackend {
    fn read_sectors(&self, device_id: u32, lba: u64, buf: &mut [u8]) -> Result<(), BlockError>;
    fn write_sectors(&self, device_id: u32, lba: u64, buf: &[u8]) -> Result<(), BlockError>;
    fn flush_device(&self, device_id: u32) -> Result<(), BlockError>;
}

pub struct PageCache {
    slots: Mutex<[Slot; NUM_SLOTS]>,
    clock: Mutex<u64>,
}

impl PageCache {
    pub const fn new() -> Self {
        const EMPTY: Slot = Slot::empty();
        PageCache {
            slots: Mutex::new([EMPTY; NUM_SLOTS]),
            clock: Mutex::new(0),
        }
    }

    fn tick(&self) -> u64 {
        let mut clock = self.clock.lock();
        *clock += 1;
        *clock
    }

    /// Find a cached slot for (device_id, aligned_lba), bumping its access
    /// counter on hit. Returns the slot index.
    fn find_or_allocate(
        &self,
        backend: &dyn CacheBackend,
        device_id: u32,
        aligned_lba: u64,
    ) -> Result<usize, BlockError> {
        let mut slots = self.slots.lock();

        for (i, slot) in slots.iter_mut().enumerate() {
            if slot.valid && slot.device_id == device_id && slot.aligned_lba == aligned_lba {
                slot.access_counter = self.tick();
                return Ok(i);
            }
        }

        // Miss: prefer an invalid slot, else evict smallest access counter.
        let victim = slots
            .iter()
            .enumerate()
            .find(|(_, s)| !s.valid)
            .map(|(i, _)| i)
            .unwrap_or_else(|| {
                slots
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, s)| s.access_counter)
                    .map(|(i, _)| i)
                    .expect("cache has at least one slot")
            });

        if slots[victim].valid && slots[victim].dirty {
            let (dev, lba, data) = {
                let s = &slots[victim];
                (s.device_id, s.aligned_lba, s.data)
            };
            drop(slots);
            backend.write_sectors(dev, lba, &data)?;
            slots = self.slots.lock();
        }

        let mut buf = [0u8; CACHE_BLOCK_SIZE];
        drop(slots);
        backend.read_sectors(device_id, aligned_lba, &mut buf)?;
        slots = self.slots.lock();

        let slot = &mut slots[victim];
        slot.valid = true;
        slot.dirty = false;
        slot.device_id = device_id;
        slot.aligned_lba = aligned_lba;
        slot.data = buf;
        slot.access_counter = self.tick();

        Ok(victim)
    }

    pub fn read(
        &self,
        backend: &dyn CacheBackend,
        device_id: u32,
        lba: u64,
        buf: &mut [u8],
    ) -> Result<(), BlockError> {
        let aligned_lba = lba - (lba % SECTORS_PER_BLOCK);
        let block_offset = ((lba - aligned_lba) * SECTOR_SIZE as u64) as usize;

        match self.find_or_allocate(backend, device_id, aligned_lba) {
            Ok(index) => {
                let slots = self.slots.lock();
                let src = &slots[index].data[block_offset..block_offset + buf.len()];
                buf.copy_from_slice(src);
                Ok(())
            }
            Err(_) => {
                // Cache allocation failed: fall through to a direct read.
                backend.read_sectors(device_id, lba, buf)
            }
        }
    }

    pub fn write(
        &self,
        backend: &dyn CacheBackend,
        device_id: u32,
        lba: u64,
        buf: &[u8],
    ) -> Result<(), BlockError> {
        let aligned_lba = lba - (lba % SECTORS_PER_BLOCK);
        let block_offset = ((lba - aligned_lba) * SECTOR_SIZE as u64) as usize;
        let full_block = block_offset == 0 && buf.len() == CACHE_BLOCK_SIZE;

        if full_block {
            // A full-block write never needs to fill from disk first.
            let mut slots = self.slots.lock();
            let victim = slots
                .iter()
                .enumerate()
                .find(|(_, s)| s.valid && s.device_id == device_id && s.aligned_lba == aligned_lba)
                .map(|(i, _)| i)
                .or_else(|| slots.iter().enumerate().find(|(_, s)| !s.valid).map(|(i, _)| i));

            if let Some(index) = victim {
                let needs_writeback = slots[index].valid && slots[index].dirty
                    && (slots[index].device_id != device_id || slots[index].aligned_lba != aligned_lba);
                if needs_writeback {
                    let (dev, lba2, data) = {
                        let s = &slots[index];
                        (s.device_id, s.aligned_lba, s.data)
                    };
                    drop(slots);
                    backend.write_sectors(dev, lba2, &data)?;
                    slots = self.slots.lock();
                }
                let slot = &mut slots[index];
                slot.valid = true;
                slot.dirty = true;
                slot.device_id = device_id;
                slot.aligned_lba = aligned_lba;
                slot.data.copy_from_slice(buf);
                slot.access_counter = self.tick();
                return Ok(());
            }
            return backend.write_sectors(device_id, lba, buf);
        }

        match self.find_or_allocate(backend, device_id, aligned_lba) {
            Ok(index) => {
                let mut slots = self.slots.lock();
                let slot = &mut slots[index];
                slot.data[block_offset..block_offset + buf.len()].copy_from_slice(buf);
                slot.dirty = true;
                Ok(())
            }
            Err(_) => backend.write_sectors(device_id, lba, buf),
        }
    }

    /// Write back all dirty slots for `device_id`, then defer to the
    /// caller to invoke the driver's flush.
    pub fn flush_device(&self, backend: &dyn CacheBackend, device_id: u32) -> Result<(), BlockError> {
        loop {
            let dirty = {
                let slots = self.slots.lock();
                slots
                    .iter()
                    .enumerate()
                    .find(|(_, s)| s.valid && s.dirty && s.device_id == device_id)
                    .map(|(i, s)| (i, s.aligned_lba, s.data))
            };

            match dirty {
                Some((index, lba, data)) => {
                    backend.write_sectors(device_id, lba, &data)?;
                    self.slots.lock()[index].dirty = false;
                }
                None => break,
            }
        }
        backend.flush_device(device_id)
    }

    /// Flush then invalidate every slot belonging to `device_id`.
    pub fn unregister_device(&self, backend: &dyn CacheBackend, device_id: u32) -> Result<(), BlockError> {
        self.flush_device(backend, device_id)?;
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.valid && slot.device_id == device_id {
                slot.valid = false;
                slot.dirty = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;

    struct FakeBackend {
        disk: Mutex<BTreeMap<u64, [u8; CACHE_BLOCK_SIZE]>>,
        writes: Mutex<u32>,
    }

    impl FakeBackend {
        fn new() -> Self {
            FakeBackend {
                disk: Mutex::new(BTreeMap::new()),
                writes: Mutex::new(0),
            }
        }
    }

    impl CacheBackend for FakeBackend {
        fn read_sectors(&self, _device_id: u32, lba: u64, buf: &mut [u8]) -> Result<(), BlockError> {
            let disk = self.disk.lock();
            match disk.get(&lba) {
                Some(block) => buf.copy_from_slice(block),
                None => buf.fill(0),
            }
            Ok(())
        }

        fn write_sectors(&self, _device_id: u32, lba: u64, buf: &[u8]) -> Result<(), BlockError> {
            *self.writes.lock() += 1;
            let mut block = [0u8; CACHE_BLOCK_SIZE];
            block.copy_from_slice(buf);
            self.disk.lock().insert(lba, block);
            Ok(())
        }

        fn flush_device(&self, _device_id: u32) -> Result<(), BlockError> {
            Ok(())
        }
    }

    #[test]
    fn read_after_write_sees_new_data() {
        let backend = FakeBackend::new();
        let cache = PageCache::new();

        let mut write_buf = [0u8; CACHE_BLOCK_SIZE];
        write_buf[0] = 0xAB;
        cache.write(&backend, 0, 0, &write_buf).unwrap();

        let mut read_buf = [0u8; CACHE_BLOCK_SIZE];
        cache.read(&backend, 0, 0, &mut read_buf).unwrap();
        assert_eq!(read_buf[0], 0xAB);
    }

    #[test]
    fn partial_write_does_not_lose_rest_of_block() {
        let backend = FakeBackend::new();
        let cache = PageCache::new();

        let full = [0x11u8; CACHE_BLOCK_SIZE];
        cache.write(&backend, 0, 0, &full).unwrap();

        // Partial write into the second sector of the block only.
        let partial = [0x22u8; SECTOR_SIZE];
        cache.write(&backend, 0, 1, &partial).unwrap();

        let mut read_buf = [0u8; CACHE_BLOCK_SIZE];
        cache.read(&backend, 0, 0, &mut read_buf).unwrap();
        assert_eq!(&read_buf[0..SECTOR_SIZE], &[0x11u8; SECTOR_SIZE][..]);
        assert_eq!(&read_buf[SECTOR_SIZE..SECTOR_SIZE * 2], &[0x22u8; SECTOR_SIZE][..]);
    }

    #[test]
    fn flush_writes_back_dirty_slots() {
        let backend = FakeBackend::new();
        let cache = PageCache::new();

        let full = [0x33u8; CACHE_BLOCK_SIZE];
        cache.write(&backend, 0, 0, &full).unwrap();
        assert_eq!(*backend.writes.lock(), 0);

        cache.flush_device(&backend, 0).unwrap();
        assert_eq!(*backend.writes.lock(), 1);
    }

    #[test]
    fn eviction_prefers_smallest_access_counter() {
        let backend = FakeBackend::new();
        let cache = PageCache::new();

        // Fill every slot with distinct device/lba pairs, reading (not writing)
        // so nothing is dirty.
        let mut buf = [0u8; CACHE_BLOCK_SIZE];
        for i in 0..NUM_SLOTS as u64 {
            cache.read(&backend, 0, i * SECTORS_PER_BLOCK, &mut buf).unwrap();
        }

        // Touch slot 0's block again so it's not the least-recently-used.
        cache.read(&backend, 0, 0, &mut buf).unwrap();

        // One more distinct block forces an eviction; it must not be slot 0's block.
        cache
            .read(&backend, 0, NUM_SLOTS as u64 * SECTORS_PER_BLOCK, &mut buf)
            .unwrap();

        // Slot 0's block should still be resident (cheap way to check: re-reading
        // it doesn't touch the backend beyond the original population reads).
        let writes_before = *backend.writes.lock();
        cache.read(&backend, 0, 0, &mut buf).unwrap();
        assert_eq!(*backend.writes.lock(), writes_before);
    }
}
