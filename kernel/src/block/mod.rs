//! Block Device Abstraction Layer
//!
//! Wraps drivers (read/write/flush over an opaque handle) in a uniform
//! device table keyed by an integer id, with a write-back page cache sitting
//! between drivers and callers. Filesystems talk to devices through the
//! `BlockDevice` trait, never through a driver directly.

use core::fmt;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

pub mod ata;
pub mod cache;

use cache::{CacheBackend, PageCache};

/// Generic block device interface
///
/// This trait provides a uniform interface for block-based storage devices.
/// Block sizes are device-specific (typically 512 bytes for raw sectors,
/// but filesystems may use 1024, 2048, or 4096 byte blocks).
pub trait BlockDevice: Send + Sync {
    /// Read a block into the provided buffer
    fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<(), BlockError>;

    /// Write a block from the provided buffer
    fn write_block(&self, block_num: u64, buf: &[u8]) -> Result<(), BlockError>;

    /// Get the block size in bytes
    fn block_size(&self) -> usize;

    /// Get the total number of blocks on the device
    fn num_blocks(&self) -> u64;

    /// Flush any cached writes to persistent storage
    fn flush(&self) -> Result<(), BlockError>;
}

/// Errors that can occur during block device operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// I/O error occurred during operation
    IoError,
    /// Block number is out of bounds
    OutOfBounds,
    /// Device is not ready or not responding
    DeviceNotReady,
    /// Operation timed out
    Timeout,
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::IoError => write!(f, "I/O error"),
            BlockError::OutOfBounds => write!(f, "block number out of bounds"),
            BlockError::DeviceNotReady => write!(f, "device not ready"),
            BlockError::Timeout => write!(f, "operation timed out"),
        }
    }
}

impl From<&'static str> for BlockError {
    fn from(s: &'static str) -> Self {
        match s {
            "Sector out of range" | "Start sector out of range" => BlockError::OutOfBounds,
            "ATA drive timed out waiting for ready" | "ATA drive timed out waiting for DRQ" => {
                BlockError::Timeout
            }
            "ATA drive reported error status" => BlockError::IoError,
            _ => BlockError::IoError,
        }
    }
}

pub const SECTOR_SIZE: usize = ata::SECTOR_SIZE;

/// Capability a registered driver exposes to the device table.
pub trait DeviceOps: Send + Sync {
    fn read_sectors(&self, lba: u64, sectors: u32, buf: &mut [u8]) -> Result<(), BlockError>;
    fn write_sectors(&self, lba: u64, sectors: u32, buf: &[u8]) -> Result<(), BlockError>;
    fn flush(&self) -> Result<(), BlockError>;
}

impl DeviceOps for ata::AtaDrive {
    fn read_sectors(&self, lba: u64, sectors: u32, buf: &mut [u8]) -> Result<(), BlockError> {
        self.read_sectors(lba, sectors, buf).map_err(BlockError::from)
    }
    fn write_sectors(&self, lba: u64, sectors: u32, buf: &[u8]) -> Result<(), BlockError> {
        self.write_sectors(lba, sectors, buf).map_err(BlockError::from)
    }
    fn flush(&self) -> Result<(), BlockError> {
        ata::AtaDrive::flush(self).map_err(BlockError::from)
    }
}

struct DeviceEntry {
    active: bool,
    name: String,
    total_sectors: u64,
    driver: Arc<dyn DeviceOps>,
}

const MAX_DEVICES: usize = 16;

static DEVICE_TABLE: Mutex<Vec<Option<DeviceEntry>>> = Mutex::new(Vec::new());
static CACHE: PageCache = PageCache::new();

struct TableBackend;

impl CacheBackend for TableBackend {
    fn read_sectors(&self, device_id: u32, lba: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        let sectors = (buf.len() / SECTOR_SIZE) as u32;
        with_driver(device_id, |driver| driver.read_sectors(lba, sectors, buf))
    }

    fn write_sectors(&self, device_id: u32, lba: u64, buf: &[u8]) -> Result<(), BlockError> {
        let sectors = (buf.len() / SECTOR_SIZE) as u32;
        with_driver(device_id, |driver| driver.write_sectors(lba, sectors, buf))
    }

    fn flush_device(&self, device_id: u32) -> Result<(), BlockError> {
        with_driver(device_id, |driver| driver.flush())
    }
}

fn with_driver<T>(
    device_id: u32,
    f: impl FnOnce(&Arc<dyn DeviceOps>) -> Result<T, BlockError>,
) -> Result<T, BlockError> {
    let table = DEVICE_TABLE.lock();
    let entry = table
        .get(device_id as usize)
        .and_then(|e| e.as_ref())
        .filter(|e| e.active)
        .ok_or(BlockError::DeviceNotReady)?;
    f(&entry.driver)
}

/// Register a driver under `name`, returning its device id.
fn register(name: String, total_sectors: u64, driver: Arc<dyn DeviceOps>) -> u32 {
    let mut table = DEVICE_TABLE.lock();
    let entry = DeviceEntry {
        active: true,
        name,
        total_sectors,
        driver,
    };
    if let Some(slot) = table.iter_mut().position(|e| e.is_none()) {
        table[slot] = Some(entry);
        slot as u32
    } else {
        table.push(Some(entry));
        (table.len() - 1) as u32
    }
}

/// Flush then invalidate all cache slots for `device_id`, and deactivate it.
#[allow(dead_code)]
pub fn unregister(device_id: u32) -> Result<(), BlockError> {
    CACHE.unregister_device(&TableBackend, device_id)?;
    let mut table = DEVICE_TABLE.lock();
    if let Some(Some(entry)) = table.get_mut(device_id as usize) {
        entry.active = false;
    }
    Ok(())
}

/// A handle implementing `BlockDevice` against a registered device, going
/// through the shared write-back page cache.
pub struct CachedBlockDevice {
    device_id: u32,
    total_sectors: u64,
}

impl CachedBlockDevice {
    pub fn by_name(name: &str) -> Option<Self> {
        let table = DEVICE_TABLE.lock();
        table.iter().enumerate().find_map(|(id, entry)| {
            entry.as_ref().filter(|e| e.active && e.name == name).map(|e| (id as u32, e.total_sectors))
        }).map(|(device_id, total_sectors)| CachedBlockDevice { device_id, total_sectors })
    }

    pub fn primary() -> Option<Self> {
        Self::by_name("ata0")
    }
}

impl BlockDevice for CachedBlockDevice {
    fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        if block_num >= self.total_sectors {
            return Err(BlockError::OutOfBounds);
        }
        CACHE.read(&TableBackend, self.device_id, block_num, buf)
    }

    fn write_block(&self, block_num: u64, buf: &[u8]) -> Result<(), BlockError> {
        if block_num >= self.total_sectors {
            return Err(BlockError::OutOfBounds);
        }
        CACHE.write(&TableBackend, self.device_id, block_num, buf)
    }

    fn block_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn num_blocks(&self) -> u64 {
        self.total_sectors
    }

    fn flush(&self) -> Result<(), BlockError> {
        CACHE.flush_device(&TableBackend, self.device_id)
    }
}

/// Probe legacy ATA and auto-register every drive found as "ata0"…"ataN".
pub fn init() -> Result<(), &'static str> {
    let drives = ata::probe_all();
    if drives.is_empty() {
        log::warn!("Block: no ATA drives found");
        return Err("No ATA drive available");
    }

    for (i, drive) in drives.into_iter().enumerate() {
        let name = alloc::format!("ata{}", i);
        let total_sectors = drive.total_sectors();
        register(name.clone(), total_sectors, drive);
        log::info!("Block: registered {} ({} sectors)", name, total_sectors);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDriver {
        data: Mutex<Vec<u8>>,
    }

    impl DeviceOps for FakeDriver {
        fn read_sectors(&self, lba: u64, sectors: u32, buf: &mut [u8]) -> Result<(), BlockError> {
            let data = self.data.lock();
            let start = lba as usize * SECTOR_SIZE;
            let len = sectors as usize * SECTOR_SIZE;
            buf[..len].copy_from_slice(&data[start..start + len]);
            Ok(())
        }
        fn write_sectors(&self, lba: u64, sectors: u32, buf: &[u8]) -> Result<(), BlockError> {
            let mut data = self.data.lock();
            let start = lba as usize * SECTOR_SIZE;
            let len = sectors as usize * SECTOR_SIZE;
            data[start..start + len].copy_from_slice(&buf[..len]);
            Ok(())
        }
        fn flush(&self) -> Result<(), BlockError> {
            Ok(())
        }
    }

    #[test]
    fn register_and_round_trip_through_cache() {
        let driver = Arc::new(FakeDriver {
            data: Mutex::new(alloc::vec![0u8; 64 * SECTOR_SIZE]),
        });
        let id = register(String::from("test0"), 64, driver);
        let device = CachedBlockDevice { device_id: id, total_sectors: 64 };

        let write_buf = [0xAAu8; SECTOR_SIZE];
        device.write_block(3, &write_buf).unwrap();

        let mut read_buf = [0u8; SECTOR_SIZE];
        device.read_block(3, &mut read_buf).unwrap();
        assert_eq!(read_buf, write_buf);
    }

    #[test]
    fn out_of_bounds_block_is_rejected() {
        let driver = Arc::new(FakeDriver {
            data: Mutex::new(alloc::vec![0u8; 4 * SECTOR_SIZE]),
        });
        let id = register(String::from("test1"), 4, driver);
        let device = CachedBlockDevice { device_id: id, total_sectors: 4 };

        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(device.read_block(4, &mut buf), Err(BlockError::OutOfBounds));
    }
}
