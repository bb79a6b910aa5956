//! Legacy ATA PIO driver.
//!
//! Out of scope for the block layer proper (the layer only consumes a
//! narrow read/write/flush contract) but needed as a concrete collaborator
//! so the cache and device table above it have something real to drive.
//! LBA28, two channels (primary/secondary) x two drives (master/slave).

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;
use x86_64::instructions::port::Port;

pub const SECTOR_SIZE: usize = 512;

/// A driver call is chunked into requests of at most this many sectors;
/// the ATA sector-count register is a single byte (0 means 256).
const MAX_SECTORS_PER_CALL: u32 = 255;

struct Channel {
    io_base: u16,
    control_base: u16,
}

impl Channel {
    fn data(&self) -> Port<u16> {
        Port::new(self.io_base)
    }
    fn sector_count(&self) -> Port<u8> {
        Port::new(self.io_base + 2)
    }
    fn lba_low(&self) -> Port<u8> {
        Port::new(self.io_base + 3)
    }
    fn lba_mid(&self) -> Port<u8> {
        Port::new(self.io_base + 4)
    }
    fn lba_high(&self) -> Port<u8> {
        Port::new(self.io_base + 5)
    }
    fn drive_select(&self) -> Port<u8> {
        Port::new(self.io_base + 6)
    }
    fn command(&self) -> Port<u8> {
        Port::new(self.io_base + 7)
    }
    fn status(&self) -> Port<u8> {
        Port::new(self.io_base + 7)
    }
    fn alt_status(&self) -> Port<u8> {
        Port::new(self.control_base)
    }
}

const CMD_READ_SECTORS: u8 = 0x20;
const CMD_WRITE_SECTORS: u8 = 0x30;
const CMD_FLUSH_CACHE: u8 = 0xE7;
const CMD_IDENTIFY: u8 = 0xEC;

const STATUS_ERR: u8 = 0x01;
const STATUS_DRQ: u8 = 0x08;
const STATUS_BSY: u8 = 0x80;

/// One ATA drive (a channel + master/slave select).
pub struct AtaDrive {
    channel: Mutex<Channel>,
    slave: bool,
    total_sectors: u64,
}

impl AtaDrive {
    fn select(&self, channel: &Channel, lba: u32) {
        let drive_bits = 0xE0 | ((self.slave as u8) << 4) | (((lba >> 24) & 0x0F) as u8);
        unsafe {
            channel.drive_select().write(drive_bits);
        }
    }

    fn wait_ready(&self, channel: &Channel) -> Result<(), &'static str> {
        for _ in 0..4 {
            unsafe { channel.alt_status().read() };
        }
        for _ in 0..1_000_000u32 {
            let status = unsafe { channel.status().read() };
            if status & STATUS_BSY == 0 {
                if status & STATUS_ERR != 0 {
                    return Err("ATA drive reported error status");
                }
                return Ok(());
            }
        }
        Err("ATA drive timed out waiting for ready")
    }

    fn wait_drq(&self, channel: &Channel) -> Result<(), &'static str> {
        for _ in 0..1_000_000u32 {
            let status = unsafe { channel.status().read() };
            if status & STATUS_ERR != 0 {
                return Err("ATA drive reported error status");
            }
            if status & STATUS_DRQ != 0 {
                return Ok(());
            }
        }
        Err("ATA drive timed out waiting for DRQ")
    }

    /// Read up to `MAX_SECTORS_PER_CALL` sectors starting at `lba`.
    fn read_chunk(&self, lba: u32, count: u32, buf: &mut [u8]) -> Result<(), &'static str> {
        let channel = self.channel.lock();
        self.select(&channel, lba);
        self.wait_ready(&channel)?;

        unsafe {
            channel.sector_count().write(count as u8);
            channel.lba_low().write(lba as u8);
            channel.lba_mid().write((lba >> 8) as u8);
            channel.lba_high().write((lba >> 16) as u8);
            channel.command().write(CMD_READ_SECTORS);
        }

        let mut data_port = channel.data();
        for sector in 0..count {
            self.wait_drq(&channel)?;
            let start = sector as usize * SECTOR_SIZE;
            for word in 0..(SECTOR_SIZE / 2) {
                let value = unsafe { data_port.read() };
                buf[start + word * 2] = value as u8;
                buf[start + word * 2 + 1] = (value >> 8) as u8;
            }
        }

        Ok(())
    }

    /// Write up to `MAX_SECTORS_PER_CALL` sectors starting at `lba`.
    fn write_chunk(&self, lba: u32, count: u32, buf: &[u8]) -> Result<(), &'static str> {
        let channel = self.channel.lock();
        self.select(&channel, lba);
        self.wait_ready(&channel)?;

        unsafe {
            channel.sector_count().write(count as u8);
            channel.lba_low().write(lba as u8);
            channel.lba_mid().write((lba >> 8) as u8);
            channel.lba_high().write((lba >> 16) as u8);
            channel.command().write(CMD_WRITE_SECTORS);
        }

        let mut data_port = channel.data();
        for sector in 0..count {
            self.wait_drq(&channel)?;
            let start = sector as usize * SECTOR_SIZE;
            for word in 0..(SECTOR_SIZE / 2) {
                let value = buf[start + word * 2] as u16 | ((buf[start + word * 2 + 1] as u16) << 8);
                unsafe {
                    data_port.write(value);
                }
            }
        }

        Ok(())
    }

    pub fn read_sectors(&self, start_lba: u64, sectors: u32, buf: &mut [u8]) -> Result<(), &'static str> {
        if start_lba + sectors as u64 > self.total_sectors {
            return Err("Sector out of range");
        }
        let mut done = 0u32;
        while done < sectors {
            let chunk = (sectors - done).min(MAX_SECTORS_PER_CALL);
            let lba = start_lba as u32 + done;
            let offset = done as usize * SECTOR_SIZE;
            self.read_chunk(lba, chunk, &mut buf[offset..offset + chunk as usize * SECTOR_SIZE])?;
            done += chunk;
        }
        Ok(())
    }

    pub fn write_sectors(&self, start_lba: u64, sectors: u32, buf: &[u8]) -> Result<(), &'static str> {
        if start_lba + sectors as u64 > self.total_sectors {
            return Err("Start sector out of range");
        }
        let mut done = 0u32;
        while done < sectors {
            let chunk = (sectors - done).min(MAX_SECTORS_PER_CALL);
            let lba = start_lba as u32 + done;
            let offset = done as usize * SECTOR_SIZE;
            self.write_chunk(lba, chunk, &buf[offset..offset + chunk as usize * SECTOR_SIZE])?;
            done += chunk;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), &'static str> {
        let channel = self.channel.lock();
        self.select(&channel, 0);
        self.wait_ready(&channel)?;
        unsafe {
            channel.command().write(CMD_FLUSH_CACHE);
        }
        self.wait_ready(&channel)
    }

    pub fn total_sectors(&self) -> u64 {
        self.total_sectors
    }
}

fn identify(io_base: u16, control_base: u16, slave: bool) -> Option<AtaDrive> {
    let channel = Channel { io_base, control_base };

    unsafe {
        channel.drive_select().write(0xA0 | ((slave as u8) << 4));
        channel.sector_count().write(0);
        channel.lba_low().write(0);
        channel.lba_mid().write(0);
        channel.lba_high().write(0);
        channel.command().write(CMD_IDENTIFY);
    }

    let status = unsafe { channel.status().read() };
    if status == 0 {
        return None; // no drive on this channel/slot
    }

    for _ in 0..1_000_000u32 {
        let status = unsafe { channel.status().read() };
        if status & STATUS_BSY != 0 {
            continue;
        }
        if unsafe { channel.lba_mid().read() } != 0 || unsafe { channel.lba_high().read() } != 0 {
            return None; // not ATA (likely ATAPI)
        }
        if status & STATUS_ERR != 0 {
            return None;
        }
        if status & STATUS_DRQ != 0 {
            break;
        }
    }

    let mut identify_data = [0u16; 256];
    let mut data_port = channel.data();
    for word in identify_data.iter_mut() {
        *word = unsafe { data_port.read() };
    }

    let total_sectors = (identify_data[61] as u64) << 16 | identify_data[60] as u64;
    if total_sectors == 0 {
        return None;
    }

    Some(AtaDrive {
        channel: Mutex::new(channel),
        slave,
        total_sectors,
    })
}

/// Probe the two legacy ATA channels for up to four drives.
pub fn probe_all() -> Vec<Arc<AtaDrive>> {
    const CHANNELS: [(u16, u16); 2] = [(0x1F0, 0x3F6), (0x170, 0x376)];

    let mut drives = Vec::new();
    for (io_base, control_base) in CHANNELS {
        for slave in [false, true] {
            if let Some(drive) = identify(io_base, control_base, slave) {
                log::info!(
                    "ATA: drive found at {:#x}/{} ({} sectors)",
                    io_base,
                    if slave { "slave" } else { "master" },
                    drive.total_sectors
                );
                drives.push(Arc::new(drive));
            }
        }
    }
    drives
}
