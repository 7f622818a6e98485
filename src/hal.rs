use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Error;


/// Hardware capability flags reported by the device layer.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct HwFlags(pub u32);

impl HwFlags {
    pub fn has_nvm(&self)          -> bool { self.0 & 0x1 != 0 }
    pub fn has_strict_flush(&self) -> bool { self.0 & 0x2 != 0 }
    pub fn has_zns_native(&self)   -> bool { self.0 & 0x4 != 0 }

    pub fn get_unknown(&self) -> u32
    {
        (self.0 >> 3) << 3
    }

    pub fn has_unknown(&self) -> bool
    {
        self.get_unknown() != 0
    }
}

pub const HW_NVM: u32 = 0x1;
pub const HW_STRICT_FLUSH: u32 = 0x2;
pub const HW_ZNS_NATIVE: u32 = 0x4;


/// Static description of a device.
#[derive(Copy, Clone, Debug)]
pub struct DeviceCaps {
    pub total_capacity: u64,
    pub logical_block_size: u32,
    pub hw_flags: HwFlags,
    /// Zone size in bytes. Meaningful only with `has_zns_native`.
    pub zone_size: u64,
}


/// The block-device seam the engine runs on.
///
/// All I/O is synchronous and strongly ordered; `barrier` makes every
/// prior write durable before returning. Implementations must reject
/// reads and writes that are not whole-sector or that reach past the
/// device capacity.
pub trait Device {
    fn caps(&self) -> DeviceCaps;

    /// Reads `buf.len()` bytes starting at sector `lba`.
    fn sync_read(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), Error>;

    /// Writes `buf` starting at sector `lba`.
    fn sync_write(&mut self, lba: u64, buf: &[u8]) -> Result<(), Error>;

    /// Makes all prior writes durable.
    fn barrier(&mut self) -> Result<(), Error>;

    /// Resets one zone on zone-native hardware.
    fn reset_zone(&mut self, _zone_idx: u64) -> Result<(), Error>
    {
        Err(Error::HwIo)
    }

    /// Nanosecond timestamp. Monotonic-ish; used for epoch records and
    /// mount times, never for ordering I/O.
    fn now_ns(&self) -> u64;
}

/// Checks a transfer against the device geometry.
fn check_range(caps: &DeviceCaps, lba: u64, len: usize) -> Result<(), Error>
{
    let ss = caps.logical_block_size as u64;

    if len == 0 || len as u64 % ss != 0 {
        return Err(Error::InvalidArgument);
    }
    let start = lba.checked_mul(ss).ok_or(Error::HwIo)?;
    let end = start.checked_add(len as u64).ok_or(Error::HwIo)?;
    if end > caps.total_capacity {
        return Err(Error::HwIo);
    }

    Ok(())
}


/// A device backed by a regular file or a raw block device node.
#[derive(Debug)]
pub struct FileDevice {
    file: File,
    caps: DeviceCaps,
}

impl FileDevice {
    /// Opens `path`, deriving capacity from the file length.
    pub fn open(path: &Path, writable: bool, hw_flags: u32) -> Result<Self, Error>
    {
        let file = OpenOptions::new()
            .create(false)
            .read(true)
            .write(writable)
            .open(path)?;
        let total_capacity = file.metadata()?.len();

        Ok(Self {
            file,
            caps: DeviceCaps {
                total_capacity,
                logical_block_size: 512,
                hw_flags: HwFlags(hw_flags),
                zone_size: 0,
            },
        })
    }
}

impl Device for FileDevice {
    fn caps(&self) -> DeviceCaps
    {
        self.caps
    }

    fn sync_read(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), Error>
    {
        check_range(&self.caps, lba, buf.len())?;

        self.file
            .seek(SeekFrom::Start(lba * self.caps.logical_block_size as u64))?;
        self.file.read_exact(buf)?;

        Ok(())
    }

    fn sync_write(&mut self, lba: u64, buf: &[u8]) -> Result<(), Error>
    {
        check_range(&self.caps, lba, buf.len())?;

        self.file
            .seek(SeekFrom::Start(lba * self.caps.logical_block_size as u64))?;
        self.file.write_all(buf)?;

        Ok(())
    }

    fn barrier(&mut self) -> Result<(), Error>
    {
        self.file.sync_data()?;

        Ok(())
    }

    fn now_ns(&self) -> u64
    {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}


/// A memory-backed device. Carries virtual volumes and the test suite.
///
/// The clock is a deterministic counter that advances on every read so
/// that timestamps are strictly increasing within a run.
#[derive(Debug)]
pub struct RamDevice {
    pub data: Vec<u8>,
    caps: DeviceCaps,
    clock: Cell<u64>,
}

impl RamDevice {
    pub fn new(capacity: u64, logical_block_size: u32) -> Self
    {
        Self::with_flags(capacity, logical_block_size, 0, 0)
    }

    pub fn with_flags(capacity: u64, logical_block_size: u32, hw_flags: u32, zone_size: u64) -> Self
    {
        assert!(logical_block_size > 0);
        assert!(capacity % logical_block_size as u64 == 0);

        Self {
            data: vec![0u8; capacity as usize],
            caps: DeviceCaps {
                total_capacity: capacity,
                logical_block_size,
                hw_flags: HwFlags(hw_flags),
                zone_size,
            },
            clock: Cell::new(1_000_000_000),
        }
    }

    /// Raw view at a byte offset; test helper.
    pub fn bytes_at(&self, offset: u64, len: usize) -> &[u8]
    {
        &self.data[offset as usize..offset as usize + len]
    }
}

impl Device for RamDevice {
    fn caps(&self) -> DeviceCaps
    {
        self.caps
    }

    fn sync_read(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), Error>
    {
        check_range(&self.caps, lba, buf.len())?;

        let start = (lba * self.caps.logical_block_size as u64) as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);

        Ok(())
    }

    fn sync_write(&mut self, lba: u64, buf: &[u8]) -> Result<(), Error>
    {
        check_range(&self.caps, lba, buf.len())?;

        let start = (lba * self.caps.logical_block_size as u64) as usize;
        self.data[start..start + buf.len()].copy_from_slice(buf);

        Ok(())
    }

    fn barrier(&mut self) -> Result<(), Error>
    {
        Ok(())
    }

    fn reset_zone(&mut self, zone_idx: u64) -> Result<(), Error>
    {
        if !self.caps.hw_flags.has_zns_native() || self.caps.zone_size == 0 {
            return Err(Error::HwIo);
        }

        let start = zone_idx
            .checked_mul(self.caps.zone_size)
            .ok_or(Error::HwIo)? as usize;
        let end = start + self.caps.zone_size as usize;
        if end > self.data.len() {
            return Err(Error::HwIo);
        }
        self.data[start..end].fill(0);

        Ok(())
    }

    fn now_ns(&self) -> u64
    {
        let t = self.clock.get();
        self.clock.set(t + 1_000);

        t
    }
}


// Debug implementations.


impl std::fmt::Debug for HwFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        let mut flags: Vec<&str> = Vec::new();

        if self.has_nvm() {
            flags.push("nvm");
        }
        if self.has_strict_flush() {
            flags.push("strict_flush");
        }
        if self.has_zns_native() {
            flags.push("zns_native");
        }

        f.debug_struct("HwFlags")
            .field("valid", &flags)
            .field("invalid", &self.get_unknown())
            .finish()
    }
}
