//! Epoch ring inspection and advancement.
//!
//! The ring is a block-granular circular buffer between the epoch region
//! start and the cortex. The superblock points at the most recently
//! written entry; how far that entry has drifted from the superblock's
//! own epoch id decides whether the volume is trustworthy.

use log::warn;

use crate::error::Error;
use crate::hal::Device;
use crate::ondisk::epoch::{EpochHeader, EPOCH_DRIFT_MAX_FUTURE, EPOCH_DRIFT_MAX_PAST, EPOCH_HEADER_SIZE};
use crate::ondisk::Superblock;


/// Survivable classifications of the ring state. Toxic drift is an
/// error, not a verdict.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriftVerdict {
    /// Ring and superblock agree within the tolerated window.
    Steady,
    /// The ring pointer or its entry cannot be trusted; mount proceeds
    /// read-only with the panic flag raised for forensics.
    EpochLost,
    /// The ring is ahead of the superblock by the contained delta;
    /// mount proceeds read-only and heavily tainted.
    TimeDilation(u64),
}


/// Reads the current ring entry and classifies the drift.
pub fn check(dev: &mut dyn Device, sb: &Superblock) -> Result<DriftVerdict, Error>
{
    let ss = dev.caps().logical_block_size;
    let spb = sb.sectors_per_block(ss);
    let ring_start = sb.epoch_start_block(ss);
    let ring_end = sb.cortex_start_block(ss);
    let idx = sb.epoch_ring_block_idx;

    if idx < ring_start || idx >= ring_end {
        warn!("epoch ring pointer {} outside [{}, {})", idx, ring_start, ring_end);
        return Ok(DriftVerdict::EpochLost);
    }

    let mut raw = vec![0u8; sb.block_size as usize];
    if dev.sync_read(idx * spb, &mut raw).is_err() {
        // An unreadable entry and a missing entry look the same.
        return Ok(DriftVerdict::EpochLost);
    }

    let hdr = match EpochHeader::decode(&raw[..EPOCH_HEADER_SIZE]) {
        Ok(hdr) => hdr,
        Err(_) => return Ok(DriftVerdict::EpochLost),
    };
    if !hdr.crc_ok() {
        warn!("epoch ring entry at block {} fails its checksum", idx);
        return Ok(DriftVerdict::EpochLost);
    }

    let disk_id = hdr.epoch_id;
    let sb_id = sb.current_epoch_id;

    if disk_id == sb_id {
        return Ok(DriftVerdict::Steady);
    }

    if disk_id < sb_id {
        // The ring lags the superblock. A small lag is an interrupted
        // unmount; a large one means the media lost history.
        let delta = sb_id - disk_id;
        if delta <= EPOCH_DRIFT_MAX_PAST {
            return Ok(DriftVerdict::Steady);
        }
        return Err(Error::MediaToxic);
    }

    // The ring is ahead of the superblock: the superblock rolled back.
    let delta = disk_id - sb_id;
    if delta <= EPOCH_DRIFT_MAX_FUTURE {
        return Ok(DriftVerdict::TimeDilation(delta));
    }

    Err(Error::MediaToxic)
}


/// Writes the entry for the next epoch into the following ring slot
/// (wrapping) and makes it durable. Returns the new ring pointer and
/// epoch id; the caller owns updating and broadcasting the superblock
/// afterwards, never before.
pub fn advance(dev: &mut dyn Device, sb: &Superblock, now_ns: u64) -> Result<(u64, u64), Error>
{
    let ss = dev.caps().logical_block_size;
    let spb = sb.sectors_per_block(ss);
    let ring_start = sb.epoch_start_block(ss);
    let ring_end = sb.cortex_start_block(ss);

    let mut next = sb.epoch_ring_block_idx + 1;
    if next < ring_start || next >= ring_end {
        next = ring_start;
    }

    let epoch_id = sb.current_epoch_id + 1;
    let hdr = EpochHeader::new(epoch_id, now_ns);

    let mut raw = vec![0u8; sb.block_size as usize];
    raw[..EPOCH_HEADER_SIZE].copy_from_slice(&hdr.encode()?);

    dev.sync_write(next * spb, &raw)?;
    dev.barrier()?;

    Ok((next, epoch_id))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{STATE_CLEAN, STATE_METADATA_ZEROED};
    use crate::hal::RamDevice;

    fn sample_sb() -> Superblock
    {
        let mut sb = Superblock::default();
        sb.block_size = 512;
        sb.total_capacity = 1 << 20;
        sb.uuid = [7; 16];
        sb.state_flags = STATE_CLEAN | STATE_METADATA_ZEROED;
        sb.current_epoch_id = 100;
        sb.epoch_start_lba = 32;
        sb.epoch_ring_block_idx = 32;
        sb.cortex_start_lba = 64;
        sb.bitmap_start_lba = 128;
        sb.qmask_start_lba = 130;
        sb.flux_start_lba = 132;
        sb.horizon_lba = 2032;

        sb
    }

    fn write_entry(dev: &mut RamDevice, block_idx: u64, hdr: &EpochHeader)
    {
        let mut raw = vec![0u8; 512];
        raw[..EPOCH_HEADER_SIZE].copy_from_slice(&hdr.encode().unwrap());
        dev.sync_write(block_idx, &raw).unwrap();
    }

    #[test]
    fn matching_epoch_is_steady()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let sb = sample_sb();
        write_entry(&mut dev, 32, &EpochHeader::new(100, 5));

        assert_eq!(check(&mut dev, &sb), Ok(DriftVerdict::Steady));
    }

    #[test]
    fn small_past_lag_is_steady()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let sb = sample_sb();
        write_entry(&mut dev, 32, &EpochHeader::new(100 - EPOCH_DRIFT_MAX_PAST, 5));

        assert_eq!(check(&mut dev, &sb), Ok(DriftVerdict::Steady));
    }

    #[test]
    fn deep_past_is_toxic()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let mut sb = sample_sb();
        sb.current_epoch_id = 1000;
        write_entry(&mut dev, 32, &EpochHeader::new(1000 - EPOCH_DRIFT_MAX_PAST - 1, 5));

        assert_eq!(check(&mut dev, &sb), Err(Error::MediaToxic));
    }

    #[test]
    fn near_future_is_time_dilation()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let sb = sample_sb();
        write_entry(&mut dev, 32, &EpochHeader::new(105, 5));

        assert_eq!(check(&mut dev, &sb), Ok(DriftVerdict::TimeDilation(5)));
    }

    #[test]
    fn deep_future_is_toxic()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let sb = sample_sb();
        write_entry(&mut dev, 32, &EpochHeader::new(100 + EPOCH_DRIFT_MAX_FUTURE + 1, 5));

        assert_eq!(check(&mut dev, &sb), Err(Error::MediaToxic));
    }

    #[test]
    fn pointer_outside_ring_is_lost()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let mut sb = sample_sb();
        sb.epoch_ring_block_idx = 64; // first cortex block

        assert_eq!(check(&mut dev, &sb), Ok(DriftVerdict::EpochLost));
    }

    #[test]
    fn bad_entry_crc_is_lost()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let sb = sample_sb();
        let mut hdr = EpochHeader::new(100, 5);
        hdr.checksum ^= 0xffff;
        write_entry(&mut dev, 32, &hdr);

        assert_eq!(check(&mut dev, &sb), Ok(DriftVerdict::EpochLost));
    }

    #[test]
    fn advance_writes_next_slot()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let sb = sample_sb();

        let (idx, epoch) = advance(&mut dev, &sb, 777).unwrap();

        assert_eq!(idx, 33);
        assert_eq!(epoch, 101);

        let mut raw = vec![0u8; 512];
        dev.sync_read(33, &mut raw).unwrap();
        let hdr = EpochHeader::decode(&raw).unwrap();

        assert!(hdr.crc_ok());
        assert_eq!(hdr.epoch_id, 101);
        assert_eq!(hdr.timestamp_ns, 777);
    }

    #[test]
    fn advance_wraps_at_ring_end()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let mut sb = sample_sb();
        sb.epoch_ring_block_idx = 63; // last ring block

        let (idx, _) = advance(&mut dev, &sb, 1).unwrap();

        assert_eq!(idx, 32);
    }
}
