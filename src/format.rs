//! Volume creation: geometry synthesis and the initial writes.

use log::info;

use crate::error::Error;
use crate::flags::{STATE_CLEAN, STATE_METADATA_ZEROED};
use crate::hal::Device;
use crate::ondisk::anchor::{Anchor, ANCHOR_SIZE};
use crate::ondisk::epoch::{EpochHeader, EPOCH_HEADER_SIZE};
use crate::ondisk::{pack_version, Bytes, Superblock, SUPERBLOCK_MAGIC, SUPERBLOCK_SIZE, VERSION_MAJOR, VERSION_MINOR};
use crate::profile::{self, Profile};
use crate::quality::SILVER_FILL;
use crate::util::{align_down, ceil_div};
use crate::volume::broadcast;


/// Ring length in blocks for a fresh volume.
pub const EPOCH_RING_BLOCKS: u64 = 64;

/// One cortex slot is provisioned per this many volume blocks.
const BLOCKS_PER_SLOT: u64 = 64;
/// Fresh volumes never start with fewer slots than this.
const MIN_CORTEX_SLOTS: u64 = 64;


#[derive(Clone, Debug)]
pub struct FormatParams {
    pub profile: Profile,
    pub label: Option<String>,
    /// Volume identity; freshly drawn when absent.
    pub uuid: Option<[u8; 16]>,
}

impl Default for FormatParams {
    fn default() -> Self
    {
        Self {
            profile: Profile::Generic,
            label: None,
            uuid: None,
        }
    }
}


/// Fills `bytes` of a region with `fill`, one block at a time.
fn fill_region(
    dev: &mut dyn Device,
    start_lba: u64,
    bytes: u64,
    block_size: u32,
    fill: u8,
) -> Result<(), Error>
{
    let ss = dev.caps().logical_block_size as u64;
    let chunk = vec![fill; block_size as usize];

    let mut written = 0u64;
    while written < bytes {
        dev.sync_write(start_lba + written / ss, &chunk)?;
        written += block_size as u64;
    }

    Ok(())
}


/// A random identity with the v4 bit pattern applied.
fn fresh_uuid() -> [u8; 16]
{
    let mut uuid: [u8; 16] = rand::random();
    uuid[6] = (uuid[6] & 0x0f) | 0x40;
    uuid[8] = (uuid[8] & 0x3f) | 0x80;

    uuid
}


/// Lays a fresh HN4 volume onto the device: epoch ring, root anchor,
/// zeroed void bitmap, silver quality mask, then the superblock
/// replicas last, so that an interrupted format never looks mountable.
pub fn format(dev: &mut dyn Device, params: &FormatParams) -> Result<(), Error>
{
    let caps = dev.caps();
    let cap = caps.total_capacity;
    let ss = caps.logical_block_size;
    let zns = caps.hw_flags.has_zns_native();

    profile::check_capacity_band(params.profile, cap)?;

    let block_size = if zns {
        if caps.zone_size == 0 || caps.zone_size > u32::MAX as u64 {
            return Err(Error::AlignmentFail);
        }
        caps.zone_size as u32
    } else {
        params.profile.default_block_size()
    };

    if block_size % ss != 0 || !block_size.is_power_of_two() {
        return Err(Error::Geometry);
    }
    profile::zns_policy(&caps, block_size)?;

    let bs = block_size as u64;
    let spb = bs / ss as u64;
    let total_blocks = cap / bs;

    // Region layout, in block indices. The primary replica plus one
    // block of slack precede the ring.

    let epoch_start = ceil_div(2 * SUPERBLOCK_SIZE as u64, bs).max(1);
    let cortex_slots = (total_blocks / BLOCKS_PER_SLOT).max(MIN_CORTEX_SLOTS);
    let cortex_blocks = ceil_div(cortex_slots * ANCHOR_SIZE as u64, bs);
    let bitmap_blocks = ceil_div(ceil_div(total_blocks, 8), bs);
    let qmask_blocks = ceil_div(ceil_div(total_blocks, 4), bs);

    let cortex_start = epoch_start + EPOCH_RING_BLOCKS;
    let bitmap_start = cortex_start + cortex_blocks;
    let qmask_start = bitmap_start + bitmap_blocks;
    let flux_start = qmask_start + qmask_blocks;
    let horizon = align_down(cap - SUPERBLOCK_SIZE as u64, bs) / bs;

    if flux_start >= horizon {
        // No payload space left after the metadata.
        return Err(Error::Geometry);
    }

    let now = dev.now_ns();

    let mut sb = Superblock::default();
    sb.magic = SUPERBLOCK_MAGIC;
    sb.version = pack_version(VERSION_MAJOR, VERSION_MINOR);
    sb.block_size = block_size;
    sb.total_capacity = cap;
    sb.uuid = params.uuid.unwrap_or_else(fresh_uuid);
    sb.state_flags = STATE_CLEAN | STATE_METADATA_ZEROED;
    sb.format_profile = params.profile.as_raw();
    sb.copy_generation = 1;
    sb.last_mount_time = now;
    sb.current_epoch_id = 1;
    sb.epoch_start_lba = epoch_start * spb;
    sb.epoch_ring_block_idx = epoch_start;
    sb.cortex_start_lba = cortex_start * spb;
    sb.bitmap_start_lba = bitmap_start * spb;
    sb.qmask_start_lba = qmask_start * spb;
    sb.flux_start_lba = flux_start * spb;
    sb.horizon_lba = horizon * spb;
    sb.hw_flags = caps.hw_flags.0;
    if let Some(label) = &params.label {
        sb.label = Bytes::from_slice(label.as_bytes());
    }

    // Metadata bodies first; the superblock is what makes them real.

    let mut ring_block = vec![0u8; block_size as usize];
    let hdr = EpochHeader::new(1, now);
    ring_block[..EPOCH_HEADER_SIZE].copy_from_slice(&hdr.encode()?);
    dev.sync_write(sb.epoch_start_lba, &ring_block)?;

    fill_region(dev, sb.cortex_start_lba, cortex_blocks * bs, block_size, 0)?;

    let root = Anchor::new_root();
    let mut root_block = vec![0u8; block_size as usize];
    root_block[..ANCHOR_SIZE].copy_from_slice(&root.encode()?);
    dev.sync_write(sb.cortex_start_lba, &root_block)?;

    fill_region(dev, sb.bitmap_start_lba, bitmap_blocks * bs, block_size, 0)?;
    fill_region(dev, sb.qmask_start_lba, qmask_blocks * bs, block_size, SILVER_FILL)?;

    dev.barrier()?;

    let raw = sb.seal()?;
    broadcast(dev, &raw, &sb, zns)?;

    info!(
        "formatted {} byte volume: {} blocks of {}, {} cortex slot(s)",
        cap, total_blocks, block_size, cortex_slots
    );

    Ok(())
}
