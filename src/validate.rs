//! Superblock validation: integrity, then geometry, then compatibility.

use crate::error::Error;
use crate::flags::{IncompatFeatures, MountIntent, RoCompatFeatures, StateFlags};
use crate::hal::DeviceCaps;
use crate::ondisk::{Superblock, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, SUPERBLOCK_MAGIC, SUPERBLOCK_SIZE, VERSION_MAJOR, VERSION_MINOR};
use crate::util::{align_up, ceil_div};


/// Outcome of full validation. Fatal conditions are errors; these two
/// are the survivable downgrades.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Validated {
    /// Unknown ro_compat bits present; writing is off the table.
    pub force_ro: bool,
    /// The format minor revision is newer than this driver.
    pub needs_upgrade: bool,
}


/// Runs all three validation stages against a decoded superblock.
/// The replica checksum is the discovery layer's concern; by the time a
/// superblock reaches here its raw bytes have already been verified.
pub fn validate(sb: &Superblock, caps: &DeviceCaps) -> Result<Validated, Error>
{
    integrity(sb)?;
    geometry(sb, caps)?;

    compatibility(sb, caps)
}


/// Identity-level checks.
pub fn integrity(sb: &Superblock) -> Result<(), Error>
{
    if sb.magic != SUPERBLOCK_MAGIC {
        return Err(Error::BadSuperblock);
    }
    if sb.uuid == [0u8; 16] {
        return Err(Error::BadSuperblock);
    }

    Ok(())
}


/// Block-size, capacity, region-pointer and region-ordering checks.
pub fn geometry(sb: &Superblock, caps: &DeviceCaps) -> Result<(), Error>
{
    let bs = sb.block_size;
    let ss = caps.logical_block_size;

    if bs < MIN_BLOCK_SIZE || !bs.is_power_of_two() {
        return Err(Error::BadSuperblock);
    }
    if bs > MAX_BLOCK_SIZE {
        return Err(Error::Geometry);
    }
    if bs % ss != 0 {
        return Err(Error::BadSuperblock);
    }

    if sb.total_capacity == 0 || sb.total_capacity > caps.total_capacity {
        return Err(Error::Geometry);
    }

    let spb = sb.sectors_per_block(ss);
    let ss = ss as u64;
    let cap = sb.total_capacity;

    // Every region start must land inside the volume, block-aligned.
    let starts = [
        sb.epoch_start_lba,
        sb.cortex_start_lba,
        sb.bitmap_start_lba,
        sb.qmask_start_lba,
        sb.flux_start_lba,
    ];
    for lba in starts {
        if lba.checked_mul(ss).map_or(true, |b| b >= cap) {
            return Err(Error::Geometry);
        }
        if lba % spb != 0 {
            return Err(Error::AlignmentFail);
        }
    }
    if sb.horizon_lba.checked_mul(ss).map_or(true, |b| b > cap) {
        return Err(Error::Geometry);
    }
    if sb.horizon_lba % spb != 0 {
        return Err(Error::AlignmentFail);
    }

    // The metadata regions must not collide with the primary replica.
    if sb.epoch_start_lba * ss < SUPERBLOCK_SIZE as u64 {
        return Err(Error::Geometry);
    }

    // Strict ascending order, no overlap.
    if sb.epoch_start_lba >= sb.cortex_start_lba
        || sb.cortex_start_lba >= sb.bitmap_start_lba
        || sb.qmask_start_lba >= sb.flux_start_lba
        || sb.flux_start_lba > sb.horizon_lba
    {
        return Err(Error::Geometry);
    }

    // The void bitmap gets its own error kind: a broken bitmap region is
    // survivable in ways broken ordering is not.
    if sb.qmask_start_lba <= sb.bitmap_start_lba {
        return Err(Error::BitmapCorrupt);
    }
    let bitmap_bytes = align_up(ceil_div(sb.total_blocks(), 8), bs as u64);
    if sb.bitmap_start_lba * ss + bitmap_bytes > sb.qmask_start_lba * ss {
        return Err(Error::BitmapCorrupt);
    }

    // The quality mask must not reach into the flux region.
    let qmask_bytes = align_up(ceil_div(sb.total_blocks(), 4), bs as u64);
    if sb.qmask_start_lba * ss + qmask_bytes > sb.flux_start_lba * ss {
        return Err(Error::Geometry);
    }

    Ok(())
}


/// Version, feature-flag and persisted-intent checks.
pub fn compatibility(sb: &Superblock, caps: &DeviceCaps) -> Result<Validated, Error>
{
    let state = StateFlags(sb.state_flags);

    if !state.has_metadata_zeroed() {
        // The format never ran to completion.
        return Err(Error::Uninitialized);
    }

    if sb.version_major() != VERSION_MAJOR {
        return Err(Error::VersionIncompat);
    }

    if IncompatFeatures(sb.incompat_flags).has_unknown() {
        return Err(Error::VersionIncompat);
    }

    let persisted = MountIntent(sb.mount_intent);
    if persisted.has_wormhole() && !caps.hw_flags.has_strict_flush() {
        return Err(Error::HwIo);
    }

    let mut out = Validated::default();
    if RoCompatFeatures(sb.ro_compat_flags).has_unknown() {
        out.force_ro = true;
    }
    if sb.version_minor() > VERSION_MINOR {
        out.needs_upgrade = true;
    }

    Ok(out)
}
