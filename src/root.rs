//! Root anchor verification and Genesis repair.

use log::warn;

use crate::error::Error;
use crate::hal::Device;
use crate::ondisk::anchor::{Anchor, ANCHOR_SIZE, CLASS_STATIC, ROOT_SEED};
use crate::ondisk::Superblock;


/// How the root anchor came out of verification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RootVerdict {
    /// Checksum and semantics both hold.
    Intact,
    /// The checksum was broken and a fresh root was written in place;
    /// the volume is degraded but usable.
    Repaired,
    /// The checksum was broken on a read-only mount; the disk is left
    /// untouched and the session carries the taint.
    Tainted,
}


/// Reads and judges the first cortex slot.
///
/// Semantic failure with a healthy checksum means the volume genuinely
/// has no root, which no repair may invent: that is `NOT_FOUND`.
pub fn verify(dev: &mut dyn Device, sb: &Superblock, writable: bool) -> Result<RootVerdict, Error>
{
    let mut raw = vec![0u8; sb.block_size as usize];
    dev.sync_read(sb.cortex_start_lba, &mut raw)?;

    let anchor = Anchor::decode(&raw[..ANCHOR_SIZE])?;

    if anchor.crc_ok() {
        let dc = anchor.class();
        let semantic_ok = anchor.seed_id == ROOT_SEED
            && dc.has_valid()
            && dc.class() == CLASS_STATIC
            && !dc.has_tombstone();

        if semantic_ok {
            return Ok(RootVerdict::Intact);
        }

        return Err(Error::NotFound);
    }

    if !writable {
        warn!("root anchor checksum invalid on a read-only mount; leaving it");
        return Ok(RootVerdict::Tainted);
    }

    // Genesis repair: rebuild the sentinel in place.
    warn!("root anchor checksum invalid; rewriting a fresh root");

    let root = Anchor::new_root();
    raw[..ANCHOR_SIZE].copy_from_slice(&root.encode()?);
    dev.sync_write(sb.cortex_start_lba, &raw)?;
    dev.barrier()?;

    Ok(RootVerdict::Repaired)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{STATE_CLEAN, STATE_METADATA_ZEROED};
    use crate::hal::RamDevice;
    use crate::ondisk::anchor::{DC_TOMBSTONE, DC_VALID};

    fn sample_sb() -> Superblock
    {
        let mut sb = Superblock::default();
        sb.block_size = 512;
        sb.total_capacity = 1 << 20;
        sb.uuid = [7; 16];
        sb.state_flags = STATE_CLEAN | STATE_METADATA_ZEROED;
        sb.epoch_start_lba = 32;
        sb.cortex_start_lba = 64;
        sb.bitmap_start_lba = 128;
        sb.qmask_start_lba = 130;
        sb.flux_start_lba = 132;
        sb.horizon_lba = 2032;

        sb
    }

    fn write_root(dev: &mut RamDevice, sb: &Superblock, anchor: &Anchor)
    {
        let mut raw = vec![0u8; 512];
        raw[..ANCHOR_SIZE].copy_from_slice(&anchor.encode().unwrap());
        dev.sync_write(sb.cortex_start_lba, &raw).unwrap();
    }

    #[test]
    fn intact_root_passes()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let sb = sample_sb();
        write_root(&mut dev, &sb, &Anchor::new_root());

        assert_eq!(verify(&mut dev, &sb, true), Ok(RootVerdict::Intact));
    }

    #[test]
    fn missing_valid_flag_is_not_found()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let sb = sample_sb();

        let mut root = Anchor::new_root();
        root.data_class = CLASS_STATIC; // VALID stripped
        root.seal();
        write_root(&mut dev, &sb, &root);

        assert_eq!(verify(&mut dev, &sb, true), Err(Error::NotFound));
    }

    #[test]
    fn tombstoned_root_is_not_found()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let sb = sample_sb();

        let mut root = Anchor::new_root();
        root.data_class = CLASS_STATIC | DC_VALID | DC_TOMBSTONE;
        root.seal();
        write_root(&mut dev, &sb, &root);

        assert_eq!(verify(&mut dev, &sb, true), Err(Error::NotFound));
    }

    #[test]
    fn broken_crc_repairs_on_writable_mount()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let sb = sample_sb();

        let mut root = Anchor::new_root();
        root.checksum ^= 0xdead;
        write_root(&mut dev, &sb, &root);

        assert_eq!(verify(&mut dev, &sb, true), Ok(RootVerdict::Repaired));

        // The disk now carries a healthy sentinel.
        assert_eq!(verify(&mut dev, &sb, true), Ok(RootVerdict::Intact));
    }

    #[test]
    fn broken_crc_tolerated_read_only()
    {
        let mut dev = RamDevice::new(1 << 20, 512);
        let sb = sample_sb();

        let mut root = Anchor::new_root();
        root.checksum ^= 0xdead;
        write_root(&mut dev, &sb, &root);

        assert_eq!(verify(&mut dev, &sb, false), Ok(RootVerdict::Tainted));

        // Nothing was written: a second read-only pass sees the same.
        assert_eq!(verify(&mut dev, &sb, false), Ok(RootVerdict::Tainted));
    }
}
