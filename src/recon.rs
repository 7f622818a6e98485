//! Zero-scan reconstruction after an unclean shutdown.
//!
//! The cortex survives a crash; the void bitmap often does not. For
//! every occupied anchor the scan revisits the predicted payload
//! positions and resurrects the bitmap bit of each block that can prove
//! its identity, timeline and integrity. Anything less stays dead:
//! resurrecting a plausible-but-wrong block is how volumes rot.

use log::{debug, info};

use crate::bitmap::VoidBitmap;
use crate::checksum::record_crc;
use crate::error::Error;
use crate::hal::Device;
use crate::ondisk::anchor::Anchor;
use crate::ondisk::block::{payload_capacity, BlockHeader, BLOCK_HEADER_SIZE, BLOCK_MAGIC};
use crate::ondisk::Superblock;
use crate::quality::QualityMask;
use crate::split64;


/// Tally of one reconstruction pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconReport {
    /// Blocks whose bitmap bit was resurrected.
    pub ghosts: u64,
    /// Predicted positions that failed at least one check.
    pub phantoms: u64,
    /// Resurrected blocks whose quality entry was raised from toxic.
    pub healed: u64,
}


/// Judges one raw block against its owning anchor: framing, identity,
/// timeline, then payload. Shared between reconstruction and the read
/// path, which map the distinct kinds differently.
pub(crate) fn verify_block(
    raw: &[u8],
    anchor: &Anchor,
    seq: u64,
    expected_len: usize,
    verify_data: bool,
) -> Result<(), Error>
{
    let hdr = BlockHeader::decode(&raw[..BLOCK_HEADER_SIZE]).map_err(|_| Error::DataRot)?;

    if hdr.magic != BLOCK_MAGIC {
        return Err(Error::DataRot);
    }
    if !hdr.crc_ok() {
        return Err(Error::DataRot);
    }
    if hdr.well_id != anchor.seed_id {
        return Err(Error::PhantomBlock);
    }
    if hdr.sequence_index != seq {
        return Err(Error::PhantomBlock);
    }

    // The block stores a 64-bit generation; the anchor's is 32. Any
    // high bits mean the block came from a different numbering regime
    // entirely, no matter what the low half says.
    let (gen_hi, gen_lo) = split64!(hdr.generation);
    if gen_hi != 0 || gen_lo != anchor.write_gen {
        return Err(Error::GenerationSkew);
    }

    if verify_data {
        let data = &raw[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + expected_len];
        if record_crc(data) != hdr.data_crc {
            return Err(Error::DataRot);
        }
    }

    Ok(())
}


/// Scans every occupied anchor's predicted positions and repairs the
/// void bitmap. Bits already set outside the scanned ranges are left
/// alone; a leak is cheaper than a bad scrub.
pub fn zero_scan(
    dev: &mut dyn Device,
    sb: &Superblock,
    anchors: &[(usize, Anchor)],
    bitmap: &mut VoidBitmap,
    mut quality: Option<&mut QualityMask>,
) -> Result<ReconReport, Error>
{
    let ss = dev.caps().logical_block_size;
    let spb = sb.sectors_per_block(ss);
    let flux_start = sb.flux_start_block(ss);
    let horizon = sb.horizon_block(ss);
    let cap = payload_capacity(sb.block_size);

    let mut report = ReconReport::default();
    let mut raw = vec![0u8; sb.block_size as usize];

    for (slot, anchor) in anchors {
        let dc = anchor.class();
        if !dc.has_valid() || dc.has_tombstone() || anchor.mass == 0 {
            continue;
        }

        let span = anchor.span_blocks(cap);
        debug!("scanning anchor in slot {} across {} block(s)", slot, span);

        for seq in 0..span {
            let pos = anchor.predicted_block(seq);

            if pos < flux_start || pos >= horizon || pos >= bitmap.len() {
                report.phantoms += 1;
                continue;
            }
            if dev.sync_read(pos * spb, &mut raw).is_err() {
                report.phantoms += 1;
                continue;
            }

            let remaining = anchor.mass - seq * cap;
            let expected_len = remaining.min(cap) as usize;

            if verify_block(&raw, anchor, seq, expected_len, true).is_err() {
                report.phantoms += 1;
                continue;
            }

            if !bitmap.check_bit(pos) {
                bitmap.set_bit(pos);
                report.ghosts += 1;

                if let Some(q) = quality.as_deref_mut() {
                    if q.heal(pos) {
                        report.healed += 1;
                    }
                }
            }
        }
    }

    if report.ghosts > 0 {
        info!(
            "reconstruction resurrected {} block(s), rejected {}",
            report.ghosts, report.phantoms
        );
    }

    Ok(report)
}
