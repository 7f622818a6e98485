//! Loading of the volume's owned buffers: void bitmap, quality mask,
//! cortex occupancy and the optional nano-cortex anchor cache.

use log::warn;

use crate::bitmap::{OccupancyMap, VoidBitmap};
use crate::error::Error;
use crate::hal::Device;
use crate::ondisk::anchor::{Anchor, ANCHOR_SIZE};
use crate::ondisk::Superblock;
use crate::profile::Profile;
use crate::quality::QualityMask;
use crate::util::{align_up, ceil_div};


/// Number of leading cortex slots kept decoded for profiles that ask
/// for the cache.
pub const NANO_CORTEX_SLOTS: usize = 64;


/// Everything the volume owns in memory after a successful load.
#[derive(Debug, Default)]
pub struct Resources {
    pub void_bitmap: Option<VoidBitmap>,
    pub quality: Option<QualityMask>,
    pub occupancy: Option<OccupancyMap>,
    /// Decoded occupied cortex slots, by slot index.
    pub cortex_anchors: Vec<(usize, Anchor)>,
    pub nano_cortex: Option<Vec<Anchor>>,
}

impl Resources {
    /// The resource-free shape used by the PICO profile.
    pub fn none() -> Self
    {
        Self::default()
    }
}


/// On-disk size of the void bitmap, rounded up to whole blocks.
pub fn bitmap_bytes(sb: &Superblock) -> u64
{
    align_up(ceil_div(sb.total_blocks(), 8), sb.block_size as u64)
}


/// On-disk size of the quality mask, rounded up to whole blocks.
pub fn qmask_bytes(sb: &Superblock) -> u64
{
    align_up(ceil_div(sb.total_blocks(), 4), sb.block_size as u64)
}


/// Loads every resource the profile calls for. Read failures degrade
/// on read-only mounts and fail read-write mounts; each degrade adds a
/// point of taint.
pub fn load(
    dev: &mut dyn Device,
    sb: &Superblock,
    profile: Profile,
    read_only: bool,
) -> Result<(Resources, u32), Error>
{
    if profile.skips_resources() {
        return Ok((Resources::none(), 0));
    }

    let ss = dev.caps().logical_block_size;
    let mut out = Resources::none();
    let mut taint: u32 = 0;
    let total_blocks = sb.total_blocks();

    // Void bitmap.

    let mut raw = vec![0u8; bitmap_bytes(sb) as usize];
    match dev.sync_read(sb.bitmap_start_lba, &mut raw) {
        Ok(()) => {
            out.void_bitmap = Some(VoidBitmap::from_raw(&raw, total_blocks));
        }
        Err(_) if read_only => {
            warn!("void bitmap unreadable; continuing without it");
            taint += 1;
        }
        Err(_) => return Err(Error::BitmapCorrupt),
    }

    // Quality mask. Unreadable is survivable everywhere: assume Silver.

    let mut raw = vec![0u8; qmask_bytes(sb) as usize];
    match dev.sync_read(sb.qmask_start_lba, &mut raw) {
        Ok(()) => {
            out.quality = Some(QualityMask::from_raw(&raw, total_blocks));
        }
        Err(_) => {
            warn!("quality mask unreadable; assuming uniform silver");
            taint += 1;
            out.quality = Some(QualityMask::all_silver(total_blocks));
        }
    }

    // Cortex occupancy, and the anchors themselves while the bytes are
    // in hand.

    let cortex_bytes = (sb.bitmap_start_lba - sb.cortex_start_lba) * ss as u64;
    let mut raw = vec![0u8; cortex_bytes as usize];
    match dev.sync_read(sb.cortex_start_lba, &mut raw) {
        Ok(()) => {
            let nslots = cortex_bytes as usize / ANCHOR_SIZE;
            let mut occupancy = OccupancyMap::new(nslots);

            for slot in 0..nslots {
                let start = slot * ANCHOR_SIZE;
                let anchor = Anchor::decode(&raw[start..start + ANCHOR_SIZE])?;

                if anchor.is_occupied() {
                    occupancy.set_bit(slot);
                    out.cortex_anchors.push((slot, anchor));
                }
            }

            if profile.wants_nano_cortex() {
                let cached = nslots.min(NANO_CORTEX_SLOTS);
                let mut cache = Vec::with_capacity(cached);
                for slot in 0..cached {
                    let start = slot * ANCHOR_SIZE;
                    cache.push(Anchor::decode(&raw[start..start + ANCHOR_SIZE])?);
                }
                out.nano_cortex = Some(cache);
            }

            out.occupancy = Some(occupancy);
        }
        Err(_) if read_only => {
            warn!("cortex region unreadable; continuing without occupancy");
            taint += 1;
        }
        Err(e) => return Err(e),
    }

    Ok((out, taint))
}
