//! Superblock discovery: the Cardinal Vote across four replicas.

use log::{debug, warn};

use crate::error::Error;
use crate::flags::StateFlags;
use crate::hal::Device;
use crate::ondisk::{Superblock, BS_PROBE_LADDER, SUPERBLOCK_SIZE};
use crate::util::{align_down, align_up};
use crate::validate;


/// Two replicas of equal generation whose mount times differ by more
/// than this are treated as tampered.
pub const TAMPER_SKEW_MAX_NS: u64 = 60_000_000_000;


/// The four cardinal replica positions, in scan order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    North,
    East,
    West,
    South,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::North, Slot::East, Slot::West, Slot::South];

    pub fn label(&self) -> &'static str
    {
        match self {
            Slot::North => "north",
            Slot::East => "east",
            Slot::West => "west",
            Slot::South => "south",
        }
    }
}


/// Byte offsets of the four replicas for a given capacity and block size.
pub fn cardinal_offsets(capacity: u64, block_size: u64) -> [u64; 4]
{
    let east = align_up((capacity as u128 * 33 / 100) as u64, block_size);
    let west = align_up((capacity as u128 * 66 / 100) as u64, block_size);
    let south = align_down(capacity.saturating_sub(SUPERBLOCK_SIZE as u64), block_size);

    [0, east, west, south]
}


/// One replica that survived the candidacy checks.
#[derive(Clone, Debug)]
struct Candidate {
    slot: Slot,
    sb: Superblock,
}


/// The vote's verdict.
#[derive(Clone, Debug)]
pub struct Ballot {
    pub winner: Superblock,
    pub winner_slot: Slot,
    /// A replica pair of equal generation disagreed on CLEAN/DIRTY; the
    /// effective state is DIRTY (an interrupted unmount).
    pub split_dirty: bool,
    /// Replicas that must be rewritten with the winner's bytes on the
    /// next broadcast.
    pub repair: Vec<Slot>,
}


/// Reads one raw replica at a byte offset.
fn read_raw(dev: &mut dyn Device, offset: u64) -> Result<Vec<u8>, Error>
{
    let ss = dev.caps().logical_block_size as u64;
    let mut raw = vec![0u8; SUPERBLOCK_SIZE];

    dev.sync_read(offset / ss, &mut raw)?;

    Ok(raw)
}


/// Runs the quorum over every rung of the block-size ladder and elects
/// the authoritative superblock.
pub fn run(dev: &mut dyn Device) -> Result<Ballot, Error>
{
    let caps = dev.caps();
    let ss = caps.logical_block_size as u64;
    let zns = caps.hw_flags.has_zns_native();

    if ss == 0 || SUPERBLOCK_SIZE as u64 % ss != 0 {
        return Err(Error::Geometry);
    }

    let mut candidates: Vec<Candidate> = Vec::new();

    for probe_bs in BS_PROBE_LADDER {
        if probe_bs as u64 % ss != 0 {
            continue;
        }

        let offsets = cardinal_offsets(caps.total_capacity, probe_bs as u64);
        let mut seen: Vec<u64> = Vec::new();

        for (slot, offset) in Slot::ALL.iter().zip(offsets) {
            // Zone-native media carries no mirrors: only North counts
            // and nothing else is even probed.
            if zns && *slot != Slot::North {
                continue;
            }
            // On small media the mirror positions can collapse onto one
            // another; read each physical slot once per rung.
            if seen.contains(&offset) {
                continue;
            }
            seen.push(offset);

            if offset + SUPERBLOCK_SIZE as u64 > caps.total_capacity {
                continue;
            }

            let raw = match read_raw(dev, offset) {
                Ok(raw) => raw,
                Err(_) => {
                    debug!("replica {}@{:#x}: unreadable", slot.label(), offset);
                    continue;
                }
            };

            // Poison outranks every other verdict.
            if Superblock::is_poisoned(&raw) {
                return Err(Error::WipePending);
            }

            let sb = match Superblock::decode(&raw) {
                Ok(sb) => sb,
                Err(_) => continue,
            };

            if validate::integrity(&sb).is_err() {
                continue;
            }
            if !Superblock::crc_ok(&raw) {
                debug!("replica {}@{:#x}: checksum mismatch", slot.label(), offset);
                continue;
            }
            if sb.block_size != probe_bs {
                // Wrong rung; the matching rung will pick it up.
                continue;
            }
            if validate::geometry(&sb, &caps).is_err() {
                debug!("replica {}@{:#x}: bad geometry", slot.label(), offset);
                continue;
            }

            candidates.push(Candidate { slot: *slot, sb });
        }
    }

    if candidates.is_empty() {
        return Err(Error::BadSuperblock);
    }

    // Cross-replica consistency. Same generation implies the same
    // identity; anything else is manipulation, not wear.
    let mut split_dirty = false;

    for i in 0..candidates.len() {
        for j in i + 1..candidates.len() {
            let a = &candidates[i].sb;
            let b = &candidates[j].sb;

            if a.copy_generation != b.copy_generation {
                continue;
            }
            if a.uuid != b.uuid {
                return Err(Error::Tampered);
            }
            if a.block_size != b.block_size {
                return Err(Error::Tampered);
            }
            if a.last_mount_time.abs_diff(b.last_mount_time) > TAMPER_SKEW_MAX_NS {
                return Err(Error::Tampered);
            }

            let sa = StateFlags(a.state_flags);
            let sb_ = StateFlags(b.state_flags);
            if (sa.has_clean() && sb_.has_dirty()) || (sa.has_dirty() && sb_.has_clean()) {
                split_dirty = true;
            }
        }
    }

    // Highest generation wins; equal generations fall back to the newer
    // mount time, then to scan order.
    let mut winner = 0;
    for idx in 1..candidates.len() {
        let c = &candidates[idx].sb;
        let w = &candidates[winner].sb;

        if c.copy_generation > w.copy_generation
            || (c.copy_generation == w.copy_generation && c.last_mount_time > w.last_mount_time)
        {
            winner = idx;
        }
    }

    let winner_slot = candidates[winner].slot;
    let winner_sb = candidates[winner].sb.clone();

    let mut repair = Vec::new();
    if !zns {
        for slot in Slot::ALL {
            if slot == winner_slot {
                continue;
            }
            let current = candidates.iter().any(|c| {
                c.slot == slot
                    && c.sb.copy_generation == winner_sb.copy_generation
                    && c.sb.uuid == winner_sb.uuid
            });
            if !current {
                repair.push(slot);
            }
        }
    }

    if !repair.is_empty() {
        warn!(
            "{} replica(s) stale or dead; winner is {} (generation {})",
            repair.len(),
            winner_slot.label(),
            winner_sb.copy_generation
        );
    }

    Ok(Ballot {
        winner: winner_sb,
        winner_slot,
        split_dirty,
        repair,
    })
}
