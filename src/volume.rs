//! The volume handle and its lifecycle: mount, read, unmount.

use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info, warn};

use crate::checksum::CpuFeatures;
use crate::error::Error;
use crate::flags::*;
use crate::hal::Device;
use crate::ondisk::anchor::Anchor;
use crate::ondisk::block::{payload_capacity, BLOCK_HEADER_SIZE};
use crate::ondisk::{Superblock, MAX_GENERATION, SUPERBLOCK_SIZE};
use crate::profile::{self, Profile};
use crate::recon::{self, ReconReport};
use crate::resources::{self, Resources};
use crate::ring::{self, DriftVerdict};
use crate::root::{self, RootVerdict};
use crate::state;
use crate::validate;
use crate::vote::{self, cardinal_offsets};


/// Read flag: an encrypted anchor may be read without the decryption
/// layer; the caller gets ciphertext.
pub const READ_ALLOW_ENCRYPTED: u32 = 0x1;


/// Caller-side mount parameters.
#[derive(Copy, Clone, Debug)]
pub struct MountParams {
    /// INTENT_* bits; additive on top of the persisted intent.
    pub mount_flags: u32,
    /// 0 lax, 1 default, 2 paranoid.
    pub integrity_level: u8,
}

impl Default for MountParams {
    fn default() -> Self
    {
        Self {
            mount_flags: 0,
            integrity_level: 1,
        }
    }
}


/// Mutable per-session health record.
#[derive(Debug)]
pub struct Health {
    /// Anomalies tolerated since mount.
    pub taint: u32,
    pub ref_count: AtomicU32,
}


/// An exclusively-owned handle over a mounted volume. The device is a
/// borrowed collaborator: it outlives the handle and takes it back at
/// unmount.
pub struct Volume<'d> {
    pub(crate) dev: &'d mut dyn Device,
    pub sb: Superblock,
    pub read_only: bool,
    /// Read-only was imposed by the volume state, not the caller.
    pub forced_ro: bool,
    virtual_session: bool,
    dirty_marked: bool,
    pub intent: MountIntent,
    pub integrity_level: u8,
    pub profile: Profile,
    pub health: Health,
    pub(crate) resources: Resources,
    // Derived geometry, fixed for the session.
    pub block_size: u32,
    pub sector_size: u32,
    pub sectors_per_block: u64,
    pub cpu: CpuFeatures,
    /// Present when a reconstruction pass ran.
    pub recon: Option<ReconReport>,
}

impl<'d> std::fmt::Debug for Volume<'d> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Volume")
            .field("sb", &self.sb)
            .field("read_only", &self.read_only)
            .field("forced_ro", &self.forced_ro)
            .field("virtual_session", &self.virtual_session)
            .field("dirty_marked", &self.dirty_marked)
            .field("intent", &self.intent)
            .field("integrity_level", &self.integrity_level)
            .field("profile", &self.profile)
            .field("health", &self.health)
            .field("block_size", &self.block_size)
            .field("sector_size", &self.sector_size)
            .field("sectors_per_block", &self.sectors_per_block)
            .field("cpu", &self.cpu)
            .field("recon", &self.recon)
            .finish()
    }
}

impl<'d> Volume<'d> {
    pub fn taint(&self) -> u32
    {
        self.health.taint
    }

    pub fn ref_count(&self) -> u32
    {
        self.health.ref_count.load(Ordering::Acquire)
    }

    /// Allocated block count, when the void bitmap is loaded.
    pub fn allocated_blocks(&self) -> Option<u64>
    {
        self.resources.void_bitmap.as_ref().map(|b| b.count_set())
    }

    /// Occupied cortex slot count, when the occupancy map is loaded.
    pub fn occupied_anchors(&self) -> Option<usize>
    {
        self.resources.occupancy.as_ref().map(|o| o.count_set())
    }

    /// True for an ephemeral session that never touches the device.
    pub fn is_virtual(&self) -> bool
    {
        self.virtual_session
    }

    pub(crate) fn acquire(&self)
    {
        self.health.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self)
    {
        self.health.ref_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Reads one payload block of `anchor` into `buf` after the full
    /// identity and integrity ladder. Returns the payload length copied.
    pub fn read_block_atomic(
        &mut self,
        anchor: &Anchor,
        block_idx: u64,
        buf: &mut [u8],
        flags: u32,
    ) -> Result<usize, Error>
    {
        let dc = anchor.class();

        if !dc.has_valid() || dc.has_tombstone() {
            return Err(Error::AccessDenied);
        }
        if dc.has_encrypted() && flags & READ_ALLOW_ENCRYPTED == 0 {
            return Err(Error::AccessDenied);
        }
        if anchor.mass == 0 {
            return Err(Error::DataRot);
        }

        let cap = payload_capacity(self.block_size);
        if block_idx >= anchor.span_blocks(cap) {
            return Err(Error::InvalidArgument);
        }

        let pos = anchor.predicted_block(block_idx);
        let flux_start = self.sb.flux_start_block(self.sector_size);
        let horizon = self.sb.horizon_block(self.sector_size);
        if pos < flux_start || pos >= horizon {
            return Err(Error::PhantomBlock);
        }

        if let Some(bitmap) = &self.resources.void_bitmap {
            if !bitmap.check_bit(pos) {
                // Never written, or lost and never resurrected.
                return Err(Error::Uninitialized);
            }
        }

        let mut raw = vec![0u8; self.block_size as usize];
        self.dev.sync_read(pos * self.sectors_per_block, &mut raw)?;

        let expected_len = (anchor.mass - block_idx * cap).min(cap) as usize;
        let verify_data = self.integrity_level >= 1;
        recon::verify_block(&raw, anchor, block_idx, expected_len, verify_data)?;

        let n = expected_len.min(buf.len());
        buf[..n].copy_from_slice(&raw[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + n]);

        Ok(n)
    }
}


/// Takes a raw device through discovery, validation, state evaluation,
/// resource loading, root verification and (when called for) zero-scan
/// reconstruction, then marks the session dirty and hands out the
/// exclusive handle.
///
/// A failed mount performs no writes: every surfaced error fires before
/// the first byte hits the device.
pub fn mount(dev: &mut dyn Device, params: MountParams) -> Result<Volume<'_>, Error>
{
    let caps = dev.caps();
    let zns = caps.hw_flags.has_zns_native();
    let cpu = CpuFeatures::probe();

    // Discovery and static validation.

    let ballot = vote::run(dev)?;
    let mut sb = ballot.winner.clone();
    let mut validated = validate::validate(&sb, &caps)?;

    let profile = Profile::from_raw(sb.format_profile).ok_or(Error::ProfileMismatch)?;
    profile::zns_policy(&caps, sb.block_size)?;

    let intent = MountIntent::resolve(sb.mount_intent, params.mount_flags);
    profile::wormhole_policy(intent, &caps)?;

    // Epoch ring drift. Toxic drift surfaces; the survivable verdicts
    // fold into the read-only decision.

    let mut taint: u32 = 0;
    let mut panic_marker = false;

    match ring::check(dev, &sb)? {
        DriftVerdict::Steady => (),
        DriftVerdict::EpochLost => {
            validated.force_ro = true;
            panic_marker = true;
            taint += 1;
        }
        DriftVerdict::TimeDilation(delta) => {
            warn!("epoch ring is {} epoch(s) ahead; forcing read-only", delta);
            validated.force_ro = true;
            taint += 10;
        }
    }

    // State evaluation.

    let decision = state::evaluate(sb.state_flags, intent, ballot.split_dirty, &validated)?;
    taint += decision.taint;
    sb.state_flags = decision.state;
    if panic_marker {
        // Forensic marker, in-memory only; force-RO keeps it off disk.
        sb.state_flags |= STATE_PANIC;
    }

    // Owned resources.

    let (mut loaded, resource_taint) = resources::load(dev, &sb, profile, decision.read_only)?;
    taint += resource_taint;

    // Root anchor.

    let writable = !decision.read_only && !intent.has_virtual();
    match root::verify(dev, &sb, writable)? {
        RootVerdict::Intact => (),
        RootVerdict::Repaired => sb.state_flags |= STATE_DEGRADED,
        RootVerdict::Tainted => taint += 1,
    }

    // Reconstruction, when the session ended dirty (or paranoia asks).

    let mut recon_report = None;
    if writable && !profile.skips_resources() && (decision.was_dirty || params.integrity_level >= 2)
    {
        if let Some(bitmap) = loaded.void_bitmap.as_mut() {
            let anchors = std::mem::take(&mut loaded.cortex_anchors);
            let report = recon::zero_scan(dev, &sb, &anchors, bitmap, loaded.quality.as_mut())?;
            loaded.cortex_anchors = anchors;

            taint += report.ghosts as u32;
            recon_report = Some(report);
        }
    }

    // Dirty-mark: the one write that commits the mount.

    let mut dirty_marked = false;
    if decision.dirty_mark {
        let mut disk_sb = sb.clone();
        disk_sb.dirty_bits |= DIRTY_SESSION;
        disk_sb.last_mount_time = dev.now_ns();

        let raw = disk_sb.seal()?;
        broadcast(dev, &raw, &disk_sb, zns)?;

        if !ballot.repair.is_empty() {
            info!(
                "dirty-mark broadcast also repaired {} stale replica(s)",
                ballot.repair.len()
            );
        }

        sb = disk_sb;
        dirty_marked = true;
    }

    info!(
        "mounted {} ({}): generation {}, epoch {}{}",
        sb.label_str(),
        sb.uuid.iter().map(|b| format!("{:02x}", b)).collect::<String>(),
        sb.copy_generation,
        sb.current_epoch_id,
        if decision.read_only { ", read-only" } else { "" }
    );

    let sector_size = caps.logical_block_size;

    Ok(Volume {
        sector_size,
        block_size: sb.block_size,
        sectors_per_block: sb.sectors_per_block(sector_size),
        dev,
        read_only: decision.read_only,
        forced_ro: decision.forced_ro,
        virtual_session: intent.has_virtual(),
        dirty_marked,
        intent,
        integrity_level: params.integrity_level,
        profile,
        health: Health {
            taint,
            ref_count: AtomicU32::new(1),
        },
        resources: loaded,
        cpu,
        recon: recon_report,
        sb,
    })
}


/// Releases the handle back to durable storage. Read-only and virtual
/// sessions drop their buffers and touch nothing; a dirty session
/// flushes its resources, advances the epoch and broadcasts the clean
/// superblock.
pub fn unmount(mut vol: Volume<'_>) -> Result<(), Error>
{
    if vol.ref_count() != 1 {
        return Err(Error::Busy);
    }

    if !vol.dirty_marked {
        debug!(
            "unmount without persistence ({})",
            if vol.is_virtual() { "virtual session" } else { "read-only" }
        );
        return Ok(());
    }

    let caps = vol.dev.caps();
    let zns = caps.hw_flags.has_zns_native();
    let now = vol.dev.now_ns();

    // On zone-native media everything outside zone 0 belongs to the
    // sequential-write discipline: only the primary replica is touched.
    if !zns {
        // Flush owned resources ahead of the epoch fence.

        if let Some(bitmap) = &vol.resources.void_bitmap {
            let raw = bitmap.to_raw(resources::bitmap_bytes(&vol.sb) as usize);
            vol.dev.sync_write(vol.sb.bitmap_start_lba, &raw)?;
        }
        if let Some(quality) = &vol.resources.quality {
            let raw = quality.to_raw(resources::qmask_bytes(&vol.sb) as usize);
            vol.dev.sync_write(vol.sb.qmask_start_lba, &raw)?;
        }
        vol.dev.barrier()?;

        // The entry for epoch N+1 must be durable before any superblock
        // citing N+1 exists anywhere.

        let (ring_idx, epoch_id) = ring::advance(vol.dev, &vol.sb, now)?;
        vol.sb.current_epoch_id = epoch_id;
        vol.sb.epoch_ring_block_idx = ring_idx;
    }

    let sb = &mut vol.sb;
    sb.copy_generation = sb.copy_generation.saturating_add(1);
    if sb.copy_generation == MAX_GENERATION {
        warn!("generation counter saturated; locking the volume");
        sb.state_flags |= STATE_LOCKED;
    }

    sb.state_flags &= !(STATE_DIRTY | STATE_UNMOUNTING);
    let flags = StateFlags(sb.state_flags);
    if !flags.has_panic() && !flags.has_toxic() {
        sb.state_flags |= STATE_CLEAN;
    }

    sb.last_mount_time = now;
    sb.dirty_bits &= !DIRTY_SESSION;
    if vol.health.taint > 0 {
        sb.dirty_bits |= DIRTY_FOREVER;
    }

    let raw = sb.seal()?;
    broadcast(vol.dev, &raw, sb, zns)
}


/// Writes a sealed superblock to North and every admitted mirror, each
/// write individually fenced, and evaluates the quorum afterwards.
pub(crate) fn broadcast(dev: &mut dyn Device, raw: &[u8], sb: &Superblock, zns: bool) -> Result<(), Error>
{
    debug_assert_eq!(raw.len(), SUPERBLOCK_SIZE);

    let ss = dev.caps().logical_block_size as u64;

    if zns {
        // Zone-native media: no mirrors, and zone 0 must be reset
        // before its rewrite.
        dev.reset_zone(0)?;
        dev.sync_write(0, raw)?;
        dev.barrier()?;

        return Ok(());
    }

    let offsets = cardinal_offsets(sb.total_capacity, sb.block_size as u64);
    let mut north_ok = false;
    let mut total = 0u32;

    for (i, offset) in offsets.iter().enumerate() {
        if offsets[..i].contains(offset) {
            continue;
        }

        let ok = dev.sync_write(offset / ss, raw).is_ok() && dev.barrier().is_ok();
        if ok {
            total += 1;
            if i == 0 {
                north_ok = true;
            }
        } else {
            warn!("superblock broadcast to offset {:#x} failed", offset);
        }
    }

    if (north_ok && total >= 2) || (!north_ok && total >= 3) {
        Ok(())
    } else {
        Err(Error::HwIo)
    }
}
