//! Format profiles and hardware policy.

use clap::ArgEnum;

use crate::error::Error;
use crate::flags::MountIntent;
use crate::hal::DeviceCaps;


const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;


/// Supported format profiles.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ArgEnum)]
pub enum Profile {
    Pico,
    System,
    Ai,
    Gaming,
    Archive,
    Usb,
    Generic,
}

impl Profile {
    pub fn from_raw(raw: u32) -> Option<Self>
    {
        match raw {
            1 => Some(Self::Pico),
            2 => Some(Self::System),
            3 => Some(Self::Ai),
            4 => Some(Self::Gaming),
            5 => Some(Self::Archive),
            6 => Some(Self::Usb),
            7 => Some(Self::Generic),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> u32
    {
        match self {
            Self::Pico => 1,
            Self::System => 2,
            Self::Ai => 3,
            Self::Gaming => 4,
            Self::Archive => 5,
            Self::Usb => 6,
            Self::Generic => 7,
        }
    }

    pub fn default_block_size(&self) -> u32
    {
        match self {
            Self::Pico => 512,
            Self::Archive => 65536,
            _ => 4096,
        }
    }

    pub fn min_capacity(&self) -> u64
    {
        match self {
            Self::Pico => MIB,
            Self::Usb => 128 * MIB,
            _ => MIB,
        }
    }

    pub fn max_capacity(&self) -> Option<u64>
    {
        match self {
            Self::Pico => Some(2 * GIB),
            _ => None,
        }
    }

    /// Resource-free mounts: no void bitmap, no quality mask, no cortex
    /// occupancy, no reconstruction cost.
    pub fn skips_resources(&self) -> bool
    {
        matches!(self, Self::Pico)
    }

    /// Profiles that keep a decoded anchor cache for fast lookups.
    pub fn wants_nano_cortex(&self) -> bool
    {
        matches!(self, Self::Ai | Self::Gaming)
    }
}


/// Rejects devices outside the profile's capacity band.
pub fn check_capacity_band(profile: Profile, capacity: u64) -> Result<(), Error>
{
    if capacity < profile.min_capacity() {
        return Err(Error::ProfileMismatch);
    }
    if let Some(max) = profile.max_capacity() {
        if capacity >= max {
            return Err(Error::ProfileMismatch);
        }
    }

    Ok(())
}


/// Zone-native constraints: the block is the zone, the volume is whole
/// zones, and there are no mirrors (enforced by the broadcast path).
pub fn zns_policy(caps: &DeviceCaps, block_size: u32) -> Result<(), Error>
{
    if !caps.hw_flags.has_zns_native() {
        return Ok(());
    }
    if caps.zone_size == 0 {
        return Err(Error::HwIo);
    }
    if block_size as u64 != caps.zone_size {
        return Err(Error::AlignmentFail);
    }
    if caps.total_capacity % caps.zone_size != 0 {
        return Err(Error::AlignmentFail);
    }

    Ok(())
}


/// Wormhole durability needs the strict flush capability end to end.
pub fn wormhole_policy(intent: MountIntent, caps: &DeviceCaps) -> Result<(), Error>
{
    if intent.has_wormhole() && !caps.hw_flags.has_strict_flush() {
        return Err(Error::HwIo);
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::INTENT_WORMHOLE;
    use crate::hal::{HwFlags, HW_STRICT_FLUSH, HW_ZNS_NATIVE};

    fn caps(cap: u64, hw: u32, zone: u64) -> DeviceCaps
    {
        DeviceCaps {
            total_capacity: cap,
            logical_block_size: 512,
            hw_flags: HwFlags(hw),
            zone_size: zone,
        }
    }

    #[test]
    fn raw_roundtrip()
    {
        for p in [
            Profile::Pico,
            Profile::System,
            Profile::Ai,
            Profile::Gaming,
            Profile::Archive,
            Profile::Usb,
            Profile::Generic,
        ] {
            assert_eq!(Profile::from_raw(p.as_raw()), Some(p));
        }
        assert_eq!(Profile::from_raw(0), None);
        assert_eq!(Profile::from_raw(99), None);
    }

    #[test]
    fn pico_band()
    {
        assert_eq!(check_capacity_band(Profile::Pico, MIB), Ok(()));
        assert_eq!(
            check_capacity_band(Profile::Pico, MIB - 1),
            Err(Error::ProfileMismatch)
        );
        assert_eq!(
            check_capacity_band(Profile::Pico, 2 * GIB),
            Err(Error::ProfileMismatch)
        );
    }

    #[test]
    fn usb_floor()
    {
        assert_eq!(check_capacity_band(Profile::Usb, 128 * MIB), Ok(()));
        assert_eq!(
            check_capacity_band(Profile::Usb, 64 * MIB),
            Err(Error::ProfileMismatch)
        );
    }

    #[test]
    fn block_size_defaults()
    {
        assert_eq!(Profile::Pico.default_block_size(), 512);
        assert_eq!(Profile::Archive.default_block_size(), 65536);
        assert_eq!(Profile::System.default_block_size(), 4096);
    }

    #[test]
    fn zns_wants_block_equal_zone()
    {
        let c = caps(1 << 20, HW_ZNS_NATIVE, 65536);

        assert_eq!(zns_policy(&c, 65536), Ok(()));
        assert_eq!(zns_policy(&c, 4096), Err(Error::AlignmentFail));
    }

    #[test]
    fn zns_wants_whole_zones()
    {
        let c = caps((1 << 20) + 512, HW_ZNS_NATIVE, 65536);

        assert_eq!(zns_policy(&c, 65536), Err(Error::AlignmentFail));
    }

    #[test]
    fn zns_ignored_on_ordinary_media()
    {
        let c = caps(1 << 20, 0, 0);

        assert_eq!(zns_policy(&c, 4096), Ok(()));
    }

    #[test]
    fn wormhole_needs_strict_flush()
    {
        let bare = caps(1 << 20, 0, 0);
        let strict = caps(1 << 20, HW_STRICT_FLUSH, 0);

        assert_eq!(
            wormhole_policy(MountIntent(INTENT_WORMHOLE), &bare),
            Err(Error::HwIo)
        );
        assert_eq!(wormhole_policy(MountIntent(INTENT_WORMHOLE), &strict), Ok(()));
        assert_eq!(wormhole_policy(MountIntent(0), &bare), Ok(()));
    }
}
