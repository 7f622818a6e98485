use bincode::{DefaultOptions, Options};
use serde::{Deserialize, Serialize};

use crate::checksum::record_crc;
use crate::error::Error;

mod bytes;

pub mod anchor;
pub mod block;
pub mod epoch;

pub use bytes::Bytes;


/// "HYDRA_N4", read as a little-endian u64.
pub const SUPERBLOCK_MAGIC: u64 = 0x48594452415F4E34;
/// Size of one superblock replica on disk.
pub const SUPERBLOCK_SIZE: usize = 8192;

pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;

pub const MIN_BLOCK_SIZE: u32 = 512;
/// Engine ceiling; larger power-of-two sizes are rejected as geometry.
pub const MAX_BLOCK_SIZE: u32 = 64 * 1024 * 1024;

/// The block-size ladder probed during superblock discovery.
pub const BS_PROBE_LADDER: [u32; 5] = [512, 4096, 8192, 16384, 65536];

pub const MAX_GENERATION: u64 = u64::MAX;

/// A wipe-pending slot starts with four little-endian 0xDEADBEEF words.
pub const POISON_BYTES: [u8; 16] = [
    0xef, 0xbe, 0xad, 0xde, 0xef, 0xbe, 0xad, 0xde,
    0xef, 0xbe, 0xad, 0xde, 0xef, 0xbe, 0xad, 0xde,
];


pub const fn pack_version(major: u16, minor: u16) -> u32
{
    ((major as u32) << 16) | minor as u32
}


/// The fixed little-endian codec every on-disk record goes through.
pub(crate) fn codec() -> impl Options
{
    DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}


/// The HN4 superblock, replicated at the four cardinal offsets.
/// Field order is the on-disk layout; everything is little-endian.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Superblock {
    pub magic: u64,                 // 0x000
    pub version: u32,               // 0x008: major << 16 | minor
    pub block_size: u32,            // 0x00c
    pub total_capacity: u64,        // 0x010: bytes
    pub uuid: [u8; 16],             // 0x018
    pub state_flags: u32,           // 0x028
    pub format_profile: u32,        // 0x02c
    pub copy_generation: u64,       // 0x030
    pub last_mount_time: u64,       // 0x038: nanoseconds
    pub current_epoch_id: u64,      // 0x040
    pub epoch_start_lba: u64,       // 0x048: sector
    pub epoch_ring_block_idx: u64,  // 0x050: absolute block index
    pub cortex_start_lba: u64,      // 0x058: sector
    pub bitmap_start_lba: u64,      // 0x060: sector
    pub qmask_start_lba: u64,       // 0x068: sector
    pub flux_start_lba: u64,        // 0x070: sector
    pub horizon_lba: u64,           // 0x078: sector
    pub compat_flags: u32,          // 0x080
    pub ro_compat_flags: u32,       // 0x084
    pub incompat_flags: u32,        // 0x088
    pub mount_intent: u32,          // 0x08c
    pub hw_flags: u32,              // 0x090
    pub pad0: u32,                  // 0x094
    pub dirty_bits: u64,            // 0x098: bit 63 = forever-dirty, bit 0 = session
    pub journal_start_lba: u64,     // 0x0a0
    pub journal_len_blocks: u64,    // 0x0a8
    pub label: Bytes<64>,           // 0x0b0
    pub reserved: Bytes<7948>,      // 0x0f0
    pub checksum: u32,              // 0x1ffc: crc32c over everything above
}

impl Default for Superblock {
    fn default() -> Self
    {
        Self {
            magic: SUPERBLOCK_MAGIC,
            version: pack_version(VERSION_MAJOR, VERSION_MINOR),
            block_size: 0,
            total_capacity: 0,
            uuid: [0; 16],
            state_flags: 0,
            format_profile: 0,
            copy_generation: 0,
            last_mount_time: 0,
            current_epoch_id: 0,
            epoch_start_lba: 0,
            epoch_ring_block_idx: 0,
            cortex_start_lba: 0,
            bitmap_start_lba: 0,
            qmask_start_lba: 0,
            flux_start_lba: 0,
            horizon_lba: 0,
            compat_flags: 0,
            ro_compat_flags: 0,
            incompat_flags: 0,
            mount_intent: 0,
            hw_flags: 0,
            pad0: 0,
            dirty_bits: 0,
            journal_start_lba: 0,
            journal_len_blocks: 0,
            label: Bytes::zeroed(),
            reserved: Bytes::zeroed(),
            checksum: 0,
        }
    }
}

impl Superblock {
    /// Decodes a replica from its raw bytes. Only the codec can fail
    /// here; semantic validation is the validator's job.
    pub fn decode(raw: &[u8]) -> Result<Self, Error>
    {
        if raw.len() < SUPERBLOCK_SIZE {
            return Err(Error::BadSuperblock);
        }

        codec().deserialize(raw).map_err(|_| Error::BadSuperblock)
    }

    /// Encodes the replica to its exact on-disk representation.
    pub fn encode(&self) -> Result<Vec<u8>, Error>
    {
        let raw = codec().serialize(self).map_err(|_| Error::InternalFault)?;
        if raw.len() != SUPERBLOCK_SIZE {
            return Err(Error::InternalFault);
        }

        Ok(raw)
    }

    /// Recomputes and stores the trailing checksum; returns the sealed
    /// bytes ready for broadcast.
    pub fn seal(&mut self) -> Result<Vec<u8>, Error>
    {
        let mut raw = self.encode()?;
        let crc = record_crc(&raw[..SUPERBLOCK_SIZE - 4]);

        self.checksum = crc;
        raw[SUPERBLOCK_SIZE - 4..].copy_from_slice(&crc.to_le_bytes());

        Ok(raw)
    }

    /// Verifies the trailing checksum against the raw replica bytes.
    pub fn crc_ok(raw: &[u8]) -> bool
    {
        if raw.len() < SUPERBLOCK_SIZE {
            return false;
        }

        let stored = u32::from_le_bytes([
            raw[SUPERBLOCK_SIZE - 4],
            raw[SUPERBLOCK_SIZE - 3],
            raw[SUPERBLOCK_SIZE - 2],
            raw[SUPERBLOCK_SIZE - 1],
        ]);

        stored == record_crc(&raw[..SUPERBLOCK_SIZE - 4])
    }

    /// True if the slot carries the secure-wipe poison pattern.
    pub fn is_poisoned(raw: &[u8]) -> bool
    {
        raw.len() >= POISON_BYTES.len() && raw[..POISON_BYTES.len()] == POISON_BYTES
    }

    pub fn version_major(&self) -> u16
    {
        (self.version >> 16) as u16
    }

    pub fn version_minor(&self) -> u16
    {
        (self.version & 0xffff) as u16
    }

    // Derived geometry. Sector/block conversions assume a validated
    // superblock (block_size a non-zero multiple of the sector size).

    pub fn sectors_per_block(&self, sector_size: u32) -> u64
    {
        self.block_size as u64 / sector_size as u64
    }

    pub fn total_blocks(&self) -> u64
    {
        self.total_capacity / self.block_size as u64
    }

    pub fn epoch_start_block(&self, sector_size: u32) -> u64
    {
        self.epoch_start_lba / self.sectors_per_block(sector_size)
    }

    pub fn cortex_start_block(&self, sector_size: u32) -> u64
    {
        self.cortex_start_lba / self.sectors_per_block(sector_size)
    }

    pub fn bitmap_start_block(&self, sector_size: u32) -> u64
    {
        self.bitmap_start_lba / self.sectors_per_block(sector_size)
    }

    pub fn qmask_start_block(&self, sector_size: u32) -> u64
    {
        self.qmask_start_lba / self.sectors_per_block(sector_size)
    }

    pub fn flux_start_block(&self, sector_size: u32) -> u64
    {
        self.flux_start_lba / self.sectors_per_block(sector_size)
    }

    pub fn horizon_block(&self, sector_size: u32) -> u64
    {
        self.horizon_lba / self.sectors_per_block(sector_size)
    }

    /// The volume label up to the first NUL, lossily decoded.
    pub fn label_str(&self) -> String
    {
        let bytes = self.label.as_slice();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());

        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_size_is_exact()
    {
        let sb = Superblock::default();
        let raw = sb.encode().unwrap();

        assert_eq!(raw.len(), SUPERBLOCK_SIZE);
    }

    #[test]
    fn field_offsets()
    {
        let mut sb = Superblock::default();
        sb.block_size = 0x11223344;
        sb.dirty_bits = 0xa1a2a3a4a5a6a7a8;
        sb.checksum = 0xcafebabe;

        let raw = sb.encode().unwrap();

        // magic at 0x000, little-endian.
        assert_eq!(&raw[0..8], &SUPERBLOCK_MAGIC.to_le_bytes());
        // block_size at 0x00c.
        assert_eq!(&raw[0x0c..0x10], &0x11223344u32.to_le_bytes());
        // dirty_bits at 0x098.
        assert_eq!(&raw[0x98..0xa0], &0xa1a2a3a4a5a6a7a8u64.to_le_bytes());
        // label at 0x0b0, checksum at the very tail.
        assert_eq!(&raw[0x1ffc..], &0xcafebabeu32.to_le_bytes());
    }

    #[test]
    fn seal_then_verify()
    {
        let mut sb = Superblock::default();
        sb.block_size = 4096;
        sb.copy_generation = 7;

        let raw = sb.seal().unwrap();

        assert!(Superblock::crc_ok(&raw));

        let back = Superblock::decode(&raw).unwrap();
        assert_eq!(back, sb);
    }

    #[test]
    fn corrupt_byte_fails_crc()
    {
        let mut sb = Superblock::default();
        let mut raw = sb.seal().unwrap();
        raw[100] ^= 0x01;

        assert!(!Superblock::crc_ok(&raw));
    }

    #[test]
    fn poison_detected_exactly()
    {
        let mut raw = vec![0u8; SUPERBLOCK_SIZE];
        raw[..16].copy_from_slice(&POISON_BYTES);

        assert!(Superblock::is_poisoned(&raw));

        // One byte off is not poison.
        raw[3] = 0xdd;
        assert!(!Superblock::is_poisoned(&raw));
    }

    #[test]
    fn version_unpacks()
    {
        let mut sb = Superblock::default();
        sb.version = pack_version(3, 9);

        assert_eq!(sb.version_major(), 3);
        assert_eq!(sb.version_minor(), 9);
    }

    #[test]
    fn label_decodes_to_first_nul()
    {
        let mut sb = Superblock::default();
        sb.label = Bytes::from_slice(b"scratch-vol");

        assert_eq!(sb.label_str(), "scratch-vol");
    }
}
