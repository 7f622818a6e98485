use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::checksum::record_crc;
use crate::error::Error;

use super::{codec, Bytes};


/// Size of one anchor record; the cortex is an array of these.
pub const ANCHOR_SIZE: usize = 128;

/// Seed id of the root anchor: the all-ones sentinel.
pub const ROOT_SEED: [u8; 16] = [0xff; 16];

// Data classes (low byte of `data_class`).
pub const CLASS_STATIC: u32 = 1;
pub const CLASS_STREAM: u32 = 2;
pub const CLASS_CHRONICLE: u32 = 3;

// Flag bits (upper bits of `data_class`).
pub const DC_VALID: u32 = 0x100;
pub const DC_TOMBSTONE: u32 = 0x200;
pub const DC_ENCRYPTED: u32 = 0x400;
pub const DC_PENDING: u32 = 0x800;


/// Combined class and flag field of an anchor (data_class).
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct DataClass(pub u32);

impl DataClass {
    pub fn class(&self) -> u32 { self.0 & 0xff }

    pub fn has_valid(&self)     -> bool { self.0 & DC_VALID != 0 }
    pub fn has_tombstone(&self) -> bool { self.0 & DC_TOMBSTONE != 0 }
    pub fn has_encrypted(&self) -> bool { self.0 & DC_ENCRYPTED != 0 }
    pub fn has_pending(&self)   -> bool { self.0 & DC_PENDING != 0 }

    pub fn get_unknown(&self) -> u32
    {
        (self.0 >> 12) << 12
    }

    pub fn has_unknown(&self) -> bool
    {
        self.get_unknown() != 0
    }
}


/// A 128-byte anchor record: the generational, content-addressed
/// descriptor of one payload object. Field order is the on-disk layout.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Anchor {
    pub seed_id: [u8; 16],      // 0x00
    pub data_class: u32,        // 0x10
    pub write_gen: u32,         // 0x14
    pub gravity_center: u64,    // 0x18: starting block index
    pub mass: u64,              // 0x20: payload length in bytes
    pub orbit: [u64; 3],        // 0x28: explicit relocation vector
    pub orbit_len: u16,         // 0x40: valid entries in `orbit`
    pub flux_epoch: u32,        // 0x42
    pub fractal_scale: u16,     // 0x46
    pub permissions: u16,       // 0x48
    pub inline_tag: Bytes<38>,  // 0x4a: name/tag payload
    pub tag_bloom: u64,         // 0x70
    pub reserved: u32,          // 0x78
    pub checksum: u32,          // 0x7c: crc32c with this field zeroed
}

impl Default for Anchor {
    fn default() -> Self
    {
        Self {
            seed_id: [0; 16],
            data_class: 0,
            write_gen: 0,
            gravity_center: 0,
            mass: 0,
            orbit: [0; 3],
            orbit_len: 0,
            flux_epoch: 0,
            fractal_scale: 0,
            permissions: 0,
            inline_tag: Bytes::zeroed(),
            tag_bloom: 0,
            reserved: 0,
            checksum: 0,
        }
    }
}

impl Anchor {
    /// A freshly-built root anchor, sealed.
    pub fn new_root() -> Self
    {
        let mut root = Self::default();
        root.seed_id = ROOT_SEED;
        root.data_class = CLASS_STATIC | DC_VALID;
        root.seal();

        root
    }

    pub fn decode(raw: &[u8]) -> Result<Self, Error>
    {
        if raw.len() < ANCHOR_SIZE {
            return Err(Error::InternalFault);
        }

        codec().deserialize(raw).map_err(|_| Error::InternalFault)
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error>
    {
        let raw = codec().serialize(self).map_err(|_| Error::InternalFault)?;
        if raw.len() != ANCHOR_SIZE {
            return Err(Error::InternalFault);
        }

        Ok(raw)
    }

    /// The checksum over the packed record with the checksum field zeroed.
    pub fn compute_crc(&self) -> u32
    {
        let mut copy = *self;
        copy.checksum = 0;

        // A 128-byte record always encodes.
        let raw = copy.encode().unwrap_or_else(|_| vec![0; ANCHOR_SIZE]);

        record_crc(&raw)
    }

    pub fn seal(&mut self)
    {
        self.checksum = self.compute_crc();
    }

    pub fn crc_ok(&self) -> bool
    {
        self.checksum == self.compute_crc()
    }

    pub fn class(&self) -> DataClass
    {
        DataClass { 0: self.data_class }
    }

    /// A slot is occupied when either identity field is non-zero; this
    /// covers pending reservations and tombstones alike.
    pub fn is_occupied(&self) -> bool
    {
        self.seed_id != [0; 16] || self.data_class != 0
    }

    /// The predicted block index of payload sequence `i`: the gravity
    /// center first, then the orbit vector, then a contiguous tail.
    pub fn predicted_block(&self, i: u64) -> u64
    {
        if i == 0 {
            return self.gravity_center;
        }

        let orbit_len = (self.orbit_len as usize).min(self.orbit.len()) as u64;
        if i <= orbit_len {
            return self.orbit[(i - 1) as usize];
        }

        self.gravity_center + i
    }

    /// How many payload blocks this anchor's mass spans, given the
    /// per-block payload capacity.
    pub fn span_blocks(&self, payload_capacity: u64) -> u64
    {
        crate::util::ceil_div(self.mass, payload_capacity)
    }
}


// Debug implementation.


impl std::fmt::Debug for DataClass {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        let mut flags: Vec<&str> = Vec::new();

        if self.has_valid() {
            flags.push("valid");
        }
        if self.has_tombstone() {
            flags.push("tombstone");
        }
        if self.has_encrypted() {
            flags.push("encrypted");
        }
        if self.has_pending() {
            flags.push("pending");
        }

        f.debug_struct("DataClass")
            .field("class", &self.class())
            .field("valid", &flags)
            .field("invalid", &self.get_unknown())
            .finish()
    }
}
