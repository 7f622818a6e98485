use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::checksum::record_crc;
use crate::error::Error;

use super::codec;


/// "N4BK", read as a little-endian u32.
pub const BLOCK_MAGIC: u32 = 0x4b42344e;

/// Size of the header framing every payload block.
pub const BLOCK_HEADER_SIZE: usize = 44;


/// Per-block payload capacity for a given block size.
pub fn payload_capacity(block_size: u32) -> u64
{
    block_size as u64 - BLOCK_HEADER_SIZE as u64
}


/// Header framing one payload block in the flux region. The header
/// checksum covers the first 40 bytes of the encoding.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub magic: u32,           // 0x00
    pub well_id: [u8; 16],    // 0x04: owning anchor's seed id
    pub sequence_index: u64,  // 0x14
    pub generation: u64,      // 0x1c: low 32 bits mirror the anchor's write_gen
    pub data_crc: u32,        // 0x24
    pub header_crc: u32,      // 0x28
}

impl Default for BlockHeader {
    fn default() -> Self
    {
        Self {
            magic: BLOCK_MAGIC,
            well_id: [0; 16],
            sequence_index: 0,
            generation: 0,
            data_crc: 0,
            header_crc: 0,
        }
    }
}

impl BlockHeader {
    pub fn decode(raw: &[u8]) -> Result<Self, Error>
    {
        if raw.len() < BLOCK_HEADER_SIZE {
            return Err(Error::InternalFault);
        }

        codec().deserialize(raw).map_err(|_| Error::InternalFault)
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error>
    {
        let raw = codec().serialize(self).map_err(|_| Error::InternalFault)?;
        if raw.len() != BLOCK_HEADER_SIZE {
            return Err(Error::InternalFault);
        }

        Ok(raw)
    }

    pub fn compute_crc(&self) -> u32
    {
        let mut copy = *self;
        copy.header_crc = 0;
        let raw = copy.encode().unwrap_or_else(|_| vec![0; BLOCK_HEADER_SIZE]);

        record_crc(&raw[..BLOCK_HEADER_SIZE - 4])
    }

    pub fn seal(&mut self)
    {
        self.header_crc = self.compute_crc();
    }

    pub fn crc_ok(&self) -> bool
    {
        self.header_crc == self.compute_crc()
    }
}
