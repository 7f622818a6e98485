use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::checksum::record_crc;
use crate::error::Error;

use super::codec;


/// Size of one epoch ring entry header.
pub const EPOCH_HEADER_SIZE: usize = 20;

/// Widest tolerated distance between the ring and the superblock before
/// the volume is written off as toxic (future direction).
pub const EPOCH_DRIFT_MAX_FUTURE: u64 = 5000;
/// Tolerated backwards drift; anything further in the past is toxic.
pub const EPOCH_DRIFT_MAX_PAST: u64 = 100;


/// Header of one epoch ring entry. The checksum covers the first 16
/// bytes of the encoding.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EpochHeader {
    pub epoch_id: u64,      // 0x00
    pub timestamp_ns: u64,  // 0x08
    pub checksum: u32,      // 0x10
}

impl EpochHeader {
    pub fn new(epoch_id: u64, timestamp_ns: u64) -> Self
    {
        let mut hdr = Self {
            epoch_id,
            timestamp_ns,
            checksum: 0,
        };
        hdr.seal();

        hdr
    }

    pub fn decode(raw: &[u8]) -> Result<Self, Error>
    {
        if raw.len() < EPOCH_HEADER_SIZE {
            return Err(Error::InternalFault);
        }

        codec().deserialize(raw).map_err(|_| Error::InternalFault)
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error>
    {
        let raw = codec().serialize(self).map_err(|_| Error::InternalFault)?;
        if raw.len() != EPOCH_HEADER_SIZE {
            return Err(Error::InternalFault);
        }

        Ok(raw)
    }

    pub fn compute_crc(&self) -> u32
    {
        let mut id_ts = [0u8; 16];
        id_ts[..8].copy_from_slice(&self.epoch_id.to_le_bytes());
        id_ts[8..].copy_from_slice(&self.timestamp_ns.to_le_bytes());

        record_crc(&id_ts)
    }

    pub fn seal(&mut self)
    {
        self.checksum = self.compute_crc();
    }

    pub fn crc_ok(&self) -> bool
    {
        self.checksum == self.compute_crc()
    }
}
