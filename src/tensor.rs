//! Tensor streams: ordered payload access over a committed anchor.
//!
//! A stream is plain cursor state; every operation goes back through
//! the owning volume, whose reference count pins the session open until
//! the last stream closes.

use log::debug;

use crate::error::Error;
use crate::ondisk::anchor::{Anchor, ANCHOR_SIZE};
use crate::ondisk::block::payload_capacity;
use crate::volume::Volume;


/// An open stream over one anchor's payload.
#[derive(Debug)]
pub struct TensorStream {
    pub anchor: Anchor,
    cursor: u64,
}

impl TensorStream {
    /// Current byte position within the payload.
    pub fn position(&self) -> u64
    {
        self.cursor
    }

    pub fn remaining(&self) -> u64
    {
        self.anchor.mass - self.cursor
    }
}


/// Finds an anchor by seed id: the nano-cortex cache first, then the
/// decoded occupancy set, then the raw cortex for resource-free mounts.
fn find_anchor(vol: &mut Volume<'_>, seed_id: &[u8; 16]) -> Result<Option<Anchor>, Error>
{
    if let Some(cache) = &vol.resources.nano_cortex {
        if let Some(anchor) = cache.iter().find(|a| a.seed_id == *seed_id) {
            return Ok(Some(*anchor));
        }
    }

    if vol.resources.occupancy.is_some() {
        let found = vol
            .resources
            .cortex_anchors
            .iter()
            .find(|(_, a)| a.seed_id == *seed_id)
            .map(|(_, a)| *a);

        return Ok(found);
    }

    // Resource-free profile: walk the cortex block by block.
    debug!("anchor lookup without occupancy; scanning the cortex");

    let spb = vol.sectors_per_block;
    let first = vol.sb.cortex_start_block(vol.sector_size);
    let end = vol.sb.bitmap_start_block(vol.sector_size);
    let mut raw = vec![0u8; vol.block_size as usize];

    for block in first..end {
        vol.dev.sync_read(block * spb, &mut raw)?;

        for chunk in raw.chunks_exact(ANCHOR_SIZE) {
            let anchor = Anchor::decode(chunk)?;
            if anchor.is_occupied() && anchor.seed_id == *seed_id {
                return Ok(Some(anchor));
            }
        }
    }

    Ok(None)
}


/// Opens a stream over the anchor carrying `seed_id` and pins the
/// volume. A reservation that never committed or a tombstone is no
/// stream at all, and an empty mass is rot, not emptiness: committed
/// payloads always have extent.
pub fn tensor_open(vol: &mut Volume<'_>, seed_id: &[u8; 16]) -> Result<TensorStream, Error>
{
    let anchor = find_anchor(vol, seed_id)?.ok_or(Error::NotFound)?;
    let dc = anchor.class();

    if !dc.has_valid() || dc.has_tombstone() {
        return Err(Error::NotFound);
    }
    if dc.has_encrypted() {
        return Err(Error::AccessDenied);
    }
    if anchor.mass == 0 {
        return Err(Error::DataRot);
    }
    if !anchor.crc_ok() {
        return Err(Error::DataRot);
    }

    vol.acquire();

    Ok(TensorStream { anchor, cursor: 0 })
}


/// Reads forward from the stream cursor. Returns the bytes copied;
/// zero means the payload is exhausted.
pub fn tensor_read(
    vol: &mut Volume<'_>,
    stream: &mut TensorStream,
    buf: &mut [u8],
) -> Result<usize, Error>
{
    let cap = payload_capacity(vol.block_size);
    let mut scratch = vec![0u8; cap as usize];
    let mut done = 0usize;

    while done < buf.len() && stream.cursor < stream.anchor.mass {
        let block_idx = stream.cursor / cap;
        let offset = (stream.cursor % cap) as usize;

        let got = vol.read_block_atomic(&stream.anchor, block_idx, &mut scratch, 0)?;
        if offset >= got {
            break;
        }

        let want = (buf.len() - done).min(got - offset);
        buf[done..done + want].copy_from_slice(&scratch[offset..offset + want]);

        done += want;
        stream.cursor += want as u64;
    }

    Ok(done)
}


/// Closes the stream and unpins the volume.
pub fn tensor_close(vol: &Volume<'_>, stream: TensorStream)
{
    drop(stream);
    vol.release();
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::record_crc;
    use crate::format::{format, FormatParams};
    use crate::hal::Device;
    use crate::hal::RamDevice;
    use crate::ondisk::anchor::{CLASS_STREAM, DC_VALID};
    use crate::ondisk::block::{BlockHeader, BLOCK_HEADER_SIZE};
    use crate::ondisk::Superblock;
    use crate::profile::Profile;
    use crate::volume::{mount, unmount, MountParams};

    const CAP: u64 = 1 << 20;
    const SEED: [u8; 16] = [5; 16];

    fn north_sb(dev: &mut RamDevice) -> Superblock
    {
        let mut raw = vec![0u8; crate::ondisk::SUPERBLOCK_SIZE];
        dev.sync_read(0, &mut raw).unwrap();

        Superblock::decode(&raw).unwrap()
    }

    /// Formats the device and plants one committed stream anchor with
    /// `mass` bytes of patterned payload, bitmap bits included.
    fn device_with_stream(mass: u64) -> RamDevice
    {
        let mut dev = RamDevice::new(CAP, 512);
        format(
            &mut dev,
            &FormatParams {
                profile: Profile::Generic,
                ..Default::default()
            },
        )
        .unwrap();

        let sb = north_sb(&mut dev);
        let spb = sb.sectors_per_block(512);
        let cap = payload_capacity(sb.block_size);
        let first_block = sb.flux_start_block(512) + 10;

        let mut anchor = Anchor::default();
        anchor.seed_id = SEED;
        anchor.data_class = CLASS_STREAM | DC_VALID;
        anchor.write_gen = 3;
        anchor.gravity_center = first_block;
        anchor.mass = mass;
        anchor.seal();

        // Slot 1, right after the root.
        let mut cortex = vec![0u8; sb.block_size as usize];
        dev.sync_read(sb.cortex_start_lba, &mut cortex).unwrap();
        cortex[ANCHOR_SIZE..2 * ANCHOR_SIZE].copy_from_slice(&anchor.encode().unwrap());
        dev.sync_write(sb.cortex_start_lba, &cortex).unwrap();

        // Payload blocks plus their bitmap bits.
        let mut written = 0u64;
        let mut seq = 0u64;
        while written < mass {
            let take = (mass - written).min(cap) as usize;
            let mut data = vec![0u8; cap as usize];
            for (i, b) in data.iter_mut().enumerate().take(take) {
                *b = (written as usize + i) as u8;
            }

            let mut hdr = BlockHeader::default();
            hdr.well_id = SEED;
            hdr.sequence_index = seq;
            hdr.generation = 3;
            hdr.data_crc = record_crc(&data[..take]);
            hdr.seal();

            let pos = anchor.predicted_block(seq);
            let mut raw = vec![0u8; sb.block_size as usize];
            raw[..BLOCK_HEADER_SIZE].copy_from_slice(&hdr.encode().unwrap());
            raw[BLOCK_HEADER_SIZE..].copy_from_slice(&data);
            dev.sync_write(pos * spb, &raw).unwrap();

            // Mark the block allocated on disk.
            let bit = pos;
            let byte = (sb.bitmap_start_lba * 512 + bit / 8) as usize;
            dev.data[byte] |= 1 << (bit % 8);

            written += take as u64;
            seq += 1;
        }

        dev
    }

    #[test]
    fn open_read_close_roundtrip()
    {
        let mut dev = device_with_stream(1000);
        let mut vol = mount(&mut dev, MountParams::default()).unwrap();

        let mut stream = tensor_open(&mut vol, &SEED).unwrap();
        assert_eq!(stream.remaining(), 1000);
        assert_eq!(vol.ref_count(), 2);

        let mut buf = vec![0u8; 1000];
        let n = tensor_read(&mut vol, &mut stream, &mut buf).unwrap();

        assert_eq!(n, 1000);
        for (i, b) in buf.iter().enumerate() {
            assert_eq!(*b, i as u8, "payload byte {}", i);
        }

        // Exhausted.
        let n = tensor_read(&mut vol, &mut stream, &mut buf).unwrap();
        assert_eq!(n, 0);

        tensor_close(&vol, stream);
        assert_eq!(vol.ref_count(), 1);
        unmount(vol).unwrap();
    }

    #[test]
    fn multi_block_stream_reads_across_boundaries()
    {
        let cap = payload_capacity(4096);
        let mass = cap * 2 + 17;
        let mut dev = device_with_stream(mass);
        let mut vol = mount(&mut dev, MountParams::default()).unwrap();

        let mut stream = tensor_open(&mut vol, &SEED).unwrap();
        let mut buf = vec![0u8; mass as usize];
        let n = tensor_read(&mut vol, &mut stream, &mut buf).unwrap();

        assert_eq!(n as u64, mass);
        for (i, b) in buf.iter().enumerate() {
            assert_eq!(*b, i as u8, "payload byte {}", i);
        }

        tensor_close(&vol, stream);
        unmount(vol).unwrap();
    }

    #[test]
    fn unknown_seed_is_not_found()
    {
        let mut dev = device_with_stream(100);
        let mut vol = mount(&mut dev, MountParams::default()).unwrap();

        assert_eq!(tensor_open(&mut vol, &[0xee; 16]).unwrap_err(), Error::NotFound);
        unmount(vol).unwrap();
    }

    #[test]
    fn zero_mass_anchor_is_rot()
    {
        let mut dev = device_with_stream(0);
        let mut vol = mount(&mut dev, MountParams::default()).unwrap();

        assert_eq!(tensor_open(&mut vol, &SEED).unwrap_err(), Error::DataRot);
        unmount(vol).unwrap();
    }

    #[test]
    fn open_stream_blocks_unmount()
    {
        let mut dev = device_with_stream(100);
        let mut vol = mount(&mut dev, MountParams::default()).unwrap();

        let _stream = tensor_open(&mut vol, &SEED).unwrap();

        assert_eq!(unmount(vol), Err(Error::Busy));
    }
}
