// Source: https://github.com/FauxFaux/ext4-rs/blob/211fa05cd7b1498060b4b68ffed368d8d3c3b788/src/parse.rs
/// Ext4-style crc32c algorithm, seeded.
pub fn crc32c(seed: u32, buf: &[u8]) -> u32
{
    crc::crc32::update(seed ^ (!0), &crc::crc32::CASTAGNOLI_TABLE, buf) ^ (!0u32)
}


/// Checksum of a whole on-disk record, zero seed.
pub fn record_crc(buf: &[u8]) -> u32
{
    crc32c(0, buf)
}


/// CPU features relevant to the engine, probed once at construction time
/// and threaded through explicitly. The table-driven checksum path works
/// with every bit cleared.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    pub hw_crc32: bool,
    pub nt_stores: bool,
}

impl CpuFeatures {
    pub fn probe() -> Self
    {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            Self {
                hw_crc32: is_x86_feature_detected!("sse4.2"),
                nt_stores: is_x86_feature_detected!("sse2"),
            }
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        {
            Self::default()
        }
    }

    /// An empty feature word. Forces the portable code paths.
    pub fn none() -> Self
    {
        Self::default()
    }
}
