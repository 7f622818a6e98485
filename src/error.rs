use thiserror::Error;

/// Engine error kinds.
///
/// Every kind carries a stable numeric code (see [`Error::code`]) and a
/// stable short name (see [`strerror`]); both are part of the ABI and must
/// never be renumbered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("out of memory")]
    Nomem,
    #[error("hardware I/O failure")]
    HwIo,

    #[error("no valid superblock found")]
    BadSuperblock,
    #[error("media is pending a secure wipe")]
    WipePending,
    #[error("superblock replicas disagree in an impossible way")]
    Tampered,
    #[error("volume format never completed")]
    Uninitialized,

    #[error("on-disk geometry is inconsistent")]
    Geometry,
    #[error("region or block size alignment violated")]
    AlignmentFail,
    #[error("void bitmap region is corrupt")]
    BitmapCorrupt,

    #[error("volume requires an incompatible driver version")]
    VersionIncompat,

    #[error("volume is locked")]
    VolumeLocked,
    #[error("volume has outstanding references")]
    Busy,

    #[error("epoch record is toxically far in the past")]
    MediaToxic,
    #[error("epoch record is ahead of the superblock")]
    TimeDilation,
    #[error("write generation mismatch")]
    GenerationSkew,
    #[error("payload failed integrity verification")]
    DataRot,
    #[error("block fails identity or timeline checks")]
    PhantomBlock,

    #[error("no such object")]
    NotFound,
    #[error("access denied")]
    AccessDenied,

    #[error("device does not fit the requested profile")]
    ProfileMismatch,
    #[error("thermal limit reached")]
    ThermalCritical,
    #[error("internal engine fault")]
    InternalFault,
}

impl Error {
    /// The stable numeric code of this kind.
    pub fn code(&self) -> u32
    {
        match self {
            Self::InvalidArgument => 1,
            Self::Nomem => 2,
            Self::HwIo => 3,
            Self::BadSuperblock => 10,
            Self::WipePending => 11,
            Self::Tampered => 12,
            Self::Uninitialized => 13,
            Self::Geometry => 20,
            Self::AlignmentFail => 21,
            Self::BitmapCorrupt => 22,
            Self::VersionIncompat => 30,
            Self::VolumeLocked => 40,
            Self::Busy => 41,
            Self::MediaToxic => 50,
            Self::TimeDilation => 51,
            Self::GenerationSkew => 52,
            Self::DataRot => 53,
            Self::PhantomBlock => 54,
            Self::NotFound => 60,
            Self::AccessDenied => 61,
            Self::ProfileMismatch => 70,
            Self::ThermalCritical => 80,
            Self::InternalFault => 81,
        }
    }

    /// The stable short name of this kind.
    pub fn name(&self) -> &'static str
    {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Nomem => "NOMEM",
            Self::HwIo => "HW_IO",
            Self::BadSuperblock => "BAD_SUPERBLOCK",
            Self::WipePending => "WIPE_PENDING",
            Self::Tampered => "TAMPERED",
            Self::Uninitialized => "UNINITIALIZED",
            Self::Geometry => "GEOMETRY",
            Self::AlignmentFail => "ALIGNMENT_FAIL",
            Self::BitmapCorrupt => "BITMAP_CORRUPT",
            Self::VersionIncompat => "VERSION_INCOMPAT",
            Self::VolumeLocked => "VOLUME_LOCKED",
            Self::Busy => "BUSY",
            Self::MediaToxic => "MEDIA_TOXIC",
            Self::TimeDilation => "TIME_DILATION",
            Self::GenerationSkew => "GENERATION_SKEW",
            Self::DataRot => "DATA_ROT",
            Self::PhantomBlock => "PHANTOM_BLOCK",
            Self::NotFound => "NOT_FOUND",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::ProfileMismatch => "PROFILE_MISMATCH",
            Self::ThermalCritical => "THERMAL_CRITICAL",
            Self::InternalFault => "INTERNAL_FAULT",
        }
    }

    fn all() -> &'static [Error]
    {
        &[
            Self::InvalidArgument,
            Self::Nomem,
            Self::HwIo,
            Self::BadSuperblock,
            Self::WipePending,
            Self::Tampered,
            Self::Uninitialized,
            Self::Geometry,
            Self::AlignmentFail,
            Self::BitmapCorrupt,
            Self::VersionIncompat,
            Self::VolumeLocked,
            Self::Busy,
            Self::MediaToxic,
            Self::TimeDilation,
            Self::GenerationSkew,
            Self::DataRot,
            Self::PhantomBlock,
            Self::NotFound,
            Self::AccessDenied,
            Self::ProfileMismatch,
            Self::ThermalCritical,
            Self::InternalFault,
        ]
    }
}

impl From<std::io::Error> for Error {
    fn from(_: std::io::Error) -> Self
    {
        Self::HwIo
    }
}


/// Returns the stable short name for an error code.
/// Unknown codes yield `"UNKNOWN"`.
pub fn strerror(code: u32) -> &'static str
{
    Error::all()
        .iter()
        .find(|e| e.code() == code)
        .map(|e| e.name())
        .unwrap_or("UNKNOWN")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique()
    {
        let all = Error::all();

        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code(), "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn strerror_known()
    {
        assert_eq!(strerror(10), "BAD_SUPERBLOCK");
        assert_eq!(strerror(11), "WIPE_PENDING");
        assert_eq!(strerror(41), "BUSY");
        assert_eq!(strerror(51), "TIME_DILATION");
    }

    #[test]
    fn strerror_unknown()
    {
        assert_eq!(strerror(0), "UNKNOWN");
        assert_eq!(strerror(9999), "UNKNOWN");
    }

    #[test]
    fn strerror_round_trips_every_kind()
    {
        for e in Error::all() {
            assert_eq!(strerror(e.code()), e.name());
        }
    }
}
