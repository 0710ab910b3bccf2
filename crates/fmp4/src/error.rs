use crate::FourCC;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Malformed `{fourcc}` box at offset {offset}: unsupported size {size}")]
    MalformedBox {
        fourcc: FourCC,
        offset: usize,
        size: u32,
    },

    #[error("Truncated `{fourcc}` box at offset {offset}")]
    TruncatedBox { fourcc: FourCC, offset: usize },

    #[error("Truncated sidx: box ends at {end} but only {available} bytes are buffered")]
    TruncatedSidx { end: usize, available: usize },

    #[error("Sidx length mismatch: references end at {cursor}, box ends at {end}")]
    SidxLengthMismatch { cursor: usize, end: usize },

    #[error("Truncated fragment: `{fourcc}` box at offset {offset}")]
    TruncatedFragment { fourcc: FourCC, offset: usize },

    #[error("saio with {0} entries is not supported")]
    UnsupportedSaioEntryCount(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
