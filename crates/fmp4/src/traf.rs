//! Decoders for the track fragment boxes shared by timing extraction and
//! trick-play patching.

use crate::{
    reader::ByteReader,
    scanner::{BoxHeader, BoxScanner},
    Error, Result,
};

pub(crate) const TFHD_BASE_DATA_OFFSET: u32 = 0x00_0001;
pub(crate) const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x00_0002;
pub(crate) const TFHD_DEFAULT_SAMPLE_DURATION: u32 = 0x00_0008;
pub(crate) const TFHD_DEFAULT_SAMPLE_SIZE: u32 = 0x00_0010;
pub(crate) const TFHD_DEFAULT_SAMPLE_FLAGS: u32 = 0x00_0020;

pub(crate) const TRUN_DATA_OFFSET: u32 = 0x00_0001;
pub(crate) const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x00_0004;
pub(crate) const TRUN_SAMPLE_DURATION: u32 = 0x00_0100;
pub(crate) const TRUN_SAMPLE_SIZE: u32 = 0x00_0200;
pub(crate) const TRUN_SAMPLE_FLAGS: u32 = 0x00_0400;
pub(crate) const TRUN_SAMPLE_COMPOSITION_TIME_OFFSET: u32 = 0x00_0800;

/// Rewrites sample flags so the sample reads as independently decodable:
/// `sample_depends_on = 2` and `sample_is_non_sync_sample = 0`.
pub fn independent_sample_flags(flags: u32) -> u32 {
    (flags & !0x0301_0000) | 0x0200_0000
}

/// Whether sample flags describe a sync sample.
pub(crate) fn is_sync_sample(flags: u32) -> bool {
    flags & 0x0001_0000 == 0
}

fn truncated(header: &BoxHeader) -> Error {
    Error::TruncatedFragment {
        fourcc: header.fourcc,
        offset: header.offset,
    }
}

fn box_reader<'a>(data: &'a [u8], header: &BoxHeader) -> Result<ByteReader<'a>> {
    if header.end() > data.len() {
        return Err(truncated(header));
    }
    Ok(ByteReader::new(
        &data[..header.end()],
        header.payload_start(),
        truncated(header),
    ))
}

/// Collects the children of `parent`, failing when one of them overflows it.
pub(crate) fn child_boxes(data: &[u8], parent: &BoxHeader) -> Result<Vec<BoxHeader>> {
    let mut children = Vec::new();
    for child in BoxScanner::children(data, parent, 0) {
        let child = child?;
        if child.end() > parent.end() {
            return Err(truncated(&child));
        }
        children.push(child);
    }
    Ok(children)
}

#[derive(Debug, Clone)]
pub(crate) struct Tfhd {
    pub header: BoxHeader,
    pub flags: u32,
    pub base_data_offset: Option<u64>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
    /// Buffer position of `default_sample_flags`, if present.
    pub default_sample_flags_pos: Option<usize>,
}

impl Tfhd {
    pub fn parse(data: &[u8], header: &BoxHeader) -> Result<Self> {
        let mut reader = box_reader(data, header)?;
        let (_version, flags) = reader.read_version_and_flags()?;
        // track_ID
        reader.skip(4)?;

        let base_data_offset = if flags & TFHD_BASE_DATA_OFFSET != 0 {
            Some(reader.read_u64()?)
        } else {
            None
        };
        if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
            reader.skip(4)?;
        }
        let default_sample_duration = if flags & TFHD_DEFAULT_SAMPLE_DURATION != 0 {
            Some(reader.read_u32()?)
        } else {
            None
        };
        let default_sample_size = if flags & TFHD_DEFAULT_SAMPLE_SIZE != 0 {
            Some(reader.read_u32()?)
        } else {
            None
        };
        let (default_sample_flags, default_sample_flags_pos) =
            if flags & TFHD_DEFAULT_SAMPLE_FLAGS != 0 {
                let pos = reader.position();
                (Some(reader.read_u32()?), Some(pos))
            } else {
                (None, None)
            };

        Ok(Self {
            header: *header,
            flags,
            base_data_offset,
            default_sample_duration,
            default_sample_size,
            default_sample_flags,
            default_sample_flags_pos,
        })
    }

    /// Buffer position of `base_data_offset`, if present.
    pub fn base_data_offset_pos(&self) -> Option<usize> {
        self.base_data_offset
            .map(|_| self.header.payload_start() + 8)
    }
}

/// `baseMediaDecodeTime` of a `tfdt` box.
pub(crate) fn parse_tfdt(data: &[u8], header: &BoxHeader) -> Result<u64> {
    let mut reader = box_reader(data, header)?;
    let (version, _flags) = reader.read_version_and_flags()?;
    if version == 1 {
        reader.read_u64()
    } else {
        Ok(reader.read_u32()? as u64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TrunSample {
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<u32>,
    pub composition_offset: Option<i64>,
}

#[derive(Debug, Clone)]
pub(crate) struct Trun {
    pub header: BoxHeader,
    pub version: u8,
    pub flags: u32,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    pub samples: Vec<TrunSample>,
}

impl Trun {
    pub fn parse(data: &[u8], header: &BoxHeader) -> Result<Self> {
        let mut reader = box_reader(data, header)?;
        let (version, flags) = reader.read_version_and_flags()?;
        let sample_count = reader.read_u32()?;

        let data_offset = if flags & TRUN_DATA_OFFSET != 0 {
            Some(reader.read_i32()?)
        } else {
            None
        };
        let first_sample_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            Some(reader.read_u32()?)
        } else {
            None
        };

        let mut field_size = 0;
        for flag in [
            TRUN_SAMPLE_DURATION,
            TRUN_SAMPLE_SIZE,
            TRUN_SAMPLE_FLAGS,
            TRUN_SAMPLE_COMPOSITION_TIME_OFFSET,
        ] {
            if flags & flag != 0 {
                field_size += 4;
            }
        }
        let declared = (sample_count as usize).saturating_mul(field_size);
        if reader.position() + declared > header.end() {
            return Err(truncated(header));
        }

        let mut samples = Vec::with_capacity(sample_count as usize);
        for _ in 0..sample_count {
            let mut sample = TrunSample::default();
            if flags & TRUN_SAMPLE_DURATION != 0 {
                sample.duration = Some(reader.read_u32()?);
            }
            if flags & TRUN_SAMPLE_SIZE != 0 {
                sample.size = Some(reader.read_u32()?);
            }
            if flags & TRUN_SAMPLE_FLAGS != 0 {
                sample.flags = Some(reader.read_u32()?);
            }
            if flags & TRUN_SAMPLE_COMPOSITION_TIME_OFFSET != 0 {
                let raw = reader.read_u32()?;
                // Offsets are signed from version 1 on.
                sample.composition_offset = Some(if version >= 1 {
                    raw as i32 as i64
                } else {
                    raw as i64
                });
            }
            samples.push(sample);
        }

        Ok(Self {
            header: *header,
            version,
            flags,
            data_offset,
            first_sample_flags,
            samples,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Buffer position of `data_offset`, if present.
    pub fn data_offset_pos(&self) -> Option<usize> {
        self.data_offset.map(|_| self.header.payload_start() + 8)
    }

    pub fn first_composition_offset(&self) -> Option<i64> {
        self.samples.first().and_then(|s| s.composition_offset)
    }
}
