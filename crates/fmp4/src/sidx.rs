//! Segment Index (`sidx`) decoding.
//!
//! ISO/IEC 14496-12 8.16.3. Only `referenced_size`, `reference_type` and
//! `subsegment_duration` are decoded from each reference; the SAP fields are
//! skipped.

use crate::{
    reader::ByteReader,
    scanner::{BoxHeader, BoxScanner},
    Error, FourCC, Result,
};

const REFERENCE_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    /// The reference points to media (a `moof` + `mdat` run).
    Media,
    /// The reference points to another `sidx`.
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidxReference {
    /// Absolute byte offset of the referenced data in the resource.
    pub offset: u64,
    pub size: u32,
    /// Duration in `timescale` units.
    pub duration: u64,
    /// Start time in `timescale` units.
    pub time: u64,
    pub timescale: u32,
    pub reference_type: ReferenceType,
}

impl SidxReference {
    pub fn start_seconds(&self) -> f64 {
        self.time as f64 / self.timescale as f64
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration as f64 / self.timescale as f64
    }

    /// Offset of the last byte of the reference (inclusive). `None` for an
    /// empty reference.
    pub fn last_byte(&self) -> Option<u64> {
        self.size.checked_sub(1).map(|last| self.offset + last as u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentIndex {
    pub version: u8,
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    pub first_offset: u64,
    pub references: Vec<SidxReference>,
}

/// Decodes the first `sidx` box in `data`.
///
/// `byte_offset` is the position of `data[0]` in the full resource. Returns
/// `Ok(None)` when neither a `sidx` nor a `moof` was seen before the buffer
/// ran out, so the caller can fetch more bytes. A `moof` appearing first
/// yields an empty index.
pub fn parse_sidx(data: &[u8], byte_offset: u64) -> Result<Option<SegmentIndex>> {
    for header in BoxScanner::new(data, 0) {
        let header = header?;
        match header.fourcc {
            FourCC::SIDX => return decode_sidx(data, &header, byte_offset).map(Some),
            FourCC::MOOF => {
                log::debug!("moof found at {} before any sidx", header.offset);
                return Ok(Some(SegmentIndex::default()));
            }
            _ => {}
        }
    }

    Ok(None)
}

fn decode_sidx(data: &[u8], header: &BoxHeader, byte_offset: u64) -> Result<SegmentIndex> {
    let end = header.end();
    if end > data.len() {
        return Err(Error::TruncatedSidx {
            end,
            available: data.len(),
        });
    }

    let truncated = Error::TruncatedSidx {
        end,
        available: data.len(),
    };
    let mut reader = ByteReader::new(&data[..end], header.payload_start(), truncated);

    let (version, _flags) = reader.read_version_and_flags()?;
    // reference_ID
    reader.skip(4)?;
    let timescale = reader.read_u32()?;
    let (earliest_presentation_time, first_offset) = if version == 0 {
        (reader.read_u32()? as u64, reader.read_u32()? as u64)
    } else {
        (reader.read_u64()?, reader.read_u64()?)
    };
    // reserved
    reader.skip(2)?;
    let reference_count = reader.read_u16()? as usize;

    let cursor = reader.position() + reference_count * REFERENCE_SIZE;
    if cursor != end {
        return Err(Error::SidxLengthMismatch { cursor, end });
    }

    // Offsets are anchored on the following moof when it is buffered,
    // otherwise on the first byte after the sidx.
    let anchor = match BoxScanner::new(data, end).find_box(FourCC::MOOF) {
        Ok(moof) => moof.map_or(end, |moof| moof.offset),
        Err(e) => {
            log::debug!("Anchoring sidx offsets on the box end: {e}");
            end
        }
    };

    let mut offset = byte_offset + anchor as u64 + first_offset;
    let mut time = earliest_presentation_time;
    let mut references = Vec::with_capacity(reference_count);
    for _ in 0..reference_count {
        let word = reader.read_u32()?;
        let duration = reader.read_u32()? as u64;
        // starts_with_SAP, SAP_type, SAP_delta_time
        reader.skip(4)?;

        let size = word & 0x7fff_ffff;
        let reference_type = if word >> 31 == 1 {
            ReferenceType::Index
        } else {
            ReferenceType::Media
        };

        references.push(SidxReference {
            offset,
            size,
            duration,
            time,
            timescale,
            reference_type,
        });

        offset += size as u64;
        time += duration;
    }

    log::debug!(
        "sidx v{version}: timescale={timescale}, {} references",
        references.len()
    );

    Ok(SegmentIndex {
        version,
        timescale,
        earliest_presentation_time,
        first_offset,
        references,
    })
}
