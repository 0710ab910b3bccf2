//! Initialization segment probing.

use crate::{
    reader::{write_u32_at, ByteReader},
    scanner::{BoxHeader, BoxScanner, BOX_HEADER_SIZE},
    traf::independent_sample_flags,
    Error, FourCC, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
    Text,
}

/// Track level defaults needed to time media fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackContext {
    pub kind: TrackKind,
    pub timescale: u32,
    /// `trex` default, used when `tfhd` does not carry one.
    pub default_sample_duration: Option<u32>,
}

/// Where the `moov` box of a partially downloaded init segment lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoovLocation {
    /// Byte span of the `moov` box, `end` exclusive. The box itself may not be
    /// fully buffered yet.
    Found { start: usize, end: usize },
    /// `moov` was not reached; fetch at least `requested` bytes and retry.
    NeedMoreBytes { requested: usize },
}

impl MoovLocation {
    /// The `moov` span as an inclusive `start-end` range.
    pub fn range(&self) -> Option<String> {
        match self {
            Self::Found { start, end } => Some(format!("{start}-{}", end - 1)),
            Self::NeedMoreBytes { .. } => None,
        }
    }
}

/// Scans top-level boxes for `moov`.
///
/// When the buffer runs out first, asks for twice as many bytes; escalating
/// the request is the caller's job.
pub fn locate_moov(data: &[u8]) -> Result<MoovLocation> {
    for header in BoxScanner::new(data, 0) {
        let header = header?;
        if header.fourcc == FourCC::MOOV {
            return Ok(MoovLocation::Found {
                start: header.offset,
                end: header.end(),
            });
        }
        if !header.is_complete(data.len()) {
            break;
        }
    }

    Ok(MoovLocation::NeedMoreBytes {
        requested: (data.len() * 2).max(BOX_HEADER_SIZE * 2),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitOptions {
    /// Rename `edts` boxes to `free` so decoders ignore edit lists.
    pub neutralize_edit_lists: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoovParams {
    /// `mdhd` timescale of the first track.
    pub timescale: Option<u32>,
    /// `trex` default sample duration.
    pub default_sample_duration: Option<u32>,
    /// `trex` default sample flags, after the audio rewrite.
    pub default_sample_flags: Option<u32>,
}

impl MoovParams {
    pub fn track_context(&self, kind: TrackKind) -> TrackContext {
        TrackContext {
            kind,
            timescale: self.timescale.unwrap_or(1),
            default_sample_duration: self.default_sample_duration,
        }
    }
}

fn truncated(header: &BoxHeader) -> Error {
    Error::TruncatedBox {
        fourcc: header.fourcc,
        offset: header.offset,
    }
}

fn children(data: &[u8], parent: &BoxHeader) -> Result<Vec<BoxHeader>> {
    BoxScanner::children(data, parent, 0)
        .map(|child| {
            let child = child?;
            if child.end() > parent.end() {
                return Err(truncated(&child));
            }
            Ok(child)
        })
        .collect()
}

/// Reads `mdhd` timescale and `trex` defaults out of a complete `moov`.
///
/// For audio tracks the `trex` default sample flags are rewritten in place so
/// every sample is treated as a sync sample. With
/// [`InitOptions::neutralize_edit_lists`] every `edts` box is renamed to
/// `free`.
pub fn moov_params(data: &mut [u8], kind: TrackKind, options: InitOptions) -> Result<MoovParams> {
    let moov = BoxScanner::new(data, 0)
        .find_box(FourCC::MOOV)?
        .ok_or(Error::TruncatedBox {
            fourcc: FourCC::MOOV,
            offset: data.len(),
        })?;
    if !moov.is_complete(data.len()) {
        return Err(truncated(&moov));
    }

    let mut params = MoovParams::default();
    let mut edit_lists = Vec::new();
    let mut flag_patch = None;

    for child in children(data, &moov)? {
        match child.fourcc {
            FourCC::TRAK if params.timescale.is_none() => {
                for trak_child in children(data, &child)? {
                    match trak_child.fourcc {
                        FourCC::EDTS => edit_lists.push(trak_child),
                        FourCC::MDIA => {
                            if let Some(mdhd) = children(data, &trak_child)?
                                .into_iter()
                                .find(|b| b.fourcc == FourCC::MDHD)
                            {
                                params.timescale = Some(read_mdhd_timescale(data, &mdhd)?);
                            }
                        }
                        _ => {}
                    }
                }
            }
            FourCC::MVEX => {
                if let Some(trex) = children(data, &child)?
                    .into_iter()
                    .find(|b| b.fourcc == FourCC::TREX)
                {
                    let (duration, flags, flags_pos) = read_trex(data, &trex)?;
                    params.default_sample_duration = Some(duration);
                    params.default_sample_flags = Some(flags);
                    if kind == TrackKind::Audio {
                        let patched = independent_sample_flags(flags);
                        params.default_sample_flags = Some(patched);
                        flag_patch = Some((flags_pos, patched));
                    }
                }
            }
            _ => {}
        }
    }

    if let Some((pos, flags)) = flag_patch {
        write_u32_at(data, pos, flags);
    }
    if options.neutralize_edit_lists {
        for edts in &edit_lists {
            log::debug!("Neutralizing edts box at {}", edts.offset);
            crate::mark_consumed(data, edts);
        }
    }

    Ok(params)
}

fn read_mdhd_timescale(data: &[u8], mdhd: &BoxHeader) -> Result<u32> {
    let mut reader = ByteReader::new(&data[..mdhd.end()], mdhd.payload_start(), truncated(mdhd));
    let (version, _flags) = reader.read_version_and_flags()?;
    // creation_time and modification_time
    reader.skip(if version == 1 { 16 } else { 8 })?;
    reader.read_u32()
}

fn read_trex(data: &[u8], trex: &BoxHeader) -> Result<(u32, u32, usize)> {
    let mut reader = ByteReader::new(&data[..trex.end()], trex.payload_start(), truncated(trex));
    reader.read_version_and_flags()?;
    // track_ID, default_sample_description_index
    reader.skip(8)?;
    let duration = reader.read_u32()?;
    // default_sample_size
    reader.skip(4)?;
    let flags_pos = reader.position();
    let flags = reader.read_u32()?;
    Ok((duration, flags, flags_pos))
}
