//! Trick-play patching: explicit sync sample flags for fragments whose
//! `trun` does not carry per-sample flags.
//!
//! Every sample is classified by its first slice NAL unit (IDR/IRAP or not)
//! and every `trun` of the `traf` is rebuilt with one flags word per sample.
//! Box sizes, all `trun` data offsets and the `saio` offset are fixed up for
//! the grown box; `mdat` payloads are copied untouched.

use std::borrow::Cow;

use bytes::{BufMut, BytesMut};

use crate::{
    reader::{read_u32_at, write_u32_at, write_u64_at, ByteReader},
    scanner::{BoxHeader, BoxScanner},
    traf::{
        child_boxes, is_sync_sample, parse_tfdt, Tfhd, Trun, TRUN_FIRST_SAMPLE_FLAGS,
        TRUN_SAMPLE_COMPOSITION_TIME_OFFSET, TRUN_SAMPLE_DURATION, TRUN_SAMPLE_FLAGS,
        TRUN_SAMPLE_SIZE,
    },
    Error, FourCC, Result,
};

/// Flags written for samples starting with an IDR when the `trun` has no
/// `first_sample_flags`: `sample_depends_on = 2`.
const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;
/// Flags written for other samples when `tfhd` has no default.
const NON_SYNC_SAMPLE_FLAGS: u32 = 65536;
/// Patching is only worth it with at least this many sync samples.
const MIN_SYNC_SAMPLES: usize = 2;

/// NAL unit syntax of the video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Avc,
    Hevc,
}

impl VideoCodec {
    /// Detects the codec family from an RFC 6381 codecs string.
    pub fn from_codecs(codecs: &str) -> Option<Self> {
        let family = codecs.split('.').next()?;
        match family {
            "avc1" | "avc3" => Some(Self::Avc),
            "hvc1" | "hev1" => Some(Self::Hevc),
            _ => None,
        }
    }

    /// `Some(true)` for a random access slice, `Some(false)` for any other
    /// slice, `None` for non-VCL units.
    fn classify(self, nal_header: u8) -> Option<bool> {
        match self {
            Self::Avc => match nal_header & 0x1f {
                5 => Some(true),
                1..=4 => Some(false),
                _ => None,
            },
            Self::Hevc => match (nal_header >> 1) & 0x3f {
                16..=21 => Some(true),
                0..=31 => Some(false),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrickPlayPatch<'a> {
    pub data: Cow<'a, [u8]>,
    /// Sync samples found across all fragments.
    pub sync_samples: usize,
}

impl TrickPlayPatch<'_> {
    pub fn is_patched(&self) -> bool {
        matches!(self.data, Cow::Owned(_))
    }
}

/// Per-fragment bookkeeping for one patch pass.
#[derive(Debug)]
struct MoofDescriptor {
    moof: BoxHeader,
    traf: BoxHeader,
    tfhd: Tfhd,
    base_media_decode_time: Option<u64>,
    /// Every `trun` of the `traf`, in box order.
    truns: Vec<Trun>,
    saio: Option<BoxHeader>,
    senc: Option<BoxHeader>,
    mdat: Option<BoxHeader>,
}

/// A rewritten `trun`: moof relative start of the original box and the size
/// change of its replacement.
#[derive(Debug, Clone, Copy)]
struct TrunEdit {
    start: usize,
    delta: i64,
}

/// Growth of everything before the moof relative position `pos`.
fn shift_before(edits: &[TrunEdit], pos: usize) -> i64 {
    edits
        .iter()
        .filter(|edit| edit.start < pos)
        .map(|edit| edit.delta)
        .sum()
}

fn shifted(pos: usize, shift: i64) -> usize {
    (pos as i64 + shift) as usize
}

impl MoofDescriptor {
    fn parse(data: &[u8], moof: &BoxHeader, mdat: Option<BoxHeader>) -> Result<Self> {
        let missing = |fourcc| Error::TruncatedFragment {
            fourcc,
            offset: moof.offset,
        };
        let traf = child_boxes(data, moof)?
            .into_iter()
            .find(|b| b.fourcc == FourCC::TRAF)
            .ok_or_else(|| missing(FourCC::TRAF))?;

        let mut tfhd = None;
        let mut truns = Vec::new();
        let mut base_media_decode_time = None;
        let mut saio = None;
        let mut senc = None;
        for child in child_boxes(data, &traf)? {
            match child.fourcc {
                FourCC::TFHD => tfhd = Some(Tfhd::parse(data, &child)?),
                FourCC::TFDT => base_media_decode_time = Some(parse_tfdt(data, &child)?),
                FourCC::TRUN => truns.push(Trun::parse(data, &child)?),
                FourCC::SAIO => saio = Some(child),
                FourCC::SENC => senc = Some(child),
                _ => {}
            }
        }
        if truns.is_empty() {
            return Err(missing(FourCC::TRUN));
        }

        Ok(Self {
            moof: *moof,
            traf,
            tfhd: tfhd.ok_or_else(|| missing(FourCC::TFHD))?,
            base_media_decode_time,
            truns,
            saio,
            senc,
            mdat,
        })
    }

    fn sample_count(&self) -> usize {
        self.truns.iter().map(Trun::sample_count).sum()
    }

    fn needs_rewrite(trun: &Trun) -> bool {
        trun.flags & TRUN_SAMPLE_FLAGS == 0 && trun.sample_count() > 0
    }

    fn count_explicit_sync_samples(trun: &Trun) -> usize {
        trun.samples
            .iter()
            .enumerate()
            .filter(|(i, sample)| {
                let flags = match (*i, trun.first_sample_flags) {
                    (0, Some(first)) => first,
                    _ => sample.flags.unwrap_or(NON_SYNC_SAMPLE_FLAGS),
                };
                is_sync_sample(flags)
            })
            .count()
    }

    /// Position of the first sample byte of `trun` in the buffer. A `trun`
    /// without data offset continues where the previous one ended.
    fn sample_data_start(&self, trun: &Trun, previous_end: Option<usize>) -> Option<usize> {
        let base = self
            .tfhd
            .base_data_offset
            .map(|o| o as usize)
            .unwrap_or(self.moof.offset);
        match trun.data_offset {
            Some(offset) => base.checked_add_signed(offset as isize),
            None => previous_end.or_else(|| self.mdat.map(|mdat| mdat.payload_start())),
        }
    }

    /// Sync flag per sample of every `trun`, decided by the first slice NAL
    /// of each sample. `None` for runs that already carry sample flags.
    fn classify_samples(&self, data: &[u8], codec: VideoCodec) -> Result<Vec<Option<Vec<bool>>>> {
        let truncated = Error::TruncatedFragment {
            fourcc: FourCC::MDAT,
            offset: self.mdat.map(|m| m.offset).unwrap_or(self.moof.end()),
        };

        let mut previous_end = None;
        let mut result = Vec::with_capacity(self.truns.len());
        for trun in &self.truns {
            let mut pos = self.sample_data_start(trun, previous_end);
            let mut sync = Vec::with_capacity(trun.sample_count());
            for sample in &trun.samples {
                let size = sample.size.or(self.tfhd.default_sample_size);
                let (Some(start), Some(size)) = (pos, size) else {
                    sync.push(false);
                    pos = None;
                    continue;
                };
                let end = start + size as usize;
                let bytes = data.get(start..end).ok_or_else(|| truncated.clone())?;
                sync.push(first_slice_is_sync(bytes, codec));
                pos = Some(end);
            }
            previous_end = pos;
            result.push(Self::needs_rewrite(trun).then_some(sync));
        }
        Ok(result)
    }

    /// Serializes `trun` with one flags word per sample.
    fn rebuild_trun(&self, trun: &Trun, sync: &[bool]) -> BytesMut {
        let default_flags = self.tfhd.default_sample_flags.unwrap_or(NON_SYNC_SAMPLE_FLAGS);
        let sync_flags = trun.first_sample_flags.unwrap_or(SYNC_SAMPLE_FLAGS);
        let flags = (trun.flags | TRUN_SAMPLE_FLAGS) & !TRUN_FIRST_SAMPLE_FLAGS;

        let mut buf = BytesMut::with_capacity(trun.header.size + 4 * trun.sample_count());
        buf.put_u32(0); // placeholder
        buf.put_slice(FourCC::TRUN.as_bytes());
        buf.put_u32(((trun.version as u32) << 24) | flags);
        buf.put_u32(trun.sample_count() as u32);
        if let Some(data_offset) = trun.data_offset {
            buf.put_i32(data_offset);
        }
        for (sample, is_sync) in trun.samples.iter().zip(sync) {
            if flags & TRUN_SAMPLE_DURATION != 0 {
                buf.put_u32(sample.duration.unwrap_or(0));
            }
            if flags & TRUN_SAMPLE_SIZE != 0 {
                buf.put_u32(sample.size.unwrap_or(0));
            }
            buf.put_u32(if *is_sync { sync_flags } else { default_flags });
            if flags & TRUN_SAMPLE_COMPOSITION_TIME_OFFSET != 0 {
                buf.put_i32(sample.composition_offset.unwrap_or(0) as i32);
            }
        }
        let size = buf.len() as u32;
        write_u32_at(&mut buf, 0, size);
        buf
    }

    /// Rebuilds the `moof`, replacing every `trun` that has a classification.
    ///
    /// Returns the new box bytes and the size change.
    fn rebuild(&self, data: &[u8], sync: &[Option<Vec<bool>>]) -> Result<(BytesMut, i64)> {
        let base = self.moof.offset;
        let mut moof = BytesMut::with_capacity(self.moof.size + 4 * self.sample_count());
        let mut edits = Vec::new();
        let mut copied = base;
        for (trun, sync) in self.truns.iter().zip(sync) {
            let Some(sync) = sync else {
                continue;
            };
            let new_trun = self.rebuild_trun(trun, sync);
            moof.put_slice(&data[copied..trun.header.offset]);
            edits.push(TrunEdit {
                start: trun.header.offset - base,
                delta: new_trun.len() as i64 - trun.header.size as i64,
            });
            moof.put_slice(&new_trun);
            copied = trun.header.end();
        }
        moof.put_slice(&data[copied..self.moof.end()]);

        let delta: i64 = edits.iter().map(|edit| edit.delta).sum();
        grow_box_size(&mut moof, 0, delta);
        let traf_pos = self.traf.offset - base;
        grow_box_size(&mut moof, shifted(traf_pos, shift_before(&edits, traf_pos)), delta);

        // mdat moved by `delta` relative to the moof
        if self.tfhd.base_data_offset.is_none() {
            for trun in &self.truns {
                let Some(pos) = trun.data_offset_pos() else {
                    continue;
                };
                let start = trun.header.offset - base;
                let pos = shifted(pos - base, shift_before(&edits, start));
                let moved = read_u32_at(&moof, pos).unwrap_or(0) as i32 as i64 + delta;
                write_u32_at(&mut moof, pos, moved as i32 as u32);
            }
        }

        if let Some(saio) = &self.saio {
            let saio_pos = saio.offset - base;
            let saio_pos = shifted(saio_pos, shift_before(&edits, saio_pos));
            shift_saio_offset(&mut moof, saio_pos, &edits)?;
        }

        Ok((moof, delta))
    }
}

fn grow_box_size(data: &mut [u8], pos: usize, delta: i64) {
    if let Some(size) = read_u32_at(data, pos) {
        write_u32_at(data, pos, (size as i64 + delta) as u32);
    }
}

/// Shifts the single `saio` entry by the growth of the rewritten `trun`s in
/// front of the auxiliary data it points at. Offsets are relative to the
/// `moof` start.
fn shift_saio_offset(moof: &mut [u8], saio_pos: usize, edits: &[TrunEdit]) -> Result<()> {
    let size = read_u32_at(moof, saio_pos).unwrap_or(0) as usize;
    let header = BoxHeader {
        fourcc: FourCC::SAIO,
        offset: saio_pos,
        size,
    };
    let truncated = Error::TruncatedFragment {
        fourcc: FourCC::SAIO,
        offset: saio_pos,
    };
    if header.end() > moof.len() {
        return Err(truncated);
    }

    let mut reader = ByteReader::new(&moof[..header.end()], header.payload_start(), truncated);
    let (version, flags) = reader.read_version_and_flags()?;
    if flags & 1 != 0 {
        // aux_info_type, aux_info_type_parameter
        reader.skip(8)?;
    }
    let entry_count = reader.read_u32()?;
    if entry_count > 1 {
        return Err(Error::UnsupportedSaioEntryCount(entry_count));
    }
    if entry_count == 0 {
        return Ok(());
    }

    let pos = reader.position();
    if version == 0 {
        let offset = reader.read_u32()? as usize;
        let moved = shifted(offset, shift_before(edits, offset));
        write_u32_at(moof, pos, moved as u32);
    } else {
        let offset = reader.read_u64()? as usize;
        let moved = shifted(offset, shift_before(edits, offset));
        write_u64_at(moof, pos, moved as u64);
    }
    Ok(())
}

/// Walks the length-prefixed NAL units of a sample until the first slice.
fn first_slice_is_sync(sample: &[u8], codec: VideoCodec) -> bool {
    let mut pos = 0;
    while pos + 5 <= sample.len() {
        let Some(len) = read_u32_at(sample, pos) else {
            break;
        };
        if let Some(is_sync) = codec.classify(sample[pos + 4]) {
            return is_sync;
        }
        pos += 4 + len as usize;
    }
    false
}

/// Marks sync samples of every fragment in `data`.
///
/// When fewer than two sync samples are found in total, or no `trun` needed
/// rewriting, the original buffer is returned as is.
pub fn patch_sync_samples(data: &[u8], codec: VideoCodec) -> Result<TrickPlayPatch<'_>> {
    let headers = BoxScanner::new(data, 0).collect::<Result<Vec<_>>>()?;

    let mut out = BytesMut::with_capacity(data.len() + data.len() / 16);
    let mut sync_samples = 0;
    let mut rewritten = 0;
    // growth of the output before the current box
    let mut shift = 0i64;

    for (i, header) in headers.iter().enumerate() {
        if header.fourcc != FourCC::MOOF {
            let end = header.end().min(data.len());
            out.put_slice(&data[header.offset..end]);
            continue;
        }
        if !header.is_complete(data.len()) {
            return Err(Error::TruncatedFragment {
                fourcc: header.fourcc,
                offset: header.offset,
            });
        }

        let mdat = headers[i + 1..]
            .iter()
            .take_while(|b| b.fourcc != FourCC::MOOF)
            .find(|b| b.fourcc == FourCC::MDAT)
            .copied();
        let descriptor = MoofDescriptor::parse(data, header, mdat)?;
        log::trace!(
            "moof at {}: {} runs, {} samples, decode time {:?}, senc {:?}",
            header.offset,
            descriptor.truns.len(),
            descriptor.sample_count(),
            descriptor.base_media_decode_time,
            descriptor.senc.map(|s| s.offset)
        );

        let (mut moof, delta) = if descriptor.truns.iter().any(MoofDescriptor::needs_rewrite) {
            let sync = descriptor.classify_samples(data, codec)?;
            for (trun, sync) in descriptor.truns.iter().zip(&sync) {
                sync_samples += match sync {
                    Some(sync) => sync.iter().filter(|s| **s).count(),
                    None => MoofDescriptor::count_explicit_sync_samples(trun),
                };
            }
            rewritten += 1;
            descriptor.rebuild(data, &sync)?
        } else {
            sync_samples += descriptor
                .truns
                .iter()
                .map(MoofDescriptor::count_explicit_sync_samples)
                .sum::<usize>();
            (BytesMut::from(&data[header.offset..header.end()]), 0)
        };

        if let (Some(base), Some(pos)) = (
            descriptor.tfhd.base_data_offset,
            descriptor.tfhd.base_data_offset_pos(),
        ) {
            // tfhd precedes every trun
            let pos = pos - header.offset;
            let moved = base as i64 + shift + delta;
            write_u64_at(&mut moof, pos, moved as u64);
        }

        shift += delta;
        out.put_slice(&moof);
    }

    if sync_samples < MIN_SYNC_SAMPLES || rewritten == 0 {
        log::debug!("Skipping trick-play patch: {sync_samples} sync samples");
        return Ok(TrickPlayPatch {
            data: Cow::Borrowed(data),
            sync_samples,
        });
    }

    Ok(TrickPlayPatch {
        data: Cow::Owned(out.to_vec()),
        sync_samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_from_codecs() {
        assert_eq!(VideoCodec::from_codecs("avc1.64001f"), Some(VideoCodec::Avc));
        assert_eq!(VideoCodec::from_codecs("hev1.1.6.L93.B0"), Some(VideoCodec::Hevc));
        assert_eq!(VideoCodec::from_codecs("mp4a.40.2"), None);
    }

    #[test]
    fn test_first_slice_skips_parameter_sets() {
        // SPS (7), PPS (8), IDR (5)
        let mut sample = Vec::new();
        for (header, len) in [(0x67u8, 3u32), (0x68, 2), (0x65, 4)] {
            sample.extend_from_slice(&len.to_be_bytes());
            sample.push(header);
            sample.extend(std::iter::repeat(0).take(len as usize - 1));
        }
        assert!(first_slice_is_sync(&sample, VideoCodec::Avc));

        let mut sample = 2u32.to_be_bytes().to_vec();
        sample.extend_from_slice(&[0x41, 0]);
        assert!(!first_slice_is_sync(&sample, VideoCodec::Avc));
    }

    #[test]
    fn test_hevc_irap() {
        // IDR_W_RADL = 19
        assert_eq!(VideoCodec::Hevc.classify(19 << 1), Some(true));
        // TRAIL_R = 1
        assert_eq!(VideoCodec::Hevc.classify(1 << 1), Some(false));
        // VPS = 32
        assert_eq!(VideoCodec::Hevc.classify(32 << 1), None);
    }
}
