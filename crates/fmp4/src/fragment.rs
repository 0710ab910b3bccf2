//! Exact timing of fragmented MP4 media segments.
//!
//! A media buffer holds one or more `moof` + `mdat` pairs, possibly preceded
//! by `styp`, `sidx` and `emsg` boxes. For every `moof` the start time and
//! duration are computed from `tfdt` and `trun`, and buffered `emsg` boxes are
//! resolved against the next decode time.

use crate::{
    emsg::{parse_emsg, EventMessage},
    mark_consumed,
    reader::write_u32_at,
    scanner::{BoxHeader, BoxScanner},
    traf::{child_boxes, independent_sample_flags, parse_tfdt, Tfhd, Trun},
    Error, FourCC, Result, TrackContext, TrackKind,
};

/// Timing of a single `moof` + `mdat` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentTiming {
    /// Offset of the `moof` box in the buffer.
    pub offset: usize,
    /// Start time in seconds, time offset included.
    pub time: f64,
    /// Duration in seconds.
    pub duration: f64,
    /// Bytes from this `moof` up to the next one, or to the end of the buffer.
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentTimingReport {
    pub fragments: Vec<FragmentTiming>,
    /// In-band events found in the buffer, in box order.
    pub events: Vec<EventMessage>,
}

impl FragmentTimingReport {
    /// Merges all fragments of a chunk into one record.
    pub fn coalesced(&self) -> Option<FragmentTiming> {
        let first = self.fragments.first()?;
        Some(FragmentTiming {
            offset: first.offset,
            time: first.time,
            duration: self.fragments.iter().map(|f| f.duration).sum(),
            size: self.fragments.iter().map(|f| f.size).sum(),
        })
    }
}

struct MoofTiming {
    base_media_decode_time: Option<u64>,
    duration_units: u64,
    first_composition_offset: Option<i64>,
    /// Positions of audio `default_sample_flags` to rewrite.
    flag_patches: Vec<(usize, u32)>,
}

/// Extracts fragment timing from a media buffer.
///
/// `time_offset` (seconds) is added to every decode time, typically the
/// timestamp offset applied by the media pipeline. On success every parsed
/// `emsg` box is renamed to `free`, and for audio tracks the default sample
/// flags in `tfhd` are rewritten so every sample is a sync sample. On error
/// the buffer is left untouched and no record is returned.
pub fn extract_fragment_timing(
    data: &mut [u8],
    track: &TrackContext,
    time_offset: f64,
) -> Result<FragmentTimingReport> {
    let timescale = track.timescale.max(1) as f64;
    let headers = BoxScanner::new(data, 0).collect::<Result<Vec<_>>>()?;

    let mut report = FragmentTimingReport::default();
    let mut pending_events: Vec<BoxHeader> = Vec::new();
    let mut consumed_events: Vec<BoxHeader> = Vec::new();
    let mut flag_patches = Vec::new();
    let mut running_time: Option<f64> = None;

    for header in &headers {
        match header.fourcc {
            FourCC::EMSG => {
                if !header.is_complete(data.len()) {
                    return Err(Error::TruncatedFragment {
                        fourcc: header.fourcc,
                        offset: header.offset,
                    });
                }
                pending_events.push(*header);
            }
            FourCC::MOOF => {
                if !header.is_complete(data.len()) {
                    return Err(Error::TruncatedFragment {
                        fourcc: header.fourcc,
                        offset: header.offset,
                    });
                }

                let moof = parse_moof(data, header, track)?;
                let decode_time = match moof.base_media_decode_time {
                    Some(time) => time as f64 / timescale + time_offset,
                    None => running_time.unwrap_or(time_offset),
                };
                for event in pending_events.drain(..) {
                    report.events.push(parse_emsg(data, &event, decode_time)?);
                    consumed_events.push(event);
                }

                let duration = moof.duration_units as f64 / timescale;
                let time = decode_time
                    + moof
                        .first_composition_offset
                        .map(|cto| cto as f64 / timescale)
                        .unwrap_or_default();
                running_time = Some(decode_time + duration);
                flag_patches.extend(moof.flag_patches);

                report.fragments.push(FragmentTiming {
                    offset: header.offset,
                    time,
                    duration,
                    size: 0,
                });
            }
            _ => {}
        }
    }

    // emsg boxes trailing the last moof belong to the same timeline
    let trailing_time = running_time.unwrap_or(time_offset);
    for event in pending_events {
        report.events.push(parse_emsg(data, &event, trailing_time)?);
        consumed_events.push(event);
    }

    let ends: Vec<usize> = report
        .fragments
        .iter()
        .skip(1)
        .map(|f| f.offset)
        .chain(std::iter::once(data.len()))
        .collect();
    for (fragment, end) in report.fragments.iter_mut().zip(ends) {
        fragment.size = end - fragment.offset;
    }

    for (pos, flags) in flag_patches {
        write_u32_at(data, pos, flags);
    }
    for event in &consumed_events {
        mark_consumed(data, event);
    }

    log::debug!(
        "Extracted {} fragments and {} events",
        report.fragments.len(),
        report.events.len()
    );
    Ok(report)
}

fn parse_moof(data: &[u8], moof: &BoxHeader, track: &TrackContext) -> Result<MoofTiming> {
    let mut timing = MoofTiming {
        base_media_decode_time: None,
        duration_units: 0,
        first_composition_offset: None,
        flag_patches: Vec::new(),
    };

    let Some(traf) = child_boxes(data, moof)?
        .into_iter()
        .find(|child| child.fourcc == FourCC::TRAF)
    else {
        return Ok(timing);
    };

    let mut default_sample_duration = track.default_sample_duration;
    for child in child_boxes(data, &traf)? {
        match child.fourcc {
            FourCC::TFHD => {
                let tfhd = Tfhd::parse(data, &child)?;
                if let Some(duration) = tfhd.default_sample_duration {
                    default_sample_duration = Some(duration);
                }
                if let (TrackKind::Audio, Some(flags), Some(pos)) = (
                    track.kind,
                    tfhd.default_sample_flags,
                    tfhd.default_sample_flags_pos,
                ) {
                    timing
                        .flag_patches
                        .push((pos, independent_sample_flags(flags)));
                }
            }
            FourCC::TFDT => {
                timing.base_media_decode_time = Some(parse_tfdt(data, &child)?);
            }
            FourCC::TRUN => {
                let trun = Trun::parse(data, &child)?;
                let per_sample: Option<u64> = trun
                    .samples
                    .iter()
                    .map(|s| s.duration.map(u64::from))
                    .sum();
                timing.duration_units += match per_sample {
                    Some(total) => total,
                    None => {
                        default_sample_duration.unwrap_or(0) as u64 * trun.sample_count() as u64
                    }
                };
                if timing.first_composition_offset.is_none() {
                    timing.first_composition_offset = trun.first_composition_offset();
                }
            }
            _ => {}
        }
    }

    Ok(timing)
}
