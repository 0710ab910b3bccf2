//! `SegmentTimeline` expansion.

use crate::model::TimelineEntry;

/// One segment described by a `SegmentTimeline`, in timescale units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimelineSegment {
    pub media_time: u64,
    pub duration: u64,
}

/// Expands `S` entries into individual segments.
///
/// `period_end` and `open_end` are media times (timescale units, offset
/// included) bounding negative repeats: the period end when it is known,
/// otherwise the end of the availability window.
pub(crate) fn expand_timeline(
    entries: &[TimelineEntry],
    period_end: Option<u64>,
    open_end: Option<u64>,
) -> Vec<TimelineSegment> {
    let mut segments = Vec::new();
    let mut time = 0u64;

    for (i, entry) in entries.iter().enumerate() {
        if let Some(t) = entry.time {
            time = t;
        }
        // zero duration sentinel
        if entry.duration == 0 {
            continue;
        }

        let repeat = if entry.repeat >= 0 {
            entry.repeat as u64
        } else {
            let next_time = entries[i + 1..].iter().find_map(|e| e.time);
            match next_time.or(period_end).or(open_end) {
                Some(repeat_end) if repeat_end > time => {
                    (repeat_end - time).div_ceil(entry.duration) - 1
                }
                Some(_) => 0,
                None => {
                    tracing::warn!(time, "Negative S@r without a known end, treated as 0");
                    0
                }
            }
        };

        // S@r counts additional segments only, S@r=5 is six segments
        for _ in 0..=repeat {
            segments.push(TimelineSegment {
                media_time: time,
                duration: entry.duration,
            });
            time += entry.duration;
        }
    }

    segments
}
