//! Availability windows and live edge tracking.
//!
//! References:
//! - [DASH-IF implementation guidelines: restricted timing model](https://dashif.org/Guidelines-TimingModel)

use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    clock::Clock,
    events::{DashEvent, EventBus, LiveEdgeFlags},
    model::{Mpd, Period, Representation},
    segment::AvailabilityRange,
};

pub(crate) fn seconds(value: f64) -> TimeDelta {
    TimeDelta::milliseconds((value * 1000.0).round() as i64)
}

/// Wall clock bounds of one segment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct SegmentWallTimes {
    pub availability_start: Option<DateTime<Utc>>,
    pub availability_end: Option<DateTime<Utc>>,
    pub wall_start: Option<DateTime<Utc>>,
}

/// A segment is available once it is complete on the server, minus
/// `@availabilityTimeOffset`, and stays available for the time shift buffer.
pub(crate) fn segment_wall_times(
    mpd: &Mpd,
    availability_time_offset: f64,
    presentation_start: f64,
    duration: f64,
) -> SegmentWallTimes {
    let Some(zero_point) = mpd.availability_start_time.filter(|_| mpd.is_dynamic()) else {
        return SegmentWallTimes::default();
    };

    let end = presentation_start + duration;
    SegmentWallTimes {
        availability_start: Some(zero_point + seconds(end - availability_time_offset)),
        availability_end: mpd
            .time_shift_buffer_depth
            .map(|depth| zero_point + seconds(end + depth)),
        wall_start: Some(zero_point + seconds(presentation_start)),
    }
}

#[derive(Debug, Clone)]
pub struct AvailabilityWindowTracker {
    offset_correction: f64,
    bus: EventBus,
}

impl AvailabilityWindowTracker {
    pub fn new(offset_correction: f64, bus: EventBus) -> Self {
        Self {
            offset_correction,
            bus,
        }
    }

    /// Presentation time span in which segments of `representation` may be
    /// requested.
    ///
    /// Static presentations always yield the full period. For dynamic ones the
    /// window follows the synced wall clock; without a completed time sync or a
    /// known segment duration the previously cached window is returned.
    pub fn segment_availability_range(
        &self,
        mpd: &Mpd,
        period: &Period,
        representation: &Representation,
        clock: &Clock,
    ) -> Option<AvailabilityRange> {
        if !mpd.is_dynamic() {
            return Some(AvailabilityRange {
                start: period.start,
                end: period.end().unwrap_or(f64::INFINITY),
            });
        }

        let cached = representation.cache.availability_range;
        let (Some(zero_point), Some(segment_duration), true) = (
            mpd.availability_start_time,
            representation.segment_duration,
            clock.is_synced(),
        ) else {
            tracing::debug!(
                synced = clock.is_synced(),
                "Reusing cached availability window"
            );
            return cached;
        };

        let now = (clock.now() - zero_point).as_seconds_f64();
        let is_first = period.index == 0;
        let is_last = period.index + 1 == mpd.periods.len();

        let start = match mpd.time_shift_buffer_depth {
            Some(depth) if is_first => {
                (now - depth - segment_duration - self.offset_correction).max(0.0)
            }
            _ => period.start,
        }
        .max(period.start);

        let end = if is_last {
            (now - segment_duration + representation.availability_time_offset
                - self.offset_correction)
                .max(0.0)
        } else {
            period.end().unwrap_or(f64::INFINITY)
        };
        let end = period.end().map_or(end, |period_end| end.min(period_end));

        tracing::trace!(start, end, now, "Dynamic availability window");
        Some(AvailabilityRange { start, end })
    }

    /// Raises the live edge from a freshly computed segment list of the first
    /// or last period. Bounds never move backwards.
    ///
    /// Returns whether anything changed, in which case a
    /// [`DashEvent::LiveEdgeUpdated`] was published.
    pub fn update_live_edge(
        &self,
        mpd: &mut Mpd,
        period_index: usize,
        observed_start: f64,
        observed_end: f64,
    ) -> bool {
        let is_first = period_index == 0;
        let is_last = period_index + 1 == mpd.periods.len();
        if !is_first && !is_last {
            return false;
        }

        let before = mpd.live_edge;
        let mut edge = before;
        if is_first && edge.live_edge_s.map_or(true, |s| observed_start > s) {
            edge.live_edge_s = Some(observed_start);
        }
        if is_last && edge.live_edge.map_or(true, |e| observed_end > e) {
            edge.live_edge = Some(observed_end);
        }
        let delay = mpd.suggested_presentation_delay.unwrap_or(0.0);
        edge.live_edge_e = (edge.live_edge.unwrap_or(0.0) - delay)
            .max(edge.live_edge_s.unwrap_or(0.0))
            .max(before.live_edge_e);

        if edge == before {
            return false;
        }

        let flags = LiveEdgeFlags {
            start: edge.live_edge_s != before.live_edge_s,
            end: edge.live_edge_e != before.live_edge_e,
        };
        mpd.live_edge = edge;
        tracing::debug!(
            live_edge = ?edge.live_edge,
            live_edge_s = ?edge.live_edge_s,
            live_edge_e = edge.live_edge_e,
            "Live edge updated"
        );
        self.bus.publish(DashEvent::LiveEdgeUpdated {
            live_edge_s: edge.live_edge_s,
            live_edge_e: edge.live_edge_e,
            live_edge: edge.live_edge,
            flags,
            target_latency: delay,
        });
        true
    }
}
