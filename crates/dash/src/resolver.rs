//! Time and sequence based segment resolution across the addressing modes.
//!
//! The resolver owns the segment cache of every representation it touches and
//! one cursor per media type. Calls for the same media type must not overlap;
//! video and audio cursors are independent.

use std::collections::HashMap;

use crate::{
    availability::{segment_wall_times, AvailabilityWindowTracker},
    clock::Clock,
    config::ResolverConfig,
    events::EventBus,
    model::{
        Mpd, Period, Representation, RepresentationRef, SegmentInfo, SegmentUrl, TimelineEntry,
    },
    range::ByteRange,
    request::RequestBuilder,
    segment::{AvailabilityRange, Segment, SegmentRequest},
    timeline::{expand_timeline, TimelineSegment},
    DashError, DashResult, MediaType,
};

/// Tolerance for float noise when turning times into indexes.
const INDEX_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CursorState {
    #[default]
    Uninitialized,
    /// Set by a time search.
    Positioned,
    /// Moved forward by [`SegmentResolver::resolve_next`].
    Advanced,
    /// Terminal for the current period.
    Complete,
}

/// Cursor of one media type.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestStatus {
    pub index: Option<u64>,
    pub requested_time: Option<f64>,
    pub state: CursorState,
}

/// A freshly computed segment list, applied once the manifest borrow ends.
struct ListUpdate {
    segments: Vec<Segment>,
    available_segments_number: usize,
    availability_range: Option<AvailabilityRange>,
    timeline_recorded: bool,
}

/// Builds segments of one representation.
struct SegmentFactory<'a> {
    mpd: &'a Mpd,
    period: &'a Period,
    representation: &'a Representation,
}

impl SegmentFactory<'_> {
    fn timescale(&self) -> f64 {
        self.representation.timescale.max(1) as f64
    }

    fn segment(
        &self,
        availability_idx: u64,
        media_time: u64,
        duration: f64,
        media: Option<String>,
        range: Option<ByteRange>,
    ) -> Segment {
        let timescale = self.timescale();
        let presentation_start_time = self.presentation_time(media_time);
        let wall = segment_wall_times(
            self.mpd,
            self.representation.availability_time_offset,
            presentation_start_time,
            duration,
        );

        Segment {
            availability_idx,
            number: self.representation.start_number + availability_idx,
            media_time,
            media_start_time: media_time as f64 / timescale,
            presentation_start_time,
            duration,
            availability_start_time: wall.availability_start,
            availability_end_time: wall.availability_end,
            wall_start_time: wall.wall_start,
            media,
            range,
        }
    }

    /// MPD timeline position of a media time.
    fn presentation_time(&self, media_time: u64) -> f64 {
        let pto = self.representation.presentation_time_offset as f64;
        self.period.start + (media_time as f64 - pto) / self.timescale()
    }

    /// Media time of a period relative presentation time.
    fn media_time(&self, seconds: f64) -> u64 {
        let units = (seconds * self.timescale()).round().max(0.0) as u64;
        self.representation.presentation_time_offset + units
    }
}

fn floor_index(value: f64) -> u64 {
    (value + INDEX_EPSILON).floor().max(0.0) as u64
}

fn ceil_index(value: f64) -> u64 {
    (value - INDEX_EPSILON).ceil().max(0.0) as u64
}

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

#[derive(Debug)]
pub struct SegmentResolver {
    config: ResolverConfig,
    clock: Clock,
    tracker: AvailabilityWindowTracker,
    builder: RequestBuilder,
    statuses: HashMap<MediaType, RequestStatus>,
}

impl SegmentResolver {
    pub fn new(config: ResolverConfig, clock: Clock, bus: EventBus) -> Self {
        let tracker = AvailabilityWindowTracker::new(config.live_offset_correction, bus);
        Self {
            config,
            clock,
            tracker,
            builder: RequestBuilder::new(),
            statuses: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    pub fn tracker(&self) -> &AvailabilityWindowTracker {
        &self.tracker
    }

    pub fn status(&self, media_type: MediaType) -> RequestStatus {
        self.statuses.get(&media_type).copied().unwrap_or_default()
    }

    /// Forgets the cursor of `media_type`, e.g. on seek or period switch.
    pub fn reset(&mut self, media_type: MediaType) {
        self.statuses.remove(&media_type);
    }

    /// Whether the cached list of `representation` must be recomputed before
    /// use: always without a list, and on every call for template based
    /// addressing in a dynamic presentation.
    pub fn is_segment_list_update_required(
        &self,
        mpd: &Mpd,
        representation: &Representation,
    ) -> bool {
        if !representation.cache.has_segments() {
            return true;
        }
        mpd.is_dynamic()
            && matches!(
                representation.segment_info,
                SegmentInfo::Template { .. } | SegmentInfo::Timeline { .. }
            )
    }

    /// Recomputes the segment list of a representation for its addressing
    /// mode and raises the live edge of dynamic presentations.
    pub fn update_segment_list(&self, mpd: &mut Mpd, r: RepresentationRef) -> DashResult<()> {
        let update = {
            let manifest: &Mpd = mpd;
            let representation = manifest.representation(r)?;
            let factory = SegmentFactory {
                mpd: manifest,
                period: &manifest.periods[r.period],
                representation,
            };
            match &representation.segment_info {
                SegmentInfo::Template { media } => self.template_segments(&factory, media),
                SegmentInfo::Timeline { media, entries } => {
                    self.timeline_segments(&factory, media, entries)
                }
                SegmentInfo::List { urls } => Some(Self::list_segments(&factory, urls)),
                SegmentInfo::Base { .. } => {
                    if representation.cache.has_segments() {
                        return Ok(());
                    }
                    return Err(DashError::IndexNotLoaded);
                }
                SegmentInfo::BaseUrl => Some(Self::base_url_segment(&factory)),
            }
        };

        let Some(update) = update else {
            tracing::debug!(?r, "Segment list unchanged, availability window unknown");
            return Ok(());
        };

        let bounds = update
            .segments
            .first()
            .zip(update.segments.last())
            .map(|(first, last)| (first.presentation_start_time, last.presentation_end_time()));
        tracing::debug!(
            ?r,
            segments = update.segments.len(),
            available = update.available_segments_number,
            "Segment list updated"
        );

        let representation = mpd.representation_mut(r)?;
        let cache = &mut representation.cache;
        cache.install(update.segments);
        cache.available_segments_number = update.available_segments_number;
        if update.availability_range.is_some() {
            cache.availability_range = update.availability_range;
        }
        cache.timeline_recorded |= update.timeline_recorded;

        if let (true, Some((start, end))) = (mpd.is_dynamic(), bounds) {
            self.tracker.update_live_edge(mpd, r.period, start, end);
        }
        Ok(())
    }

    fn template_segments(&self, factory: &SegmentFactory, media: &str) -> Option<ListUpdate> {
        let SegmentFactory {
            mpd,
            period,
            representation,
        } = factory;
        let Some(duration) = representation.segment_duration.filter(|d| *d > 0.0) else {
            tracing::warn!("SegmentTemplate without a usable duration");
            return None;
        };
        let window =
            self.tracker
                .segment_availability_range(mpd, period, representation, &self.clock)?;
        if !window.end.is_finite() {
            tracing::warn!("Unbounded availability window for SegmentTemplate");
            return None;
        }

        let start_index = floor_index((window.start - period.start) / duration);
        let mut end_index = ceil_index((window.end - period.start) / duration);
        if let Some(period_duration) = period.duration {
            end_index = end_index.min(ceil_index(period_duration / duration));
        }

        // keep what is still inside the window, append the rest
        let mut segments: Vec<Segment> = representation
            .cache
            .segments()
            .iter()
            .filter(|s| s.availability_idx >= start_index && s.availability_idx < end_index)
            .cloned()
            .collect();
        if segments.first().is_some_and(|s| s.availability_idx != start_index) {
            segments.clear();
        }
        let next = segments
            .last()
            .map_or(start_index, |s| s.availability_idx + 1);

        for index in next..end_index {
            let media_time = factory.media_time(index as f64 * duration);
            segments.push(factory.segment(index, media_time, duration, Some(media.to_string()), None));
        }

        Some(ListUpdate {
            available_segments_number: (end_index.saturating_sub(start_index)) as usize,
            availability_range: Some(window),
            timeline_recorded: false,
            segments,
        })
    }

    /// Every segment of a `SegmentTimeline` inside the period, bounded by
    /// the availability window for open repeats.
    fn timeline_in_period(
        &self,
        factory: &SegmentFactory,
        entries: &[TimelineEntry],
    ) -> Vec<TimelineSegment> {
        let SegmentFactory {
            mpd,
            period,
            representation,
        } = factory;
        let period_end = period.duration.map(|d| factory.media_time(d));
        let open_end = self
            .tracker
            .segment_availability_range(mpd, period, representation, &self.clock)
            .filter(|w| w.end.is_finite())
            .map(|w| factory.media_time((w.end - period.start).max(0.0)));

        let mut expanded = expand_timeline(entries, period_end, open_end);
        if let Some(period_end) = period_end {
            expanded.retain(|s| s.media_time < period_end);
        }
        expanded
    }

    fn timeline_segments(
        &self,
        factory: &SegmentFactory,
        media: &str,
        entries: &[TimelineEntry],
    ) -> Option<ListUpdate> {
        let SegmentFactory {
            mpd,
            representation,
            ..
        } = factory;
        let timescale = factory.timescale();

        let expanded = self.timeline_in_period(factory, entries);
        let total = expanded.len();

        let range = match (
            mpd.is_dynamic(),
            self.config.timeline_window,
            representation.cache.last_request_index,
        ) {
            (false, Some(window), Some(cursor)) => {
                let cursor = cursor as usize;
                let end = (cursor + window + 1).min(total);
                cursor.saturating_sub(window).min(end)..end
            }
            _ => 0..total,
        };

        let segments: Vec<Segment> = expanded[range.clone()]
            .iter()
            .enumerate()
            .map(|(i, s)| {
                factory.segment(
                    (range.start + i) as u64,
                    s.media_time,
                    s.duration as f64 / timescale,
                    Some(media.to_string()),
                    None,
                )
            })
            .collect();

        let record = !representation.cache.timeline_recorded;
        let availability_range = if record {
            let first = expanded.first();
            let last = expanded.last();
            first.zip(last).map(|(first, last)| AvailabilityRange {
                start: factory.presentation_time(first.media_time),
                end: factory.presentation_time(last.media_time + last.duration),
            })
        } else {
            None
        };

        Some(ListUpdate {
            segments,
            available_segments_number: if record {
                total
            } else {
                representation.cache.available_segments_number
            },
            availability_range,
            timeline_recorded: record,
        })
    }

    fn list_segments(factory: &SegmentFactory, urls: &[SegmentUrl]) -> ListUpdate {
        let SegmentFactory {
            period,
            representation,
            ..
        } = factory;
        let count = urls.len();
        let duration = representation
            .segment_duration
            .or_else(|| period.duration.map(|d| d / count.max(1) as f64))
            .unwrap_or(0.0);

        let segments = urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let media_time = factory.media_time(i as f64 * duration);
                factory.segment(i as u64, media_time, duration, url.media.clone(), url.media_range)
            })
            .collect();

        ListUpdate {
            segments,
            available_segments_number: count,
            availability_range: Some(AvailabilityRange {
                start: period.start,
                end: period.start + count as f64 * duration,
            }),
            timeline_recorded: false,
        }
    }

    fn base_url_segment(factory: &SegmentFactory) -> ListUpdate {
        let period = factory.period;
        let duration = period.duration.unwrap_or(0.0);
        let media_time = factory.representation.presentation_time_offset;
        ListUpdate {
            segments: vec![factory.segment(0, media_time, duration, None, None)],
            available_segments_number: 1,
            availability_range: Some(AvailabilityRange {
                start: period.start,
                end: period.start + duration,
            }),
            timeline_recorded: false,
        }
    }

    /// Index of the segment covering `time` (seconds, MPD timeline).
    ///
    /// The first pass uses the per media type tolerance, the second a wider
    /// one. A `SegmentTimeline` is then searched in full, since the cached
    /// list may only hold a window of it. With a known segment duration the
    /// last resort is an approximate index derived from it, otherwise the
    /// cached list ends.
    pub fn find_index_for_time(
        &self,
        mpd: &Mpd,
        r: RepresentationRef,
        time: f64,
    ) -> DashResult<Option<u64>> {
        let media_type = mpd.media_type(r)?;
        let representation = mpd.representation(r)?;
        let period = &mpd.periods[r.period];
        let segments = representation.cache.segments();

        let search = |epsilon: f64| {
            segments
                .iter()
                .find(|s| {
                    time >= s.presentation_start_time - epsilon
                        && time < s.presentation_end_time() + epsilon
                })
                .map(|s| s.availability_idx)
        };

        if let Some(index) = search(self.config.search_tolerance.for_media(media_type)) {
            return Ok(Some(index));
        }
        if let Some(index) = search(self.config.wide_search_tolerance) {
            return Ok(Some(index));
        }

        // a windowed static timeline still knows every segment
        if let (false, SegmentInfo::Timeline { entries, .. }) =
            (mpd.is_dynamic(), &representation.segment_info)
        {
            let factory = SegmentFactory {
                mpd,
                period,
                representation,
            };
            let expanded = self.timeline_in_period(&factory, entries);
            let epsilon = self.config.wide_search_tolerance;
            let timescale = factory.timescale();
            let covering = expanded.iter().position(|s| {
                let start = factory.presentation_time(s.media_time);
                time >= start - epsilon && time < start + s.duration as f64 / timescale + epsilon
            });
            let clamped = || {
                let first = expanded.first()?;
                if time < factory.presentation_time(first.media_time) {
                    Some(0)
                } else {
                    Some(expanded.len() - 1)
                }
            };
            if let Some(index) = covering.or_else(clamped) {
                return Ok(Some(index as u64));
            }
        }

        if let Some(duration) = representation.segment_duration.filter(|d| *d > 0.0) {
            let index = floor_index((time - period.start).max(0.0) / duration);
            tracing::warn!(time, index, "No exact segment match, using approximate index");
            return Ok(Some(index));
        }

        let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
            return Ok(None);
        };
        if time >= last.presentation_end_time() {
            return Ok(Some(last.availability_idx));
        }
        if time < first.presentation_start_time {
            return Ok(Some(first.availability_idx));
        }
        tracing::warn!(time, "No segment covers the requested time");
        Ok(None)
    }

    /// Whether `index` lies past the end of the representation.
    ///
    /// A dynamic presentation only finishes a period that has a duration and
    /// is followed by another period.
    pub fn is_media_finished(&self, mpd: &Mpd, r: RepresentationRef, index: u64) -> DashResult<bool> {
        let representation = mpd.representation(r)?;
        let period = &mpd.periods[r.period];
        let is_last_period = period.index + 1 >= mpd.periods.len();

        if mpd.is_dynamic() && (period.duration.is_none() || is_last_period) {
            return Ok(false);
        }

        let cache = &representation.cache;
        if !mpd.is_dynamic()
            && cache.has_segments()
            && cache.available_segments_number > 0
            && index >= cache.available_segments_number as u64
        {
            return Ok(true);
        }

        let relative_start = match cache.segment(index) {
            Some(segment) => segment.presentation_start_time - period.start,
            // outside a static timeline window but within the recorded count
            None if !mpd.is_dynamic() && index < cache.available_segments_number as u64 => {
                return Ok(false)
            }
            None => match representation.segment_duration {
                Some(duration) => index as f64 * duration,
                None => return Ok(false),
            },
        };
        Ok(period
            .duration
            .is_some_and(|duration| round5(relative_start) >= round5(duration)))
    }

    fn request_for_index(
        &mut self,
        mpd: &mut Mpd,
        r: RepresentationRef,
        media_type: MediaType,
        index: u64,
        state: CursorState,
    ) -> DashResult<SegmentRequest> {
        if self.is_media_finished(mpd, r, index)? {
            tracing::debug!(?media_type, index, "Media finished");
            let status = self.statuses.entry(media_type).or_default();
            status.index = Some(index);
            status.state = CursorState::Complete;
            return Ok(SegmentRequest::complete(media_type, Some(index)));
        }

        // static timelines may only be materialised around the cursor
        let representation = mpd.representation(r)?;
        if representation.cache.segment(index).is_none()
            && !mpd.is_dynamic()
            && matches!(representation.segment_info, SegmentInfo::Timeline { .. })
            && (index as usize) < representation.cache.available_segments_number
        {
            mpd.representation_mut(r)?.cache.last_request_index = Some(index);
            self.update_segment_list(mpd, r)?;
        }

        let representation = mpd.representation(r)?;
        let segment = representation
            .cache
            .segment(index)
            .ok_or(DashError::SegmentNotAvailable { index })?;
        let request = self
            .builder
            .build(media_type, &mpd.periods[r.period], representation, segment)?;

        mpd.representation_mut(r)?.cache.last_request_index = Some(index);
        let status = self.statuses.entry(media_type).or_default();
        status.index = Some(index);
        status.state = state;
        Ok(request)
    }

    /// Positions the cursor of the representation's media type on `time` and
    /// returns the matching request.
    pub fn resolve_for_time(
        &mut self,
        mpd: &mut Mpd,
        r: RepresentationRef,
        time: f64,
    ) -> DashResult<SegmentRequest> {
        let media_type = mpd.media_type(r)?;
        if self.is_segment_list_update_required(mpd, mpd.representation(r)?) {
            self.update_segment_list(mpd, r)?;
        }

        self.statuses.entry(media_type).or_default().requested_time = Some(time);
        let index = self
            .find_index_for_time(mpd, r, time)?
            .ok_or(DashError::SegmentNotAvailable { index: 0 })?;
        tracing::debug!(?media_type, time, index, "Resolved time to segment");

        self.request_for_index(mpd, r, media_type, index, CursorState::Positioned)
    }

    /// Advances the cursor by one segment.
    ///
    /// When the next segment is not available the cursor stays where it was
    /// and the error is returned.
    pub fn resolve_next(&mut self, mpd: &mut Mpd, r: RepresentationRef) -> DashResult<SegmentRequest> {
        let media_type = mpd.media_type(r)?;
        let status = self.status(media_type);
        let Some(current) = status.index else {
            return Err(DashError::NoPriorPosition(media_type));
        };
        if status.state == CursorState::Complete {
            return Ok(SegmentRequest::complete(media_type, Some(current)));
        }

        if self.is_segment_list_update_required(mpd, mpd.representation(r)?) {
            self.update_segment_list(mpd, r)?;
        }

        let next = current + 1;
        self.request_for_index(mpd, r, media_type, next, CursorState::Advanced)
            .inspect_err(|e| {
                tracing::debug!(?media_type, index = next, error = %e, "Cursor kept in place");
            })
    }

    /// Request for the initialization segment of a representation.
    pub fn initialization_request(
        &self,
        mpd: &Mpd,
        r: RepresentationRef,
    ) -> DashResult<Option<SegmentRequest>> {
        let media_type = mpd.media_type(r)?;
        let representation = mpd.representation(r)?;
        self.builder
            .initialization_request(media_type, &mpd.periods[r.period], representation)
    }
}
