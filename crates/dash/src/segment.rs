use chrono::{DateTime, Utc};
use url::Url;

use crate::{range::ByteRange, MediaType};

/// One addressable media unit of a representation.
///
/// Segments are rebuilt, never mutated, when the manifest changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Dense index, strictly increasing within a representation.
    pub availability_idx: u64,
    /// Value of `$Number$`.
    pub number: u64,
    /// Value of `$Time$`, in timescale units.
    pub media_time: u64,
    /// Start on the media timeline, seconds.
    pub media_start_time: f64,
    /// Start on the MPD timeline, seconds.
    pub presentation_start_time: f64,
    pub duration: f64,
    pub availability_start_time: Option<DateTime<Utc>>,
    pub availability_end_time: Option<DateTime<Utc>>,
    /// Wall clock instant of the presentation start, dynamic only.
    pub wall_start_time: Option<DateTime<Utc>>,
    /// Url template or reference, relative to the representation base url.
    /// `None` addresses the base url itself.
    pub media: Option<String>,
    pub range: Option<ByteRange>,
}

impl Segment {
    pub fn presentation_end_time(&self) -> f64 {
        self.presentation_start_time + self.duration
    }
}

/// Presentation time span for which segments can be requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvailabilityRange {
    pub start: f64,
    pub end: f64,
}

/// Resolver state kept on a representation.
#[derive(Debug, Clone, Default)]
pub struct SegmentCache {
    /// `None` until a list was computed.
    pub segments: Option<Vec<Segment>>,
    pub available_segments_number: usize,
    pub availability_range: Option<AvailabilityRange>,
    /// `availability_idx` of the first cached segment.
    pub index_offset: u64,
    pub last_request_index: Option<u64>,
    /// Timeline counts and range are recorded once per full materialisation.
    pub(crate) timeline_recorded: bool,
}

impl SegmentCache {
    pub fn has_segments(&self) -> bool {
        self.segments.is_some()
    }

    pub fn segments(&self) -> &[Segment] {
        self.segments.as_deref().unwrap_or_default()
    }

    pub fn segment(&self, index: u64) -> Option<&Segment> {
        let segments = self.segments.as_deref()?;
        let position = index.checked_sub(self.index_offset)? as usize;
        segments
            .get(position)
            .filter(|s| s.availability_idx == index)
            .or_else(|| segments.iter().find(|s| s.availability_idx == index))
    }

    pub(crate) fn install(&mut self, segments: Vec<Segment>) {
        self.index_offset = segments.first().map(|s| s.availability_idx).unwrap_or(0);
        self.segments = Some(segments);
    }

    /// Drops the list so the next resolution rebuilds it.
    pub fn invalidate(&mut self) {
        *self = Self {
            last_request_index: self.last_request_index,
            ..Self::default()
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    Download,
    /// Terminal: nothing more to request in the current period.
    Complete,
}

/// A resolved, ready to fetch request.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRequest {
    pub action: RequestAction,
    pub media_type: MediaType,
    pub index: Option<u64>,
    pub url: Option<Url>,
    pub range: Option<ByteRange>,
    pub start_time: f64,
    pub media_start_time: f64,
    pub duration: f64,
    pub timescale: u32,
    pub representation_id: Option<String>,
    pub bandwidth: u64,
    pub availability_start_time: Option<DateTime<Utc>>,
    pub availability_end_time: Option<DateTime<Utc>>,
    pub wall_start_time: Option<DateTime<Utc>>,
}

impl SegmentRequest {
    pub fn new(action: RequestAction, media_type: MediaType) -> Self {
        Self {
            action,
            media_type,
            index: None,
            url: None,
            range: None,
            start_time: 0.0,
            media_start_time: 0.0,
            duration: 0.0,
            timescale: 1,
            representation_id: None,
            bandwidth: 0,
            availability_start_time: None,
            availability_end_time: None,
            wall_start_time: None,
        }
    }

    pub fn complete(media_type: MediaType, index: Option<u64>) -> Self {
        Self {
            index,
            ..Self::new(RequestAction::Complete, media_type)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.action == RequestAction::Complete
    }
}
