//! Explicit manifest model consumed by the resolver.
//!
//! Times are seconds on the MPD timeline unless stated otherwise. Wall clock
//! instants use [`chrono`].

use chrono::{DateTime, Utc};
use iori_fmp4::TrackKind;
use url::Url;

use crate::{range::ByteRange, segment::SegmentCache, DashError, DashResult};

/// There exist two types of DASH presentations, indicated by MPD@type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentationType {
    /// Any media segment may be presented at any time.
    #[default]
    Static,
    /// The MPD timeline is mapped to wall clock time and segments become
    /// available, and cease to be available, with the passage of time.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Audio,
    Text,
}

impl MediaType {
    /// Detects the media type from `@contentType`, then `@mimeType`, then
    /// `@codecs` of subtitle tracks.
    pub fn detect(
        content_type: Option<&str>,
        mime_type: Option<&str>,
        codecs: Option<&str>,
    ) -> Option<Self> {
        let from_type = |value: &str| match value.split('/').next() {
            Some("video") => Some(Self::Video),
            Some("audio") => Some(Self::Audio),
            Some("text") => Some(Self::Text),
            _ => None,
        };

        content_type
            .and_then(from_type)
            .or_else(|| mime_type.and_then(from_type))
            .or_else(|| match mime_type {
                Some("application/ttml+xml") => Some(Self::Text),
                _ => None,
            })
            .or_else(|| {
                codecs
                    .filter(|c| c.starts_with("stpp") || c.starts_with("wvtt"))
                    .map(|_| Self::Text)
            })
    }
}

impl From<MediaType> for TrackKind {
    fn from(value: MediaType) -> Self {
        match value {
            MediaType::Video => TrackKind::Video,
            MediaType::Audio => TrackKind::Audio,
            MediaType::Text => TrackKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtcTiming {
    pub scheme_id_uri: String,
    pub value: Option<String>,
}

/// Live edge of a dynamic presentation, raised by the availability tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LiveEdge {
    /// Latest segment end observed in the last period.
    pub live_edge: Option<f64>,
    /// Earliest segment start observed in the first period.
    pub live_edge_s: Option<f64>,
    /// `live_edge` minus the suggested presentation delay, never before
    /// `live_edge_s`.
    pub live_edge_e: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Mpd {
    pub presentation_type: PresentationType,
    pub availability_start_time: Option<DateTime<Utc>>,
    pub media_presentation_duration: Option<f64>,
    pub time_shift_buffer_depth: Option<f64>,
    pub suggested_presentation_delay: Option<f64>,
    pub utc_timings: Vec<UtcTiming>,
    pub live_edge: LiveEdge,
    pub periods: Vec<Period>,
}

impl Mpd {
    pub fn is_dynamic(&self) -> bool {
        self.presentation_type == PresentationType::Dynamic
    }

    pub fn representation(&self, r: RepresentationRef) -> DashResult<&Representation> {
        self.periods
            .get(r.period)
            .and_then(|p| p.adaptation_sets.get(r.adaptation_set))
            .and_then(|a| a.representations.get(r.representation))
            .ok_or(DashError::NoRepresentation)
    }

    pub fn representation_mut(&mut self, r: RepresentationRef) -> DashResult<&mut Representation> {
        self.periods
            .get_mut(r.period)
            .and_then(|p| p.adaptation_sets.get_mut(r.adaptation_set))
            .and_then(|a| a.representations.get_mut(r.representation))
            .ok_or(DashError::NoRepresentation)
    }

    pub fn media_type(&self, r: RepresentationRef) -> DashResult<MediaType> {
        self.periods
            .get(r.period)
            .and_then(|p| p.adaptation_sets.get(r.adaptation_set))
            .map(|a| a.media_type)
            .ok_or(DashError::NoRepresentation)
    }

    /// Iterates all representations of a media type in a period.
    pub fn representations_of(
        &self,
        period: usize,
        media_type: MediaType,
    ) -> impl Iterator<Item = RepresentationRef> + '_ {
        self.periods
            .get(period)
            .into_iter()
            .flat_map(move |p| {
                p.adaptation_sets
                    .iter()
                    .enumerate()
                    .filter(move |(_, a)| a.media_type == media_type)
                    .flat_map(move |(ai, a)| {
                        (0..a.representations.len()).map(move |ri| RepresentationRef {
                            period,
                            adaptation_set: ai,
                            representation: ri,
                        })
                    })
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Period {
    pub id: Option<String>,
    /// Position of the period in [`Mpd::periods`].
    pub index: usize,
    pub start: f64,
    /// In a dynamic presentation the last period may have no duration.
    pub duration: Option<f64>,
    /// Which alternative base url segment requests use. Defaults to the first.
    pub base_url_index: Option<usize>,
    pub adaptation_sets: Vec<AdaptationSet>,
}

impl Period {
    pub fn end(&self) -> Option<f64> {
        self.duration.map(|duration| self.start + duration)
    }
}

#[derive(Debug, Clone)]
pub struct AdaptationSet {
    pub id: Option<String>,
    pub media_type: MediaType,
    pub representations: Vec<Representation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    /// `S@t`, in timescale units.
    pub time: Option<u64>,
    /// `S@d`, in timescale units.
    pub duration: u64,
    /// `S@r`; negative repeats until the next explicit `S@t` or period end.
    pub repeat: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentUrl {
    pub media: Option<String>,
    pub media_range: Option<ByteRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Initialization {
    /// Url template, relative to the representation base url. `None` means the
    /// base url itself.
    pub source_url: Option<String>,
    pub range: Option<ByteRange>,
}

/// Addressing mode of a representation.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentInfo {
    /// SegmentTemplate without SegmentTimeline.
    Template { media: String },
    /// SegmentTemplate with SegmentTimeline.
    Timeline {
        media: String,
        entries: Vec<TimelineEntry>,
    },
    /// SegmentList with explicit SegmentURLs.
    List { urls: Vec<SegmentUrl> },
    /// SegmentBase, segments described by a `sidx` box.
    Base { index_range: Option<ByteRange> },
    /// A single segment at the base url.
    BaseUrl,
}

#[derive(Debug, Clone)]
pub struct Representation {
    pub id: Option<String>,
    pub bandwidth: u64,
    pub codecs: Option<String>,
    pub mime_type: Option<String>,
    pub timescale: u32,
    /// Nominal segment duration in seconds, when the manifest declares one.
    pub segment_duration: Option<f64>,
    pub start_number: u64,
    /// Media time mapped to the period start, in timescale units.
    pub presentation_time_offset: u64,
    /// Seconds by which segments become available early.
    pub availability_time_offset: f64,
    /// Alternative base urls, already resolved.
    pub base_urls: Vec<Url>,
    pub initialization: Option<Initialization>,
    pub segment_info: SegmentInfo,
    /// Resolver state, owned by [`crate::SegmentResolver`].
    pub cache: SegmentCache,
}

impl Representation {
    pub fn new(segment_info: SegmentInfo) -> Self {
        Self {
            id: None,
            bandwidth: 0,
            codecs: None,
            mime_type: None,
            timescale: 1,
            segment_duration: None,
            start_number: 1,
            presentation_time_offset: 0,
            availability_time_offset: 0.0,
            base_urls: Vec::new(),
            initialization: None,
            segment_info,
            cache: SegmentCache::default(),
        }
    }

    /// `@presentationTimeOffset` in seconds.
    pub fn presentation_time_offset_seconds(&self) -> f64 {
        self.presentation_time_offset as f64 / self.timescale.max(1) as f64
    }

    pub fn base_url(&self, index: Option<usize>) -> DashResult<&Url> {
        let index = index.unwrap_or(0);
        self.base_urls
            .get(index)
            .or_else(|| self.base_urls.first())
            .ok_or(DashError::NoBaseUrl)
    }
}

/// Position of a representation inside an [`Mpd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepresentationRef {
    pub period: usize,
    pub adaptation_set: usize,
    pub representation: usize,
}

impl RepresentationRef {
    pub fn new(period: usize, adaptation_set: usize, representation: usize) -> Self {
        Self {
            period,
            adaptation_set,
            representation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_media_type() {
        assert_eq!(MediaType::detect(Some("audio"), None, None), Some(MediaType::Audio));
        assert_eq!(MediaType::detect(None, Some("video/mp4"), None), Some(MediaType::Video));
        assert_eq!(
            MediaType::detect(None, Some("application/mp4"), Some("stpp.ttml.im1t")),
            Some(MediaType::Text)
        );
        assert_eq!(MediaType::detect(Some("image"), Some("image/jpeg"), None), None);
    }
}
