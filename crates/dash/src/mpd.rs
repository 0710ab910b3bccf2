//! Conversion of a parsed `dash_mpd::MPD` into the resolver model.

use dash_mpd::{SegmentBase, SegmentList, SegmentTemplate, MPD};
use url::Url;

use crate::{
    model::{
        AdaptationSet, Initialization, Mpd, Period, PresentationType, Representation,
        SegmentInfo, SegmentUrl, TimelineEntry, UtcTiming,
    },
    range::ByteRange,
    url::resolve_base_urls,
    DashError, DashResult, MediaType,
};

fn base_url_elements(elements: &[dash_mpd::BaseURL]) -> Vec<String> {
    elements.iter().map(|u| u.base.clone()).collect()
}

fn parse_range(range: Option<&str>) -> DashResult<Option<ByteRange>> {
    range.map(ByteRange::parse).transpose()
}

/// `SegmentTemplate` attributes after inheritance from outer levels.
#[derive(Default, Clone)]
struct TemplateValues {
    media: Option<String>,
    initialization: Option<String>,
    duration: Option<f64>,
    start_number: Option<u64>,
    timescale: Option<u64>,
    presentation_time_offset: Option<u64>,
    availability_time_offset: Option<f64>,
    timeline: Option<Vec<TimelineEntry>>,
}

impl TemplateValues {
    /// Values of `template` override the inherited ones.
    fn merge(&self, template: Option<&SegmentTemplate>) -> Self {
        let Some(template) = template else {
            return self.clone();
        };
        Self {
            media: template.media.clone().or_else(|| self.media.clone()),
            initialization: template
                .initialization
                .clone()
                .or_else(|| self.initialization.clone()),
            duration: template.duration.or(self.duration),
            start_number: template.startNumber.or(self.start_number),
            timescale: template.timescale.or(self.timescale),
            presentation_time_offset: template
                .presentationTimeOffset
                .or(self.presentation_time_offset),
            availability_time_offset: template
                .availabilityTimeOffset
                .or(self.availability_time_offset),
            timeline: template
                .SegmentTimeline
                .as_ref()
                .map(|timeline| {
                    timeline
                        .segments
                        .iter()
                        .map(|s| TimelineEntry {
                            time: s.t,
                            duration: s.d,
                            repeat: s.r.unwrap_or(0),
                        })
                        .collect()
                })
                .or_else(|| self.timeline.clone()),
        }
    }

    fn is_present(&self) -> bool {
        self.media.is_some() || self.initialization.is_some() || self.timeline.is_some()
    }
}

/// Addressing information inherited from the period and adaptation set.
#[derive(Default, Clone)]
struct Inherited<'a> {
    segment_base: Option<&'a SegmentBase>,
    segment_list: Option<&'a SegmentList>,
    template: TemplateValues,
}

impl<'a> Inherited<'a> {
    fn merge(
        &self,
        segment_base: Option<&'a SegmentBase>,
        segment_list: Option<&'a SegmentList>,
        template: Option<&SegmentTemplate>,
    ) -> Self {
        Self {
            segment_base: segment_base.or(self.segment_base),
            segment_list: segment_list.or(self.segment_list),
            template: self.template.merge(template),
        }
    }
}

fn convert_initialization(
    initialization: Option<&dash_mpd::Initialization>,
) -> DashResult<Option<Initialization>> {
    initialization
        .map(|i| {
            Ok(Initialization {
                source_url: i.sourceURL.clone(),
                range: parse_range(i.range.as_deref())?,
            })
        })
        .transpose()
}

fn convert_representation(
    parent_base_urls: &[Url],
    inherited: &Inherited,
    representation: &dash_mpd::Representation,
) -> DashResult<Representation> {
    let inherited = inherited.merge(
        representation.SegmentBase.as_ref(),
        representation.SegmentList.as_ref(),
        representation.SegmentTemplate.as_ref(),
    );

    let mut result = if let Some(segment_base) = inherited.segment_base {
        let mut result = Representation::new(SegmentInfo::Base {
            index_range: parse_range(segment_base.indexRange.as_deref())?,
        });
        result.timescale = segment_base.timescale.unwrap_or(1) as u32;
        result.presentation_time_offset = segment_base.presentationTimeOffset.unwrap_or(0);
        result.availability_time_offset = segment_base.availabilityTimeOffset.unwrap_or(0.0);
        result.initialization = convert_initialization(segment_base.Initialization.as_ref())?;
        result
    } else if let Some(segment_list) = inherited.segment_list {
        let urls = segment_list
            .segment_urls
            .iter()
            .map(|u| {
                Ok(SegmentUrl {
                    media: u.media.clone(),
                    media_range: parse_range(u.mediaRange.as_deref())?,
                })
            })
            .collect::<DashResult<Vec<_>>>()?;
        let mut result = Representation::new(SegmentInfo::List { urls });
        let timescale = segment_list.timescale.unwrap_or(1);
        result.timescale = timescale as u32;
        result.start_number = segment_list.startNumber.unwrap_or(1);
        result.segment_duration = segment_list
            .duration
            .map(|d| d as f64 / timescale.max(1) as f64);
        result.initialization = convert_initialization(segment_list.Initialization.as_ref())?;
        result
    } else if inherited.template.is_present() {
        let template = &inherited.template;
        let timescale = template.timescale.unwrap_or(1).max(1);
        let media = template.media.clone().ok_or_else(|| {
            DashError::MpdParsing("Missing media url template in representation".to_string())
        })?;

        let mut result = match &template.timeline {
            Some(entries) => {
                let first = entries.first().map(|e| e.duration as f64 / timescale as f64);
                let mut result = Representation::new(SegmentInfo::Timeline {
                    media,
                    entries: entries.clone(),
                });
                result.segment_duration = first;
                result
            }
            None => {
                let duration = template.duration.ok_or_else(|| {
                    DashError::MpdParsing("Missing duration in SegmentTemplate".to_string())
                })?;
                let mut result = Representation::new(SegmentInfo::Template { media });
                result.segment_duration = Some(duration / timescale as f64);
                result
            }
        };
        result.timescale = timescale as u32;
        result.start_number = template.start_number.unwrap_or(1);
        result.presentation_time_offset = template.presentation_time_offset.unwrap_or(0);
        result.availability_time_offset = template.availability_time_offset.unwrap_or(0.0);
        result.initialization = template.initialization.clone().map(|source_url| Initialization {
            source_url: Some(source_url),
            range: None,
        });
        result
    } else {
        Representation::new(SegmentInfo::BaseUrl)
    };

    result.id = representation.id.clone();
    result.bandwidth = representation.bandwidth.unwrap_or(0);
    result.codecs = representation.codecs.clone();
    result.mime_type = representation.mimeType.clone();
    result.base_urls =
        resolve_base_urls(parent_base_urls, &base_url_elements(&representation.BaseURL))?;
    Ok(result)
}

fn convert_adaptation_set(
    parent_base_urls: &[Url],
    inherited: &Inherited,
    adaptation: &dash_mpd::AdaptationSet,
) -> DashResult<Option<AdaptationSet>> {
    let first = adaptation.representations.first();
    let media_type = MediaType::detect(
        adaptation
            .contentType
            .as_deref()
            .or_else(|| first.and_then(|r| r.contentType.as_deref())),
        adaptation
            .mimeType
            .as_deref()
            .or_else(|| first.and_then(|r| r.mimeType.as_deref())),
        adaptation
            .codecs
            .as_deref()
            .or_else(|| first.and_then(|r| r.codecs.as_deref())),
    );
    let Some(media_type) = media_type else {
        tracing::debug!(id = ?adaptation.id, "Skipping adaptation set of unknown type");
        return Ok(None);
    };

    let base_urls = resolve_base_urls(parent_base_urls, &base_url_elements(&adaptation.BaseURL))?;
    let inherited = inherited.merge(
        adaptation.SegmentBase.as_ref(),
        adaptation.SegmentList.as_ref(),
        adaptation.SegmentTemplate.as_ref(),
    );

    let mut representations = Vec::with_capacity(adaptation.representations.len());
    for representation in &adaptation.representations {
        let mut representation = convert_representation(&base_urls, &inherited, representation)?;
        if representation.codecs.is_none() {
            representation.codecs = adaptation.codecs.clone();
        }
        if representation.mime_type.is_none() {
            representation.mime_type = adaptation.mimeType.clone();
        }
        representations.push(representation);
    }

    Ok(Some(AdaptationSet {
        id: adaptation.id.clone(),
        media_type,
        representations,
    }))
}

impl Mpd {
    /// Parses an MPD document. `mpd_url` is the manifest location, used to
    /// resolve relative `BaseURL`s and segment urls.
    pub fn parse(xml: &str, mpd_url: Option<&Url>) -> DashResult<Self> {
        let mpd = dash_mpd::parse(xml)?;
        Self::from_dash_mpd(&mpd, mpd_url)
    }

    pub fn from_dash_mpd(mpd: &MPD, mpd_url: Option<&Url>) -> DashResult<Self> {
        let presentation_type = match mpd.mpdtype.as_deref() {
            Some("dynamic") => PresentationType::Dynamic,
            _ => PresentationType::Static,
        };

        let root: Vec<Url> = mpd_url.into_iter().cloned().collect();
        let mpd_base_urls = resolve_base_urls(&root, &base_url_elements(&mpd.base_url))?;

        let mut periods: Vec<Period> = Vec::with_capacity(mpd.periods.len());
        for (index, period) in mpd.periods.iter().enumerate() {
            let start = match (period.start, periods.last_mut()) {
                (Some(start), previous) => {
                    let start = start.as_secs_f64();
                    // an open previous period ends where this one starts
                    if let Some(previous) = previous.filter(|p| p.duration.is_none()) {
                        previous.duration = Some(start - previous.start);
                    }
                    start
                }
                (None, None) => 0.0,
                (None, Some(previous)) => previous.end().ok_or_else(|| {
                    DashError::MpdParsing(format!(
                        "Period {index} has no start and the previous period no duration"
                    ))
                })?,
            };

            let base_urls = resolve_base_urls(&mpd_base_urls, &base_url_elements(&period.BaseURL))?;
            let inherited = Inherited::default().merge(
                period.SegmentBase.as_ref(),
                period.SegmentList.as_ref(),
                period.SegmentTemplate.as_ref(),
            );

            let mut adaptation_sets = Vec::with_capacity(period.adaptations.len());
            for adaptation in &period.adaptations {
                if let Some(adaptation_set) =
                    convert_adaptation_set(&base_urls, &inherited, adaptation)?
                {
                    adaptation_sets.push(adaptation_set);
                }
            }

            periods.push(Period {
                id: period.id.clone(),
                index,
                start,
                duration: period.duration.map(|d| d.as_secs_f64()),
                base_url_index: None,
                adaptation_sets,
            });
        }

        let media_presentation_duration = mpd.mediaPresentationDuration.map(|d| d.as_secs_f64());
        if let (Some(total), Some(last)) = (media_presentation_duration, periods.last_mut()) {
            if last.duration.is_none() {
                last.duration = Some((total - last.start).max(0.0));
            }
        }

        Ok(Self {
            presentation_type,
            availability_start_time: mpd.availabilityStartTime,
            media_presentation_duration,
            time_shift_buffer_depth: mpd.timeShiftBufferDepth.map(|d| d.as_secs_f64()),
            suggested_presentation_delay: mpd.suggestedPresentationDelay.map(|d| d.as_secs_f64()),
            utc_timings: mpd
                .UTCTiming
                .iter()
                .map(|timing| UtcTiming {
                    scheme_id_uri: timing.schemeIdUri.clone(),
                    value: timing.value.clone(),
                })
                .collect(),
            live_edge: Default::default(),
            periods,
        })
    }
}
