use url::Url;

use crate::{
    model::{Period, Representation},
    segment::{RequestAction, Segment, SegmentRequest},
    template::Template,
    url::merge_baseurls,
    DashResult, MediaType,
};

/// Turns segments into ready to fetch requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestBuilder;

impl RequestBuilder {
    pub fn new() -> Self {
        Self
    }

    fn template<'a>(representation: &Representation, segment: Option<&Segment>) -> Template<'a> {
        let mut template = Template::new();
        template
            .insert_optional(Template::REPRESENTATION_ID, representation.id.clone())
            .insert(Template::BANDWIDTH, representation.bandwidth.to_string());
        if let Some(segment) = segment {
            template
                .insert(Template::NUMBER, segment.number.to_string())
                .insert(Template::TIME, segment.media_time.to_string());
        }
        template
    }

    fn resolve_url(
        representation: &Representation,
        period: &Period,
        relative: Option<&str>,
        template: &Template,
    ) -> DashResult<Url> {
        let base_url = representation.base_url(period.base_url_index)?;
        match relative {
            Some(relative) => merge_baseurls(base_url, &template.resolve(relative)),
            None => Ok(base_url.clone()),
        }
    }

    /// Absolute url of a media segment after token substitution.
    pub fn media_url(
        &self,
        period: &Period,
        representation: &Representation,
        segment: &Segment,
    ) -> DashResult<Url> {
        let template = Self::template(representation, Some(segment));
        Self::resolve_url(representation, period, segment.media.as_deref(), &template)
    }

    pub fn build(
        &self,
        media_type: MediaType,
        period: &Period,
        representation: &Representation,
        segment: &Segment,
    ) -> DashResult<SegmentRequest> {
        let url = self.media_url(period, representation, segment)?;
        Ok(SegmentRequest {
            action: RequestAction::Download,
            media_type,
            index: Some(segment.availability_idx),
            url: Some(url),
            range: segment.range,
            start_time: segment.presentation_start_time,
            media_start_time: segment.media_start_time,
            duration: segment.duration,
            timescale: representation.timescale,
            representation_id: representation.id.clone(),
            bandwidth: representation.bandwidth,
            availability_start_time: segment.availability_start_time,
            availability_end_time: segment.availability_end_time,
            wall_start_time: segment.wall_start_time,
        })
    }

    /// Request for the initialization segment, if the manifest declares one.
    pub fn initialization_request(
        &self,
        media_type: MediaType,
        period: &Period,
        representation: &Representation,
    ) -> DashResult<Option<SegmentRequest>> {
        let Some(initialization) = &representation.initialization else {
            return Ok(None);
        };

        let template = Self::template(representation, None);
        let url = Self::resolve_url(
            representation,
            period,
            initialization.source_url.as_deref(),
            &template,
        )?;
        Ok(Some(SegmentRequest {
            url: Some(url),
            range: initialization.range,
            start_time: period.start,
            timescale: representation.timescale,
            representation_id: representation.id.clone(),
            bandwidth: representation.bandwidth,
            ..SegmentRequest::new(RequestAction::Download, media_type)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::SegmentInfo, range::ByteRange};

    fn representation() -> Representation {
        let mut representation = Representation::new(SegmentInfo::Template {
            media: "$RepresentationID$/seg-$Number%05d$.m4s".to_string(),
        });
        representation.id = Some("video-1".to_string());
        representation.bandwidth = 800000;
        representation.timescale = 90000;
        representation.base_urls = vec![
            Url::parse("https://a.example.com/live/").unwrap(),
            Url::parse("https://b.example.com/live/").unwrap(),
        ];
        representation
    }

    fn segment() -> Segment {
        Segment {
            availability_idx: 41,
            number: 42,
            media_time: 42 * 180000,
            media_start_time: 82.0,
            presentation_start_time: 82.0,
            duration: 2.0,
            availability_start_time: None,
            availability_end_time: None,
            wall_start_time: None,
            media: Some("$RepresentationID$/seg-$Number%05d$.m4s".to_string()),
            range: None,
        }
    }

    #[test]
    fn test_build_request() {
        let period = Period::default();
        let request = RequestBuilder::new()
            .build(MediaType::Video, &period, &representation(), &segment())
            .unwrap();

        assert_eq!(request.action, RequestAction::Download);
        assert_eq!(
            request.url.unwrap().as_str(),
            "https://a.example.com/live/video-1/seg-00042.m4s"
        );
        assert_eq!(request.index, Some(41));
        assert_eq!(request.duration, 2.0);
        assert_eq!(request.timescale, 90000);
    }

    #[test]
    fn test_base_url_index() {
        let period = Period {
            base_url_index: Some(1),
            ..Default::default()
        };
        let url = RequestBuilder::new()
            .media_url(&period, &representation(), &segment())
            .unwrap();
        assert_eq!(url.host_str(), Some("b.example.com"));

        let period = Period {
            base_url_index: Some(7),
            ..Default::default()
        };
        let url = RequestBuilder::new()
            .media_url(&period, &representation(), &segment())
            .unwrap();
        assert_eq!(url.host_str(), Some("a.example.com"));
    }

    #[test]
    fn test_initialization_request() {
        let mut representation = representation();
        let builder = RequestBuilder::new();
        let period = Period::default();
        assert!(builder
            .initialization_request(MediaType::Video, &period, &representation)
            .unwrap()
            .is_none());

        representation.initialization = Some(crate::model::Initialization {
            source_url: Some("$RepresentationID$/init.mp4".to_string()),
            range: Some(ByteRange::inclusive(0, 999)),
        });
        let request = builder
            .initialization_request(MediaType::Video, &period, &representation)
            .unwrap()
            .unwrap();
        assert_eq!(request.action, RequestAction::Download);
        assert_eq!(
            request.url.unwrap().as_str(),
            "https://a.example.com/live/video-1/init.mp4"
        );
        assert_eq!(request.range.unwrap().to_string(), "0-999");
    }
}
