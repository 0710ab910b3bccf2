use chrono::{DateTime, TimeDelta, Utc};
use iori_dash::{
    model::TimelineEntry, Clock, CursorState, DashError, DashEvent, EventBus, MediaType, Mpd,
    Period, PresentationType, RepresentationRef, RequestAction, ResolverConfig, SegmentInfo,
    SegmentResolver,
};

use crate::{base_url, init_test_tracing, segment_list, single_representation_mpd};

const VIDEO: RepresentationRef = RepresentationRef {
    period: 0,
    adaptation_set: 0,
    representation: 0,
};

fn resolver() -> SegmentResolver {
    SegmentResolver::new(ResolverConfig::default(), Clock::new(), EventBus::disabled())
}

fn template_mpd(period_duration: Option<f64>) -> Mpd {
    let mut representation = iori_dash::Representation::new(SegmentInfo::Template {
        media: "$RepresentationID$/seg-$Number$.m4s".to_string(),
    });
    representation.id = Some("v1".to_string());
    representation.timescale = 1000;
    representation.segment_duration = Some(4.0);
    representation.base_urls = base_url("https://cdn.example.com/vod/");

    single_representation_mpd(
        MediaType::Video,
        Period {
            duration: period_duration,
            ..Default::default()
        },
        representation,
    )
}

#[test]
fn test_find_index_for_time() {
    let mut representation = iori_dash::Representation::new(segment_list(3));
    representation.segment_duration = Some(4.0);
    representation.base_urls = base_url("https://cdn.example.com/vod/");
    let mut mpd = single_representation_mpd(MediaType::Video, Period::default(), representation);

    let resolver = resolver();
    resolver.update_segment_list(&mut mpd, VIDEO).unwrap();

    let starts: Vec<f64> = mpd
        .representation(VIDEO)
        .unwrap()
        .cache
        .segments()
        .iter()
        .map(|s| s.presentation_start_time)
        .collect();
    assert_eq!(starts, vec![0.0, 4.0, 8.0]);

    assert_eq!(resolver.find_index_for_time(&mpd, VIDEO, 0.0).unwrap(), Some(0));
    assert_eq!(resolver.find_index_for_time(&mpd, VIDEO, 5.0).unwrap(), Some(1));
    assert_eq!(resolver.find_index_for_time(&mpd, VIDEO, 8.1).unwrap(), Some(2));
    // beyond the list, derived from the nominal duration
    assert_eq!(resolver.find_index_for_time(&mpd, VIDEO, 100.0).unwrap(), Some(25));
}

#[test]
fn test_find_index_clamps_without_duration() {
    let mut representation = iori_dash::Representation::new(segment_list(3));
    representation.base_urls = base_url("https://cdn.example.com/vod/");
    let mut mpd = single_representation_mpd(
        MediaType::Audio,
        Period {
            duration: Some(12.0),
            ..Default::default()
        },
        representation,
    );

    let resolver = resolver();
    resolver.update_segment_list(&mut mpd, VIDEO).unwrap();
    assert_eq!(resolver.find_index_for_time(&mpd, VIDEO, 11.9).unwrap(), Some(2));
    assert_eq!(resolver.find_index_for_time(&mpd, VIDEO, 50.0).unwrap(), Some(2));
}

#[test]
fn test_resolve_sequence() {
    init_test_tracing();
    let mut mpd = template_mpd(Some(10.0));
    let mut resolver = resolver();

    let first = resolver.resolve_for_time(&mut mpd, VIDEO, 0.5).unwrap();
    assert_eq!(first.action, RequestAction::Download);
    assert_eq!(first.index, Some(0));
    assert_eq!(
        first.url.unwrap().as_str(),
        "https://cdn.example.com/vod/v1/seg-1.m4s"
    );
    assert_eq!(resolver.status(MediaType::Video).state, CursorState::Positioned);
    assert_eq!(resolver.status(MediaType::Video).requested_time, Some(0.5));

    let mut indexes = vec![first.index.unwrap()];
    loop {
        let request = resolver.resolve_next(&mut mpd, VIDEO).unwrap();
        if request.is_complete() {
            break;
        }
        assert_eq!(request.duration, 4.0);
        indexes.push(request.index.unwrap());
    }
    assert_eq!(indexes, vec![0, 1, 2]);
    assert_eq!(resolver.status(MediaType::Video).state, CursorState::Complete);

    // complete is terminal
    let request = resolver.resolve_next(&mut mpd, VIDEO).unwrap();
    assert!(request.is_complete());
    assert_eq!(request.media_type, MediaType::Video);

    // seeking repositions
    let request = resolver.resolve_for_time(&mut mpd, VIDEO, 5.0).unwrap();
    assert_eq!(request.index, Some(1));
    assert_eq!(request.start_time, 4.0);
    assert_eq!(resolver.status(MediaType::Video).state, CursorState::Positioned);
}

#[test]
fn test_resolve_next_without_position() {
    let mut mpd = template_mpd(Some(10.0));
    let mut resolver = resolver();

    let result = resolver.resolve_next(&mut mpd, VIDEO);
    assert!(matches!(result, Err(DashError::NoPriorPosition(MediaType::Video))));

    resolver.resolve_for_time(&mut mpd, VIDEO, 0.0).unwrap();
    resolver.reset(MediaType::Video);
    assert!(resolver.resolve_next(&mut mpd, VIDEO).is_err());
}

#[test]
fn test_timeline_addressing() {
    let mut representation = iori_dash::Representation::new(SegmentInfo::Timeline {
        media: "t-$Time$.m4s".to_string(),
        entries: vec![
            TimelineEntry {
                time: Some(0),
                duration: 4000,
                repeat: 2,
            },
            TimelineEntry {
                time: None,
                duration: 2000,
                repeat: 0,
            },
        ],
    });
    representation.timescale = 1000;
    representation.base_urls = base_url("https://cdn.example.com/vod/");
    let mut mpd = single_representation_mpd(
        MediaType::Video,
        Period {
            duration: Some(14.0),
            ..Default::default()
        },
        representation,
    );

    let mut resolver = resolver();
    let request = resolver.resolve_for_time(&mut mpd, VIDEO, 13.0).unwrap();
    assert_eq!(request.index, Some(3));
    assert_eq!(request.duration, 2.0);
    assert_eq!(
        request.url.unwrap().as_str(),
        "https://cdn.example.com/vod/t-12000.m4s"
    );

    let cache = &mpd.representation(VIDEO).unwrap().cache;
    assert_eq!(cache.available_segments_number, 4);
    assert_eq!(cache.last_request_index, Some(3));

    assert!(resolver.resolve_next(&mut mpd, VIDEO).unwrap().is_complete());
}

#[test]
fn test_timeline_window_follows_cursor() {
    let mut representation = iori_dash::Representation::new(SegmentInfo::Timeline {
        media: "t-$Time$.m4s".to_string(),
        entries: vec![TimelineEntry {
            time: Some(0),
            duration: 1000,
            repeat: 99,
        }],
    });
    representation.timescale = 1000;
    representation.segment_duration = Some(1.0);
    representation.base_urls = base_url("https://cdn.example.com/vod/");
    let mut mpd = single_representation_mpd(MediaType::Video, Period::default(), representation);

    let config = ResolverConfig {
        timeline_window: Some(5),
        ..Default::default()
    };
    let mut resolver = SegmentResolver::new(config, Clock::new(), EventBus::disabled());

    let request = resolver.resolve_for_time(&mut mpd, VIDEO, 50.5).unwrap();
    assert_eq!(request.index, Some(50));

    // the next rebuild only materializes segments around the cursor
    mpd.representation_mut(VIDEO).unwrap().cache.invalidate();
    resolver.update_segment_list(&mut mpd, VIDEO).unwrap();
    let cache = &mpd.representation(VIDEO).unwrap().cache;
    let indexes: Vec<u64> = cache.segments().iter().map(|s| s.availability_idx).collect();
    assert_eq!(indexes, (45..=55).collect::<Vec<_>>());
    assert_eq!(cache.available_segments_number, 100);

    // jumping outside the window rematerializes it
    let request = resolver.resolve_for_time(&mut mpd, VIDEO, 80.0).unwrap();
    assert_eq!(request.index, Some(80));
    let request = resolver.resolve_next(&mut mpd, VIDEO).unwrap();
    assert_eq!(request.index, Some(81));
}

#[test]
fn test_windowed_timeline_seek_with_mixed_durations() {
    let mut representation = iori_dash::Representation::new(SegmentInfo::Timeline {
        media: "t-$Time$.m4s".to_string(),
        entries: vec![
            TimelineEntry {
                time: Some(0),
                duration: 1000,
                repeat: 9,
            },
            TimelineEntry {
                time: None,
                duration: 5000,
                repeat: 9,
            },
        ],
    });
    representation.timescale = 1000;
    representation.segment_duration = Some(1.0);
    representation.base_urls = base_url("https://cdn.example.com/vod/");
    let mut mpd = single_representation_mpd(MediaType::Video, Period::default(), representation);

    let config = ResolverConfig {
        timeline_window: Some(2),
        ..Default::default()
    };
    let mut resolver = SegmentResolver::new(config, Clock::new(), EventBus::disabled());
    assert_eq!(
        resolver.resolve_for_time(&mut mpd, VIDEO, 5.5).unwrap().index,
        Some(5)
    );

    mpd.representation_mut(VIDEO).unwrap().cache.invalidate();
    resolver.update_segment_list(&mut mpd, VIDEO).unwrap();
    let cache = &mpd.representation(VIDEO).unwrap().cache;
    let indexes: Vec<u64> = cache.segments().iter().map(|s| s.availability_idx).collect();
    assert_eq!(indexes, vec![3, 4, 5, 6, 7]);
    assert_eq!(cache.available_segments_number, 20);

    // 30s lies in the long segments, far from what a 1s duration suggests
    let request = resolver.resolve_for_time(&mut mpd, VIDEO, 30.0).unwrap();
    assert_eq!(request.action, RequestAction::Download);
    assert_eq!(request.index, Some(14));
    assert_eq!(request.start_time, 30.0);
    assert_eq!(request.duration, 5.0);
    assert_eq!(
        request.url.unwrap().as_str(),
        "https://cdn.example.com/vod/t-30000.m4s"
    );
    let request = resolver.resolve_next(&mut mpd, VIDEO).unwrap();
    assert_eq!(request.index, Some(15));
    assert_eq!(request.start_time, 35.0);

    // past the end clamps to the last segment, which is followed by COMPLETE
    let request = resolver.resolve_for_time(&mut mpd, VIDEO, 200.0).unwrap();
    assert_eq!(request.index, Some(19));
    assert!(resolver.resolve_next(&mut mpd, VIDEO).unwrap().is_complete());
}

fn zero_point() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

#[test]
fn test_dynamic_template() {
    init_test_tracing();
    let mut mpd = template_mpd(None);
    mpd.presentation_type = PresentationType::Dynamic;
    mpd.availability_start_time = Some(zero_point());
    mpd.time_shift_buffer_depth = Some(30.0);
    if let Ok(representation) = mpd.representation_mut(VIDEO) {
        representation.segment_duration = Some(2.0);
    }

    let (bus, mut events) = EventBus::channel();
    let clock = Clock::pinned(zero_point() + TimeDelta::seconds(100));
    let mut resolver = SegmentResolver::new(ResolverConfig::default(), clock, bus);

    let request = resolver.resolve_for_time(&mut mpd, VIDEO, 96.5).unwrap();
    assert_eq!(request.index, Some(48));
    assert_eq!(
        request.url.as_ref().unwrap().as_str(),
        "https://cdn.example.com/vod/v1/seg-49.m4s"
    );
    assert_eq!(
        request.availability_start_time,
        Some(zero_point() + TimeDelta::seconds(98))
    );
    assert_eq!(
        request.availability_end_time,
        Some(zero_point() + TimeDelta::seconds(128))
    );

    let segments = mpd.representation(VIDEO).unwrap().cache.segments();
    assert_eq!(segments.first().unwrap().availability_idx, 34);
    assert_eq!(segments.last().unwrap().availability_idx, 48);
    assert_eq!(mpd.live_edge.live_edge_s, Some(68.0));
    assert_eq!(mpd.live_edge.live_edge, Some(98.0));
    assert!(matches!(
        events.try_recv(),
        Ok(DashEvent::LiveEdgeUpdated { live_edge_e, .. }) if live_edge_e == 98.0
    ));

    // not produced yet, the cursor stays
    let result = resolver.resolve_next(&mut mpd, VIDEO);
    assert!(matches!(result, Err(DashError::SegmentNotAvailable { index: 49 })));
    assert_eq!(resolver.status(MediaType::Video).index, Some(48));

    resolver
        .clock_mut()
        .pin(zero_point() + TimeDelta::seconds(102));
    let request = resolver.resolve_next(&mut mpd, VIDEO).unwrap();
    assert_eq!(request.index, Some(49));
    let segments = mpd.representation(VIDEO).unwrap().cache.segments();
    assert_eq!(segments.first().unwrap().availability_idx, 35);
    assert_eq!(mpd.live_edge.live_edge, Some(100.0));
    assert_eq!(mpd.live_edge.live_edge_s, Some(70.0));

    // the live edge never moves back
    resolver
        .clock_mut()
        .pin(zero_point() + TimeDelta::seconds(90));
    resolver.update_segment_list(&mut mpd, VIDEO).unwrap();
    assert_eq!(mpd.live_edge.live_edge, Some(100.0));
    assert_eq!(mpd.live_edge.live_edge_s, Some(70.0));
    assert_eq!(mpd.live_edge.live_edge_e, 100.0);
}

#[test]
fn test_base_requires_index() {
    let mut representation =
        iori_dash::Representation::new(SegmentInfo::Base { index_range: None });
    representation.base_urls = base_url("https://cdn.example.com/vod/video.mp4");
    let mut mpd = single_representation_mpd(MediaType::Video, Period::default(), representation);

    let result = resolver().resolve_for_time(&mut mpd, VIDEO, 0.0);
    assert!(matches!(result, Err(DashError::IndexNotLoaded)));
}

#[test]
fn test_base_url_single_segment() {
    let mut representation = iori_dash::Representation::new(SegmentInfo::BaseUrl);
    representation.base_urls = base_url("https://cdn.example.com/vod/subtitles.vtt");
    let mut mpd = single_representation_mpd(
        MediaType::Text,
        Period {
            duration: Some(60.0),
            ..Default::default()
        },
        representation,
    );

    let mut resolver = resolver();
    let request = resolver.resolve_for_time(&mut mpd, VIDEO, 30.0).unwrap();
    assert_eq!(request.media_type, MediaType::Text);
    assert_eq!(request.index, Some(0));
    assert_eq!(request.duration, 60.0);
    assert_eq!(
        request.url.unwrap().as_str(),
        "https://cdn.example.com/vod/subtitles.vtt"
    );
    assert!(resolver.resolve_next(&mut mpd, VIDEO).unwrap().is_complete());
}

#[test]
fn test_dynamic_window_slides() {
    let mut mpd = template_mpd(None);
    mpd.presentation_type = PresentationType::Dynamic;
    mpd.availability_start_time = Some(zero_point());
    mpd.time_shift_buffer_depth = Some(30.0);
    mpd.representation_mut(VIDEO).unwrap().segment_duration = Some(2.0);

    let clock = Clock::pinned(zero_point() + TimeDelta::seconds(100));
    let mut resolver = SegmentResolver::new(ResolverConfig::default(), clock, EventBus::disabled());
    let request = resolver.resolve_for_time(&mut mpd, VIDEO, 70.0).unwrap();
    assert_eq!(request.index, Some(35));

    let mut previous_edge = mpd.live_edge;
    for (now, first, last) in [(130, 49, 63), (160, 64, 78)] {
        resolver
            .clock_mut()
            .pin(zero_point() + TimeDelta::seconds(now));
        resolver.update_segment_list(&mut mpd, VIDEO).unwrap();

        let cache = &mpd.representation(VIDEO).unwrap().cache;
        let indexes: Vec<u64> = cache.segments().iter().map(|s| s.availability_idx).collect();
        assert_eq!(indexes, (first..=last).collect::<Vec<_>>());
        assert_eq!(cache.available_segments_number, 15);

        let edge = mpd.live_edge;
        assert!(edge.live_edge > previous_edge.live_edge);
        assert!(edge.live_edge_s > previous_edge.live_edge_s);
        previous_edge = edge;
    }
    assert_eq!(mpd.live_edge.live_edge_s, Some(128.0));
    assert_eq!(mpd.live_edge.live_edge, Some(158.0));

    // early segments have left the time shift buffer
    let result = resolver.resolve_for_time(&mut mpd, VIDEO, 70.0);
    assert!(matches!(result, Err(DashError::SegmentNotAvailable { index: 35 })));
}
