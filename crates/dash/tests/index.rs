use std::{future::Future, sync::Mutex};

use bytes::Bytes;
use iori_dash::{
    fmp4::TrackKind, ByteRange, DashError, DashResult, EventBus, HttpTransport, IndexLoader,
    MediaType, Period, Representation, RepresentationRef, ResolverConfig, SegmentInfo,
    SegmentResolver, Transport,
};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::{
    base_url,
    boxes::{concat, init_segment, make_box, sidx},
    init_test_tracing, single_representation_mpd,
};

const VIDEO: RepresentationRef = RepresentationRef {
    period: 0,
    adaptation_set: 0,
    representation: 0,
};

/// Serves byte ranges of one in-memory resource and records every request.
struct MemoryTransport {
    data: Bytes,
    requests: Mutex<Vec<Option<ByteRange>>>,
}

impl MemoryTransport {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<Option<ByteRange>> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for MemoryTransport {
    fn fetch_range(
        &self,
        _url: &Url,
        range: Option<ByteRange>,
    ) -> impl Future<Output = DashResult<Bytes>> + Send {
        self.requests.lock().unwrap().push(range);
        let len = self.data.len();
        let data = match range {
            Some(range) => {
                let start = (range.offset as usize).min(len);
                let end = range
                    .last_byte()
                    .map_or(len, |last| (last as usize + 1).min(len));
                self.data.slice(start..end)
            }
            None => self.data.clone(),
        };
        async move { Ok(data) }
    }
}

fn url() -> Url {
    Url::parse("https://cdn.example.com/vod/video.mp4").unwrap()
}

/// Top-level index with two nested indexes of two 2s media references each.
fn nested_resource() -> (Vec<u8>, usize) {
    let nested = |ept: u32| sidx(1000, ept, &[(false, 500, 2000), (false, 500, 2000)]);
    let first = concat(&[&nested(0), &[0; 1000]]);
    let second = concat(&[&nested(4000), &[0; 1000]]);
    let top = sidx(
        1000,
        0,
        &[
            (true, first.len() as u32, 4000),
            (true, second.len() as u32, 4000),
        ],
    );
    let top_len = top.len();
    (concat(&[&top, &first, &second]), top_len)
}

#[tokio::test]
async fn test_nested_index() -> anyhow::Result<()> {
    init_test_tracing();
    let (data, top_len) = nested_resource();
    let nested_len = sidx(1000, 0, &[(false, 500, 2000), (false, 500, 2000)]).len();
    let transport = MemoryTransport::new(data);
    let loader = IndexLoader::new(transport, &ResolverConfig::default());

    let top_range = ByteRange::inclusive(0, top_len as u64 - 1);
    let references = loader.load_segment_index(&url(), Some(top_range)).await?;
    assert_eq!(references.len(), 4);

    let first_media = (top_len + nested_len) as u64;
    assert_eq!(references[0].offset, first_media);
    assert_eq!(references[1].offset, first_media + 500);
    let second_media = first_media + 1000 + nested_len as u64;
    assert_eq!(references[2].offset, second_media);
    let starts: Vec<f64> = references.iter().map(|r| r.start_seconds()).collect();
    assert_eq!(starts, vec![0.0, 2.0, 4.0, 6.0]);

    Ok(())
}

#[tokio::test]
async fn test_load_installs_segments() -> anyhow::Result<()> {
    let (data, top_len) = nested_resource();
    let mut representation = Representation::new(SegmentInfo::Base {
        index_range: Some(ByteRange::inclusive(0, top_len as u64 - 1)),
    });
    representation.timescale = 1000;
    representation.base_urls = vec![url()];
    let mut mpd = single_representation_mpd(MediaType::Video, Period::default(), representation);

    let config = ResolverConfig {
        min_segment_duration: Some(3.0),
        ..Default::default()
    };
    let loader = IndexLoader::new(MemoryTransport::new(data), &config);
    loader.load(&mut mpd, VIDEO).await?;

    let cache = &mpd.representation(VIDEO)?.cache;
    assert_eq!(cache.available_segments_number, 2);
    let durations: Vec<f64> = cache.segments().iter().map(|s| s.duration).collect();
    assert_eq!(durations, vec![4.0, 4.0]);
    let range = cache.availability_range.unwrap();
    assert_eq!((range.start, range.end), (0.0, 8.0));

    let mut resolver = SegmentResolver::new(config, Default::default(), EventBus::disabled());
    let request = resolver.resolve_for_time(&mut mpd, VIDEO, 5.0)?;
    assert_eq!(request.index, Some(1));
    assert_eq!(request.url, Some(url()));
    let segment = &mpd.representation(VIDEO)?.cache.segments()[1];
    assert_eq!(request.range, segment.range);
    assert!(resolver.resolve_next(&mut mpd, VIDEO)?.is_complete());

    Ok(())
}

#[tokio::test]
async fn test_range_escalation() -> anyhow::Result<()> {
    init_test_tracing();
    let padding = make_box(b"free", &[0; 1992]);
    let index = sidx(1000, 0, &[(false, 1000, 2000), (false, 1000, 2000)]);
    let resource = concat(&[&padding, &index, &[0; 2000], &[0; 1000]]);
    assert!(resource.len() > 3000);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video.mp4"))
        .and(header("Range", "bytes=0-1499"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(resource[..1500].to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/video.mp4"))
        .and(header("Range", "bytes=0-2999"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(resource[..3000].to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/video.mp4", server.uri()))?;
    let loader = IndexLoader::new(HttpTransport::default(), &ResolverConfig::default());
    let references = loader.load_segment_index(&url, None).await?;

    assert_eq!(references.len(), 2);
    let anchor = (padding.len() + index.len()) as u64;
    assert_eq!(references[0].offset, anchor);
    assert_eq!(references[1].last_byte(), Some(anchor + 1999));

    Ok(())
}

#[tokio::test]
async fn test_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.mp4"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/missing.mp4", server.uri())).unwrap();
    let loader = IndexLoader::new(HttpTransport::default(), &ResolverConfig::default());
    let result = loader.load_segment_index(&url, None).await;
    assert!(matches!(result, Err(DashError::HttpError(status)) if status.as_u16() == 404));
}

#[tokio::test]
async fn test_index_not_found() {
    let transport = MemoryTransport::new(make_box(b"free", &[0; 100]));
    let loader = IndexLoader::new(transport, &ResolverConfig::default());
    let result = loader.load_segment_index(&url(), None).await;
    assert!(matches!(result, Err(DashError::IndexLoad(_))));
}

#[tokio::test]
async fn test_aborted() {
    let (data, _) = nested_resource();
    let cancel = CancellationToken::new();
    let loader = IndexLoader::new(MemoryTransport::new(data), &ResolverConfig::default())
        .with_cancellation(cancel.clone());

    cancel.cancel();
    let result = loader.load_segment_index(&url(), None).await;
    assert!(matches!(result, Err(DashError::Aborted)));

    let (data, _) = nested_resource();
    let loader = IndexLoader::new(MemoryTransport::new(data), &ResolverConfig::default());
    loader.abort();
    let init = loader.load_init(&url(), None, TrackKind::Video).await;
    assert!(matches!(init, Err(DashError::Aborted)));
}

#[tokio::test]
async fn test_load_init() -> anyhow::Result<()> {
    let init = init_segment(90000);
    let mut resource = init.clone();
    resource.extend_from_slice(&[0; 4000]);

    let config = ResolverConfig {
        initial_index_request_size: 16,
        ..Default::default()
    };
    let transport = MemoryTransport::new(resource);
    let loader = IndexLoader::new(transport, &config);
    let segment = loader.load_init(&url(), None, TrackKind::Video).await?;

    assert_eq!(segment.data.len(), init.len());
    assert_eq!(segment.range, ByteRange::new(0, Some(init.len() as u64)));
    assert_eq!(segment.params.timescale, Some(90000));
    assert_eq!(segment.params.default_sample_duration, Some(1000));

    Ok(())
}

#[tokio::test]
async fn test_load_representation_init() -> anyhow::Result<()> {
    let init = init_segment(48000);
    let transport = MemoryTransport::new(init.clone());

    let mut representation = Representation::new(SegmentInfo::Base { index_range: None });
    representation.base_urls = base_url("https://cdn.example.com/vod/audio.mp4");
    representation.initialization = Some(iori_dash::model::Initialization {
        source_url: None,
        range: Some(ByteRange::inclusive(0, init.len() as u64 - 1)),
    });
    let mpd = single_representation_mpd(MediaType::Audio, Period::default(), representation);

    let loader = IndexLoader::new(transport, &ResolverConfig::default());
    let segment = loader
        .load_representation_init(&mpd, VIDEO)
        .await?
        .expect("initialization declared");
    assert_eq!(segment.params.timescale, Some(48000));
    // audio samples are all sync samples
    assert_eq!(segment.params.default_sample_flags, Some(0x0200_0000));

    Ok(())
}
