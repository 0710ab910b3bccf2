//! Segment index (`sidx`) and initialization segment loading for
//! `SegmentBase` addressed representations.

use std::future::Future;

use bytes::Bytes;
use futures::{future::BoxFuture, FutureExt};
use iori_fmp4::{
    locate_moov, moov_params, parse_sidx, InitOptions, MoovLocation, MoovParams, ReferenceType,
    SegmentIndex, SidxReference, TrackKind,
};
use reqwest::header::RANGE;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    availability::segment_wall_times,
    config::ResolverConfig,
    model::{Mpd, Period, Representation, RepresentationRef, SegmentInfo},
    range::ByteRange,
    request::RequestBuilder,
    segment::{AvailabilityRange, Segment},
    DashError, DashResult,
};

/// Ranged byte fetching.
pub trait Transport: Send + Sync {
    fn fetch_range(
        &self,
        url: &Url,
        range: Option<ByteRange>,
    ) -> impl Future<Output = DashResult<Bytes>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn fetch_range(
        &self,
        url: &Url,
        range: Option<ByteRange>,
    ) -> impl Future<Output = DashResult<Bytes>> + Send {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range.to_http_range());
        }
        async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                if let Ok(body) = response.text().await {
                    tracing::warn!("Error body: {body}");
                }
                return Err(DashError::HttpError(status));
            }
            Ok(response.bytes().await?)
        }
    }
}

/// A parsed initialization segment.
#[derive(Debug, Clone)]
pub struct InitSegment {
    /// Bytes `0..=moov end` of the resource.
    pub range: ByteRange,
    pub data: Bytes,
    pub params: MoovParams,
}

pub struct IndexLoader<T> {
    transport: T,
    initial_request_size: u64,
    max_request_size: u64,
    min_segment_duration: Option<f64>,
    init_options: InitOptions,
    cancel: CancellationToken,
}

impl<T> IndexLoader<T>
where
    T: Transport,
{
    pub fn new(transport: T, config: &ResolverConfig) -> Self {
        Self {
            transport,
            initial_request_size: config.initial_index_request_size.max(1),
            max_request_size: config
                .max_index_request_size
                .max(config.initial_index_request_size),
            min_segment_duration: config.min_segment_duration,
            init_options: InitOptions {
                neutralize_edit_lists: config.neutralize_edit_lists,
            },
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Aborts every pending and future load of this loader.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    async fn fetch(&self, url: &Url, range: ByteRange) -> DashResult<Bytes> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DashError::Aborted),
            data = self.transport.fetch_range(url, Some(range)) => data,
        }
    }

    /// Fetches the `sidx` starting at `range`, doubling the request until the
    /// box is complete or the size cap is hit.
    async fn fetch_sidx(&self, url: &Url, range: Option<ByteRange>) -> DashResult<SegmentIndex> {
        let offset = range.map_or(0, |r| r.offset);
        let mut length = range
            .and_then(|r| r.length)
            .unwrap_or(self.initial_request_size);

        loop {
            if self.cancel.is_cancelled() {
                return Err(DashError::Aborted);
            }

            let request = ByteRange::new(offset, Some(length));
            tracing::debug!(%url, range = %request, "Requesting segment index");
            let data = self.fetch(url, request).await?;

            match parse_sidx(&data, offset) {
                Ok(Some(index)) => return Ok(index),
                Ok(None) | Err(iori_fmp4::Error::TruncatedSidx { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            if (data.len() as u64) < length {
                return Err(DashError::IndexLoad(format!(
                    "resource ended after {} bytes without a complete sidx",
                    data.len()
                )));
            }
            if length >= self.max_request_size {
                return Err(DashError::IndexLoad(format!(
                    "no complete sidx within {} bytes",
                    self.max_request_size
                )));
            }
            length = (length * 2).min(self.max_request_size);
        }
    }

    /// Loads the media references of the index at `range`, following nested
    /// indexes. One failing branch fails the whole load.
    fn load_references<'a>(
        &'a self,
        url: &'a Url,
        range: Option<ByteRange>,
    ) -> BoxFuture<'a, DashResult<Vec<SidxReference>>> {
        async move {
            let index = self.fetch_sidx(url, range).await?;
            let nested = futures::future::join_all(
                index
                    .references
                    .iter()
                    .filter(|r| r.reference_type == ReferenceType::Index)
                    .map(|r| match r.last_byte() {
                        Some(last) => {
                            self.load_references(url, Some(ByteRange::inclusive(r.offset, last)))
                        }
                        None => futures::future::ready(Ok(Vec::new())).boxed(),
                    }),
            )
            .await;

            let mut nested = nested.into_iter();
            let mut references = Vec::new();
            for reference in index.references {
                match reference.reference_type {
                    ReferenceType::Media if reference.size == 0 => {
                        tracing::debug!(offset = reference.offset, "Skipping empty sidx reference");
                    }
                    ReferenceType::Media => references.push(reference),
                    ReferenceType::Index => {
                        if let Some(result) = nested.next() {
                            references.extend(result?);
                        }
                    }
                }
            }
            Ok(references)
        }
        .boxed()
    }

    /// Every media reference of the index of `url`, in presentation order.
    pub async fn load_segment_index(
        &self,
        url: &Url,
        index_range: Option<ByteRange>,
    ) -> DashResult<Vec<SidxReference>> {
        self.load_references(url, index_range).await
    }

    /// Loads the segment index of a `SegmentBase` representation and installs
    /// the resulting segments into its cache.
    pub async fn load(&self, mpd: &mut Mpd, r: RepresentationRef) -> DashResult<()> {
        let (url, index_range) = {
            let representation = mpd.representation(r)?;
            let period = &mpd.periods[r.period];
            let SegmentInfo::Base { index_range } = &representation.segment_info else {
                return Err(DashError::IndexLoad(
                    "representation is not addressed by SegmentBase".to_string(),
                ));
            };
            (
                representation.base_url(period.base_url_index)?.clone(),
                *index_range,
            )
        };

        let references = self.load_segment_index(&url, index_range).await?;
        tracing::info!(%url, references = references.len(), "Segment index loaded");

        let segments = {
            let representation = mpd.representation(r)?;
            build_segments(
                mpd,
                &mpd.periods[r.period],
                representation,
                &references,
                self.min_segment_duration,
            )
        };
        let availability_range = segments
            .first()
            .zip(segments.last())
            .map(|(first, last)| AvailabilityRange {
                start: first.presentation_start_time,
                end: last.presentation_end_time(),
            });

        let cache = &mut mpd.representation_mut(r)?.cache;
        cache.available_segments_number = segments.len();
        cache.availability_range = availability_range;
        cache.install(segments);
        Ok(())
    }

    /// Fetches an initialization segment up to the end of its `moov` box.
    ///
    /// With an explicit `range` exactly that range is fetched. Otherwise the
    /// request starts small and grows until `moov` is fully buffered.
    pub async fn load_init(
        &self,
        url: &Url,
        range: Option<ByteRange>,
        kind: TrackKind,
    ) -> DashResult<InitSegment> {
        if let Some(range) = range {
            let data = self.fetch(url, range).await?;
            let mut data = data.to_vec();
            let params = moov_params(&mut data, kind, self.init_options)?;
            return Ok(InitSegment {
                range,
                data: Bytes::from(data),
                params,
            });
        }

        let mut length = self.initial_request_size;
        loop {
            if self.cancel.is_cancelled() {
                return Err(DashError::Aborted);
            }

            let data = self.fetch(url, ByteRange::new(0, Some(length))).await?;
            match locate_moov(&data)? {
                MoovLocation::Found { end, .. } if end <= data.len() => {
                    tracing::debug!(%url, end, "Found moov");
                    let mut data = data[..end].to_vec();
                    let params = moov_params(&mut data, kind, self.init_options)?;
                    return Ok(InitSegment {
                        range: ByteRange::new(0, Some(end as u64)),
                        data: Bytes::from(data),
                        params,
                    });
                }
                MoovLocation::Found { end, .. } => {
                    if (data.len() as u64) < length || end as u64 > self.max_request_size {
                        return Err(DashError::IndexLoad(format!(
                            "moov ends at {end}, only {} bytes available",
                            data.len()
                        )));
                    }
                    length = end as u64;
                }
                MoovLocation::NeedMoreBytes { requested } => {
                    if (data.len() as u64) < length || length >= self.max_request_size {
                        return Err(DashError::IndexLoad("moov not found".to_string()));
                    }
                    length = (requested as u64).min(self.max_request_size);
                }
            }
        }
    }

    /// Loads the initialization segment a representation declares.
    pub async fn load_representation_init(
        &self,
        mpd: &Mpd,
        r: RepresentationRef,
    ) -> DashResult<Option<InitSegment>> {
        let media_type = mpd.media_type(r)?;
        let Some(request) = RequestBuilder::new().initialization_request(
            media_type,
            &mpd.periods[r.period],
            mpd.representation(r)?,
        )?
        else {
            return Ok(None);
        };
        let Some(url) = request.url else {
            return Ok(None);
        };
        self.load_init(&url, request.range, media_type.into())
            .await
            .map(Some)
    }
}

fn rescale(value: u64, from: u32, to: u32) -> u64 {
    if from == to || from == 0 {
        return value;
    }
    (value as u128 * to as u128 / from as u128) as u64
}

/// Turns index references into segments, merging consecutive references
/// until each segment lasts at least `min_segment_duration`.
fn build_segments(
    mpd: &Mpd,
    period: &Period,
    representation: &Representation,
    references: &[SidxReference],
    min_segment_duration: Option<f64>,
) -> Vec<Segment> {
    let mut groups: Vec<&[SidxReference]> = Vec::new();
    match min_segment_duration.filter(|d| *d > 0.0) {
        Some(min) => {
            let mut start = 0;
            let mut accumulated = 0.0;
            for (i, reference) in references.iter().enumerate() {
                accumulated += reference.duration_seconds();
                if accumulated >= min {
                    groups.push(&references[start..=i]);
                    start = i + 1;
                    accumulated = 0.0;
                }
            }
            if start < references.len() {
                groups.push(&references[start..]);
            }
        }
        None => groups.extend(references.chunks(1)),
    }

    let timescale = representation.timescale.max(1);
    let pto = representation.presentation_time_offset_seconds();
    groups
        .into_iter()
        .enumerate()
        .filter_map(|(i, group)| {
            let (first, last) = (group.first()?, group.last()?);
            let duration = group.iter().map(SidxReference::duration_seconds).sum();
            let presentation_start_time = period.start + first.start_seconds() - pto;
            let wall = segment_wall_times(
                mpd,
                representation.availability_time_offset,
                presentation_start_time,
                duration,
            );
            let media_time = rescale(first.time, first.timescale, timescale);
            Some(Segment {
                availability_idx: i as u64,
                number: representation.start_number + i as u64,
                media_time,
                media_start_time: first.start_seconds(),
                presentation_start_time,
                duration,
                availability_start_time: wall.availability_start,
                availability_end_time: wall.availability_end,
                wall_start_time: wall.wall_start,
                media: None,
                range: last
                    .last_byte()
                    .map(|last_byte| ByteRange::inclusive(first.offset, last_byte)),
            })
        })
        .collect()
}
