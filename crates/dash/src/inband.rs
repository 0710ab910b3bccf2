//! Inspection of downloaded media: fragment timing, in-band events and
//! trick-play sync sample patching.

use std::{borrow::Cow, collections::HashMap};

use iori_fmp4::{
    extract_fragment_timing, moov_params, patch_sync_samples, EventMessage, EventStore,
    FragmentTimingReport, InitOptions, TrackContext, VideoCodec,
};

use crate::{
    events::{DashEvent, EventBus, EventOrigin},
    index::InitSegment,
    DashError, DashResult, MediaType,
};

#[derive(Debug, Default)]
pub struct FragmentInspector {
    tracks: HashMap<MediaType, TrackContext>,
    store: EventStore,
    bus: EventBus,
    init_options: InitOptions,
}

impl FragmentInspector {
    pub fn new(bus: EventBus, init_options: InitOptions) -> Self {
        Self {
            tracks: HashMap::new(),
            store: EventStore::new(),
            bus,
            init_options,
        }
    }

    pub fn track(&self, media_type: MediaType) -> Option<&TrackContext> {
        self.tracks.get(&media_type)
    }

    pub fn register_track(&mut self, media_type: MediaType, track: TrackContext) {
        tracing::debug!(?media_type, timescale = track.timescale, "Track registered");
        self.tracks.insert(media_type, track);
    }

    /// Reads the track parameters of a complete initialization segment.
    ///
    /// The buffer is patched in place like [`iori_fmp4::moov_params`] does.
    pub fn register_init(
        &mut self,
        media_type: MediaType,
        init: &mut [u8],
    ) -> DashResult<TrackContext> {
        let params = moov_params(init, media_type.into(), self.init_options)?;
        let track = params.track_context(media_type.into());
        self.register_track(media_type, track);
        Ok(track)
    }

    pub fn register_init_segment(
        &mut self,
        media_type: MediaType,
        init: &InitSegment,
    ) -> TrackContext {
        let track = init.params.track_context(media_type.into());
        self.register_track(media_type, track);
        track
    }

    fn publish(&mut self, origin: EventOrigin, event: EventMessage) {
        let scheme_id_uri = event.scheme_id_uri.clone();
        let Some(index) = self.store.insert(event.clone()) else {
            return;
        };
        self.bus.publish(DashEvent::EventReceived {
            origin,
            event,
            event_list: self.store.snapshot(&scheme_id_uri),
            index,
        });
    }

    /// Extracts the timing of a media buffer and publishes its new in-band
    /// events. Events already seen for their scheme are dropped.
    pub fn inspect(
        &mut self,
        media_type: MediaType,
        data: &mut [u8],
        time_offset: f64,
    ) -> DashResult<FragmentTimingReport> {
        let track = *self
            .tracks
            .get(&media_type)
            .ok_or(DashError::TrackNotInitialized(media_type))?;
        let report = extract_fragment_timing(data, &track, time_offset)?;

        for event in report.events.iter().cloned() {
            self.publish(EventOrigin::Inband, event);
        }
        Ok(report)
    }

    /// Publishes events declared outside the media, e.g. by an MPD
    /// `EventStream`.
    pub fn handle_outband(&mut self, events: impl IntoIterator<Item = EventMessage>) {
        for event in events {
            self.publish(EventOrigin::Outband, event);
        }
    }

    pub fn events(&self, scheme_id_uri: &str) -> &[EventMessage] {
        self.store.events(scheme_id_uri)
    }

    /// Forgets events that ended before `time` (seconds), typically the
    /// start of the buffered range. Returns how many were dropped.
    pub fn prune_events(&mut self, time: f64) -> usize {
        let pruned = self.store.prune_before(time);
        if pruned > 0 {
            tracing::debug!(pruned, time, "Pruned stored events");
        }
        pruned
    }

    /// Forgets stored events, e.g. when switching presentations.
    pub fn clear_events(&mut self) {
        self.store.clear();
    }

    /// Marks the random access samples of a video fragment as the only sync
    /// samples. Buffers of other codecs, or with fewer than two random access
    /// samples, come back unchanged.
    pub fn trick_play<'a>(&self, data: &'a [u8], codecs: &str) -> DashResult<Cow<'a, [u8]>> {
        let Some(codec) = VideoCodec::from_codecs(codecs) else {
            return Ok(Cow::Borrowed(data));
        };
        let patch = patch_sync_samples(data, codec)?;
        if patch.is_patched() {
            tracing::debug!(sync_samples = patch.sync_samples, "Patched trick-play fragment");
        }
        Ok(patch.data)
    }
}
