//! Event Message (`emsg`) decoding and per-scheme dedupe.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;

use crate::{reader::ByteReader, scanner::BoxHeader, Error, FourCC, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub version: u8,
    pub scheme_id_uri: String,
    pub value: String,
    pub timescale: u32,
    /// Presentation time in seconds.
    pub presentation_time: f64,
    /// Duration in `timescale` units.
    pub duration: u32,
    pub id: u32,
    pub message_data: Bytes,
}

impl EventMessage {
    /// Duration value signalling an event of unknown duration.
    pub const UNKNOWN_DURATION: u32 = u32::MAX;

    pub fn duration_seconds(&self) -> f64 {
        self.duration as f64 / self.timescale.max(1) as f64
    }

    fn ends_before(&self, time: f64) -> bool {
        self.duration != Self::UNKNOWN_DURATION
            && self.presentation_time + self.duration_seconds() < time
    }
}

/// Decodes one `emsg` box.
///
/// Version 0 carries a delta against the start of the segment it lives in,
/// which must be supplied as `segment_start_time` (seconds). Version 1 carries
/// an absolute presentation time and ignores it.
///
/// The buffer is not modified; see [`crate::mark_consumed`].
pub fn parse_emsg(data: &[u8], header: &BoxHeader, segment_start_time: f64) -> Result<EventMessage> {
    let truncated = Error::TruncatedFragment {
        fourcc: FourCC::EMSG,
        offset: header.offset,
    };
    if header.end() > data.len() {
        return Err(truncated);
    }
    let mut reader = ByteReader::new(&data[..header.end()], header.payload_start(), truncated);

    let (version, _flags) = reader.read_version_and_flags()?;
    let message = if version == 0 {
        let scheme_id_uri = reader.read_cstring()?;
        let value = reader.read_cstring()?;
        let timescale = reader.read_u32()?;
        let presentation_time_delta = reader.read_u32()?;
        let duration = reader.read_u32()?;
        let id = reader.read_u32()?;
        let scale = timescale.max(1) as f64;
        EventMessage {
            version,
            scheme_id_uri,
            value,
            timescale,
            presentation_time: (segment_start_time * scale + presentation_time_delta as f64)
                / scale,
            duration,
            id,
            message_data: Bytes::new(),
        }
    } else {
        let timescale = reader.read_u32()?;
        let presentation_time = reader.read_u64()?;
        let duration = reader.read_u32()?;
        let id = reader.read_u32()?;
        let scheme_id_uri = reader.read_cstring()?;
        let value = reader.read_cstring()?;
        EventMessage {
            version,
            scheme_id_uri,
            value,
            timescale,
            presentation_time: presentation_time as f64 / timescale.max(1) as f64,
            duration,
            id,
            message_data: Bytes::new(),
        }
    };

    let rest = header.end() - reader.position();
    let message_data = Bytes::copy_from_slice(reader.take(rest)?);
    Ok(EventMessage {
        message_data,
        ..message
    })
}

/// Events grouped by `scheme_id_uri`, deduplicated by `id` within a group.
///
/// Groups are shared snapshots: a reader holding the result of
/// [`EventStore::snapshot`] keeps its copy while the store moves on.
#[derive(Debug, Default)]
pub struct EventStore {
    streams: HashMap<String, Arc<Vec<EventMessage>>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `event` to its scheme group.
    ///
    /// Returns the position of the event inside the group, or `None` when an
    /// event with the same id was already stored for that scheme.
    pub fn insert(&mut self, event: EventMessage) -> Option<usize> {
        let stream = self.streams.entry(event.scheme_id_uri.clone()).or_default();
        if stream.iter().any(|e| e.id == event.id) {
            log::debug!(
                "Dropping duplicated event {} for scheme {}",
                event.id,
                event.scheme_id_uri
            );
            return None;
        }
        let stream = Arc::make_mut(stream);
        stream.push(event);
        Some(stream.len() - 1)
    }

    pub fn events(&self, scheme_id_uri: &str) -> &[EventMessage] {
        self.streams
            .get(scheme_id_uri)
            .map(|stream| stream.as_slice())
            .unwrap_or_default()
    }

    /// Shared view of a scheme group, cloned only when the store is modified
    /// while the snapshot is alive.
    pub fn snapshot(&self, scheme_id_uri: &str) -> Arc<Vec<EventMessage>> {
        self.streams
            .get(scheme_id_uri)
            .cloned()
            .unwrap_or_default()
    }

    /// Forgets events that ended before `time` (seconds). Events of unknown
    /// duration are kept. Returns how many were dropped.
    ///
    /// A forgotten event is published again if it shows up once more.
    pub fn prune_before(&mut self, time: f64) -> usize {
        let mut pruned = 0;
        self.streams.retain(|_, stream| {
            let expired = stream.iter().filter(|e| e.ends_before(time)).count();
            if expired > 0 {
                Arc::make_mut(stream).retain(|e| !e.ends_before(time));
                pruned += expired;
            }
            !stream.is_empty()
        });
        if pruned > 0 {
            log::debug!("Pruned {pruned} events ending before {time}");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.streams.values().map(|stream| stream.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }
}
