use serde::Deserialize;

use crate::{DashResult, MediaType};

/// Per media type epsilon (seconds) for the first pass of the time search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchTolerance {
    pub video: f64,
    pub audio: f64,
    pub text: f64,
}

impl SearchTolerance {
    pub fn for_media(&self, media_type: MediaType) -> f64 {
        match media_type {
            MediaType::Video => self.video,
            MediaType::Audio => self.audio,
            MediaType::Text => self.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub search_tolerance: SearchTolerance,
    /// Epsilon of the second search pass.
    pub wide_search_tolerance: f64,
    /// Group SIDX references until they reach this duration (seconds).
    pub min_segment_duration: Option<f64>,
    /// Segments materialised on each side of the cursor for static timelines.
    pub timeline_window: Option<usize>,
    /// Seconds subtracted from both ends of a dynamic availability window.
    pub live_offset_correction: f64,
    pub neutralize_edit_lists: bool,
    /// First byte-range size when probing for `sidx` or `moov`.
    pub initial_index_request_size: u64,
    pub max_index_request_size: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            search_tolerance: SearchTolerance::default(),
            wide_search_tolerance: 0.2,
            min_segment_duration: None,
            timeline_window: None,
            live_offset_correction: 0.0,
            neutralize_edit_lists: false,
            initial_index_request_size: 1500,
            max_index_request_size: 4 * 1024 * 1024,
        }
    }
}

impl ResolverConfig {
    pub fn from_json(json: &str) -> DashResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
