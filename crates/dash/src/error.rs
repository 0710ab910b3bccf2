use thiserror::Error;

use crate::MediaType;

#[derive(Error, Debug)]
pub enum DashError {
    #[error("fmp4 error: {0}")]
    Fmp4Error(#[from] iori_fmp4::Error),

    #[error("No prior position for {0:?}, resolve a time first")]
    NoPriorPosition(MediaType),

    #[error("Representation not found in manifest")]
    NoRepresentation,

    #[error("Segment {index} is not available")]
    SegmentNotAvailable { index: u64 },

    #[error("Segment index has not been loaded for this representation")]
    IndexNotLoaded,

    #[error("No initialization data registered for {0:?}")]
    TrackNotInitialized(MediaType),

    #[error("No base url available")]
    NoBaseUrl,

    #[error("Invalid MPD: {0}")]
    MpdParsing(String),

    #[error("Invalid media range: {0}")]
    InvalidMediaRange(String),

    #[error("Invalid timing schema: {0:?}")]
    InvalidTimingSchema(String),

    #[error("Failed to parse date time: {0}")]
    DateTimeParsing(String),

    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Operation aborted")]
    Aborted,

    #[error("Failed to load segment index: {0}")]
    IndexLoad(String),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    ChronoParseError(#[from] chrono::ParseError),

    #[error(transparent)]
    OutOfRange(#[from] chrono::OutOfRangeError),

    #[error(transparent)]
    MpdParseError(#[from] dash_mpd::DashMpdError),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

pub type DashResult<T> = Result<T, DashError>;
