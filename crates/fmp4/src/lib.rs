//! Byte level inspection of fragmented MP4 (ISOBMFF) resources as served by
//! MPEG-DASH packagers.
//!
//! Everything here works on already downloaded buffers and never performs
//! I/O. Parsers that need more bytes say so ([`parse_sidx`] returning
//! `Ok(None)`, [`locate_moov`] returning [`MoovLocation::NeedMoreBytes`]) and
//! leave fetching to the caller.
//!
//! Some operations rewrite the buffer they are given: parsed `emsg` boxes
//! and neutralized `edts` boxes are renamed to `free` ([`mark_consumed`]),
//! and audio sample flags are forced to sync samples.

mod emsg;
mod error;
mod fourcc;
mod fragment;
mod init;
mod patcher;
mod reader;
mod scanner;
mod sidx;
mod traf;

pub use emsg::{parse_emsg, EventMessage, EventStore};
pub use error::*;
pub use fourcc::FourCC;
pub use fragment::{extract_fragment_timing, FragmentTiming, FragmentTimingReport};
pub use init::{
    locate_moov, moov_params, InitOptions, MoovLocation, MoovParams, TrackContext, TrackKind,
};
pub use patcher::{patch_sync_samples, TrickPlayPatch, VideoCodec};
pub use scanner::{mark_consumed, BoxHeader, BoxScanner, BOX_HEADER_SIZE};
pub use sidx::{parse_sidx, ReferenceType, SegmentIndex, SidxReference};
pub use traf::independent_sample_flags;
