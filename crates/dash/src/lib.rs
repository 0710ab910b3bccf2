//! # MPEG-DASH Segment Addressing
//!
//! Maps a position on the presentation timeline to the media segment that has
//! to be fetched, for static (VoD) and dynamic (live) manifests.
//!
//! ## Addressing modes
//!
//! *   `SegmentTemplate` with `@duration`: numbered segments, computed from the
//!     availability window.
//! *   `SegmentTemplate` with `SegmentTimeline`: explicitly timed segments with
//!     repeats.
//! *   `SegmentList`: explicitly listed segment urls, optionally with `@mediaRange`.
//! *   `SegmentBase`: byte ranges described by a `sidx` box, loaded with
//!     [`IndexLoader`].
//! *   A bare `BaseURL`: the whole representation is one segment.
//!
//! ## Live presentations
//!
//! [`Clock`] is synchronized against the manifest `UTCTiming` elements. The
//! [`AvailabilityWindowTracker`] derives the window of requestable segments
//! from the synced clock and raises the live edge, announcing every change as a
//! [`DashEvent::LiveEdgeUpdated`] on the [`EventBus`].
//!
//! ## Inspecting media
//!
//! [`FragmentInspector`] extracts exact fragment timing from downloaded media,
//! publishes in-band `emsg` events once per id and rewrites fragments for
//! trick-play.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use iori_dash::{Clock, EventBus, Mpd, RepresentationRef, ResolverConfig, SegmentResolver};
//! use url::Url;
//!
//! let mpd_url = Url::parse("https://example.com/live/manifest.mpd")?;
//! let xml = reqwest::get(mpd_url.clone()).await?.text().await?;
//! let mut mpd = Mpd::parse(&xml, Some(&mpd_url))?;
//!
//! let (bus, _events) = EventBus::channel();
//! let mut resolver = SegmentResolver::new(ResolverConfig::default(), Clock::new(), bus);
//! resolver
//!     .clock_mut()
//!     .sync(&mpd.utc_timings, &reqwest::Client::new())
//!     .await?;
//!
//! let video = RepresentationRef::new(0, 0, 0);
//! let live_edge = mpd.live_edge.live_edge_e;
//! let first = resolver.resolve_for_time(&mut mpd, video, live_edge)?;
//! let next = resolver.resolve_next(&mut mpd, video)?;
//! println!("{:?} {:?}", first.url, next.url);
//! # Ok(())
//! # }
//! ```

pub mod availability;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod inband;
pub mod index;
pub mod model;
mod mpd;
pub mod range;
pub mod request;
pub mod resolver;
pub mod segment;
pub mod template;
mod timeline;
mod url;

pub use availability::AvailabilityWindowTracker;
pub use clock::Clock;
pub use config::{ResolverConfig, SearchTolerance};
pub use error::{DashError, DashResult};
pub use events::{DashEvent, EventBus, EventOrigin, LiveEdgeFlags};
pub use inband::FragmentInspector;
pub use index::{HttpTransport, IndexLoader, InitSegment, Transport};
pub use model::{
    AdaptationSet, MediaType, Mpd, Period, PresentationType, Representation, RepresentationRef,
    SegmentInfo,
};
pub use range::ByteRange;
pub use resolver::{CursorState, RequestStatus, SegmentResolver};
pub use segment::{RequestAction, Segment, SegmentRequest};

pub use iori_fmp4 as fmp4;
