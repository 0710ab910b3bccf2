use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;

use crate::{model::UtcTiming, DashError, DashResult};

const SCHEME_HTTP_XSDATE: &str = "urn:mpeg:dash:utc:http-xsdate:2014";
const SCHEME_HTTP_ISO: &str = "urn:mpeg:dash:utc:http-iso:2014";
const SCHEME_HTTP_HEAD: &str = "urn:mpeg:dash:utc:http-head:2014";
const SCHEME_DIRECT: &str = "urn:mpeg:dash:utc:direct:2014";

/// Wall clock corrected by the client/server time shift.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    /// How much time the local clock is behind the remote clock
    offset: TimeDelta,
    synced: bool,
    pinned: Option<DateTime<Utc>>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A synced clock frozen at `now`.
    pub fn pinned(now: DateTime<Utc>) -> Self {
        Self {
            offset: TimeDelta::zero(),
            synced: true,
            pinned: Some(now),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.pinned.unwrap_or_else(Utc::now) + self.offset
    }

    pub fn offset(&self) -> TimeDelta {
        self.offset
    }

    /// Whether a time sync completed. Dynamic availability windows are only
    /// recomputed on a synced clock.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn pin(&mut self, now: DateTime<Utc>) {
        self.pinned = Some(now);
    }

    pub fn set_offset(&mut self, offset: TimeDelta) {
        self.offset = offset;
        self.synced = true;
    }

    fn set_time(
        &mut self,
        remote_now: DateTime<Utc>,
        before_request: DateTime<Utc>,
        after_request: DateTime<Utc>,
    ) {
        // The remote clock was read half a round trip before the response arrived.
        let server_now = remote_now + (after_request - before_request) / 2;
        self.set_offset(server_now - after_request);
        tracing::info!(
            offset_milliseconds = %self.offset.num_milliseconds(),
            "Clock time set to {}, offset calculated",
            remote_now
        );
    }

    /// Tries every `UTCTiming` element in order until one succeeds.
    ///
    /// Without any element the local clock is trusted.
    pub async fn sync(&mut self, timings: &[UtcTiming], client: &Client) -> DashResult<()> {
        if timings.is_empty() {
            tracing::warn!("No UTCTiming elements found in MPD, using local time.");
            self.set_offset(TimeDelta::zero());
            return Ok(());
        }

        let mut last_error = None;
        for timing in timings {
            tracing::debug!(
                scheme = %timing.scheme_id_uri,
                value = %timing.value.as_deref().unwrap_or(""),
                "Attempting to sync time with scheme"
            );
            let before_request = Utc::now();
            match remote_time(timing, client).await {
                Ok(remote_now) => {
                    let after_request = if timing.scheme_id_uri == SCHEME_DIRECT {
                        before_request
                    } else {
                        Utc::now()
                    };
                    self.set_time(remote_now, before_request, after_request);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(scheme = %timing.scheme_id_uri, error = %e, "Time sync failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DashError::InvalidTimingSchema("All supported time sync methods failed".to_string())
        }))
    }
}

fn parse_iso8601_response(response_text: &str) -> DashResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(response_text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // xs:dateTime without a time zone is taken as UTC
            chrono::NaiveDateTime::parse_from_str(response_text, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|dt| dt.and_utc())
        })?)
}

async fn remote_time(timing: &UtcTiming, client: &Client) -> DashResult<DateTime<Utc>> {
    let value = timing.value.as_deref().ok_or_else(|| {
        DashError::InvalidTimingSchema(format!("Missing value for {}", timing.scheme_id_uri))
    })?;

    match timing.scheme_id_uri.as_str() {
        SCHEME_HTTP_XSDATE | SCHEME_HTTP_ISO => {
            let response = client.get(value).send().await?;
            if !response.status().is_success() {
                return Err(DashError::HttpError(response.status()));
            }
            let text = response.text().await?;
            parse_iso8601_response(text.trim())
        }
        SCHEME_HTTP_HEAD => {
            let response = client.head(value).send().await?;
            if !response.status().is_success() {
                return Err(DashError::HttpError(response.status()));
            }
            let date = response
                .headers()
                .get(reqwest::header::DATE)
                .ok_or_else(|| DashError::DateTimeParsing("Missing Date header".to_string()))?
                .to_str()
                .map_err(|_| DashError::DateTimeParsing("Invalid Date header string".to_string()))?;
            Ok(DateTime::parse_from_rfc2822(date)?.with_timezone(&Utc))
        }
        SCHEME_DIRECT => parse_iso8601_response(value.trim()),
        others => Err(DashError::InvalidTimingSchema(format!(
            "Unsupported scheme: {others}"
        ))),
    }
}
