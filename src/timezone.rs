use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, error};
use serde::Deserialize;
use time::OffsetDateTime;
use time_tz::{timezones, Tz};

/// How long to wait for the lookup service before giving up on a file.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

const TIMEZONE_API_URL: &str = "https://maps.googleapis.com/maps/api/timezone/json";

/// The seam between the file processor and the time-zone lookup. `None` means
/// "time zone undeterminable"; the failure itself has already been logged, so
/// the caller only has to skip the file.
pub trait ResolveTimeZone {
    fn resolve(&self, latitude: &str, longitude: &str, at: OffsetDateTime) -> Option<&'static Tz>;
}

/// Resolves time zones via the Google Maps Time Zone API. Exactly one
/// outbound request per call; no retries and no caching.
///
/// API documentation: https://developers.google.com/maps/documentation/timezone
pub struct GoogleTimeZoneApi {
    agent: ureq::Agent,
    api_key: String,
}

impl GoogleTimeZoneApi {
    pub fn new(api_key: String) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(LOOKUP_TIMEOUT).build();
        Self { agent, api_key }
    }

    fn lookup(&self, latitude: &str, longitude: &str, at: OffsetDateTime) -> Result<&'static Tz> {
        debug!("Time zone API request for {{{latitude}, {longitude}}} at {at}");

        let response = self
            .agent
            .get(TIMEZONE_API_URL)
            .query("key", &self.api_key)
            .query("location", &format!("{latitude},{longitude}"))
            .query("timestamp", &at.unix_timestamp().to_string())
            .call()
            .context("Request to the time zone API failed")?;

        let body: TimeZoneResponse = response
            .into_json()
            .context("Unable to parse JSON response from the time zone API")?;

        zone_from_response(body)
    }
}

impl ResolveTimeZone for GoogleTimeZoneApi {
    fn resolve(&self, latitude: &str, longitude: &str, at: OffsetDateTime) -> Option<&'static Tz> {
        match self.lookup(latitude, longitude, at) {
            Ok(tz) => Some(tz),
            Err(e) => {
                error!("Time zone lookup for {{{latitude}, {longitude}}} at {at} failed: {e:#}");
                None
            }
        }
    }
}

/// The subset of the lookup response we care about; additional fields such as
/// `rawOffset` and `dstOffset` are ignored.
#[derive(Debug, Deserialize)]
struct TimeZoneResponse {
    status: Option<String>,
    #[serde(rename = "timeZoneId")]
    time_zone_id: Option<String>,
}

fn zone_from_response(response: TimeZoneResponse) -> Result<&'static Tz> {
    let status = response
        .status
        .context("Response did not include a 'status' field")?;

    if !status.eq_ignore_ascii_case("OK") {
        bail!("Time zone API returned status {:?}", status);
    }

    let id = response
        .time_zone_id
        .context("Response did not include a 'timeZoneId' field")?;

    timezones::get_by_name(&id).with_context(|| format!("Unable to interpret time zone id {:?}", id))
}
