/// Business logic services layer
mod orbital;

pub use orbital::{
    estimate_ground_track, future_timestamps, historical_timestamps, OrbitalService,
    MAX_TIMESTAMPS_PER_REQUEST, ORBITAL_PERIOD_MINUTES, SAMPLE_INTERVAL_SECS,
};

use crate::clients::{fetch_json, fetch_with_retry, RetryPolicy, Transport};
use crate::domain::{Coordinates, Country, Provenance, RiseTime, TelemetrySample, Units, Visibility};
use crate::errors::{FetchError, FetchResult};
use crate::geo::sort_capitals;
use crate::utils::{build_passes_url, calc_rise_time, num};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Live telemetry and pass prediction
pub struct IssService<T> {
    transport: T,
    telemetry_url: String,
    passes_url: String,
    units: Units,
    telemetry_policy: RetryPolicy,
    passes_policy: RetryPolicy,
}

impl<T: Transport> IssService<T> {
    pub fn new(
        transport: T,
        telemetry_url: String,
        passes_url: String,
        units: Units,
        telemetry_policy: RetryPolicy,
        passes_policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            telemetry_url,
            passes_url,
            units,
            telemetry_policy,
            passes_policy,
        }
    }

    pub fn units(&self) -> Units {
        self.units
    }

    /// Fetch the current ISS telemetry.
    ///
    /// An unreadable document yields a [`Provenance::Fallback`] sample
    /// instead of an error so downstream always has something to show.
    pub async fn fetch_telemetry(&self, cancel: &CancellationToken) -> FetchResult<TelemetrySample> {
        let value = fetch_with_retry(
            &self.transport,
            &self.telemetry_url,
            cancel,
            &self.telemetry_policy,
        )
        .await?;

        match parse_telemetry(&value, self.units) {
            Some(sample) => Ok(sample),
            None => {
                warn!(url = %self.telemetry_url, "telemetry document malformed, using fallback position");
                Ok(TelemetrySample::fallback(self.units))
            }
        }
    }

    /// Next visible pass over `location`
    pub async fn fetch_rise_time(
        &self,
        location: Coordinates,
        cancel: &CancellationToken,
    ) -> FetchResult<RiseTime> {
        let url = build_passes_url(&self.passes_url, location.latitude, location.longitude);
        fetch_json(
            &self.transport,
            &url,
            cancel,
            &self.passes_policy,
            |body: Value| calc_rise_time(&body, Utc::now()),
        )
        .await?
        .ok_or_else(|| FetchError::Malformed("pass response has no passes array".to_string()))
    }
}

/// Parse a telemetry document, tolerating numbers encoded as strings.
///
/// Latitude, longitude, altitude and velocity are required.
pub fn parse_telemetry(v: &Value, default_units: Units) -> Option<TelemetrySample> {
    let latitude = num(&v["latitude"])?;
    let longitude = num(&v["longitude"])?;
    let altitude = num(&v["altitude"])?;
    let velocity = num(&v["velocity"])?;

    let visibility = match v["visibility"].as_str() {
        Some("eclipsed") => Visibility::Eclipsed,
        _ => Visibility::Daylight,
    };
    let units = v["units"]
        .as_str()
        .and_then(Units::parse)
        .unwrap_or(default_units);
    let timestamp = num(&v["timestamp"])
        .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single())
        .unwrap_or_else(Utc::now);

    Some(TelemetrySample {
        name: v["name"].as_str().unwrap_or("iss").to_string(),
        id: num(&v["id"]).map(|id| id as u32).unwrap_or(25544),
        latitude,
        longitude,
        altitude,
        velocity,
        visibility,
        footprint: num(&v["footprint"]).unwrap_or_default(),
        timestamp,
        daynum: num(&v["daynum"]).unwrap_or_default(),
        solar_lat: num(&v["solar_lat"]).unwrap_or_default(),
        solar_lon: num(&v["solar_lon"]).unwrap_or_default(),
        units,
        provenance: Provenance::Live,
    })
}

/// Reference country list, loaded once at startup
pub struct CountriesService<T> {
    transport: T,
    url: String,
    policy: RetryPolicy,
}

impl<T: Transport> CountriesService<T> {
    pub fn new(transport: T, url: String, policy: RetryPolicy) -> Self {
        Self {
            transport,
            url,
            policy,
        }
    }

    /// Fetch the list sorted by capital name
    pub async fn fetch_countries(&self, cancel: &CancellationToken) -> FetchResult<Vec<Country>> {
        fetch_json(&self.transport, &self.url, cancel, &self.policy, sort_capitals).await
    }
}
