/// Historical and predicted ISS positions, fetched in rate-limited chunks
use crate::clients::{fetch_with_retry, RetryPolicy, Transport};
use crate::domain::{OrbitalPosition, PositionsResponse, RawPosition, Units};
use crate::errors::{FetchError, FetchResult};
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upstream limit on timestamps per positions request
pub const MAX_TIMESTAMPS_PER_REQUEST: usize = 10;
pub const SAMPLE_INTERVAL_SECS: i64 = 300;
/// ISS average orbital period
pub const ORBITAL_PERIOD_MINUTES: f64 = 92.68;

const CHUNK_DELAY: Duration = Duration::from_millis(1100);
const GROUND_TRACK_STEPS: usize = 100;

/// Timestamps (seconds) from `now - hours` up to `now`, every 5 minutes
pub fn historical_timestamps(hours: f64, now: i64) -> Vec<i64> {
    let span = (hours * 3600.0).round() as i64;
    let mut timestamps = Vec::new();
    let mut back = span;
    while back >= 0 {
        timestamps.push(now - back);
        back -= SAMPLE_INTERVAL_SECS;
    }
    timestamps
}

/// Timestamps (seconds) from `now + 5min` up to `now + hours`
pub fn future_timestamps(hours: f64, now: i64) -> Vec<i64> {
    let span = (hours * 3600.0).round() as i64;
    (1..)
        .map(|i| i * SAMPLE_INTERVAL_SECS)
        .take_while(|ahead| *ahead <= span)
        .map(|ahead| now + ahead)
        .collect()
}

pub struct OrbitalService<T> {
    transport: T,
    base_url: String,
    satellite_id: u32,
    policy: RetryPolicy,
}

impl<T: Transport> OrbitalService<T> {
    pub fn new(transport: T, base_url: String, satellite_id: u32, policy: RetryPolicy) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            satellite_id,
            policy,
        }
    }

    /// Positions over the past `hours`, ascending by timestamp
    pub async fn get_historical_positions(
        &self,
        hours: f64,
        units: Units,
        cancel: &CancellationToken,
    ) -> FetchResult<Vec<OrbitalPosition>> {
        let timestamps = historical_timestamps(hours, Utc::now().timestamp());
        self.fetch_window(&timestamps, units, cancel).await
    }

    /// Predicted positions over the next `hours`, ascending by timestamp
    pub async fn get_future_positions(
        &self,
        hours: f64,
        units: Units,
        cancel: &CancellationToken,
    ) -> FetchResult<Vec<OrbitalPosition>> {
        let timestamps = future_timestamps(hours, Utc::now().timestamp());
        self.fetch_window(&timestamps, units, cancel).await
    }

    /// All-or-nothing: any chunk failure discards what was already fetched.
    async fn fetch_window(
        &self,
        timestamps: &[i64],
        units: Units,
        cancel: &CancellationToken,
    ) -> FetchResult<Vec<OrbitalPosition>> {
        let chunks: Vec<&[i64]> = timestamps.chunks(MAX_TIMESTAMPS_PER_REQUEST).collect();
        let mut positions = Vec::with_capacity(timestamps.len());

        for (i, chunk) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let url = self.positions_url(chunk, units);
            let value = fetch_with_retry(&self.transport, &url, cancel, &self.policy).await?;
            positions.extend(parse_positions(value)?);
            debug!(chunk = i + 1, of = chunks.len(), "orbital chunk fetched");

            if i + 1 < chunks.len() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(CHUNK_DELAY) => {}
                }
            }
        }

        positions.sort_by_key(|p| p.timestamp);
        Ok(positions)
    }

    fn positions_url(&self, chunk: &[i64], units: Units) -> String {
        let timestamps = chunk
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}/satellites/{}/positions?timestamps={}&units={}",
            self.base_url,
            self.satellite_id,
            timestamps,
            units.as_str()
        )
    }
}

/// Accepts both `{positions: [...]}` and a bare array of positions
fn parse_positions(value: Value) -> FetchResult<Vec<OrbitalPosition>> {
    let raw: Vec<RawPosition> = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        serde_json::from_value::<PositionsResponse>(value)?.positions
    };
    Ok(raw.iter().map(OrbitalPosition::from).collect())
}

/// Rough ground track for one orbit ahead of `position`.
///
/// Sweeps a full turn of longitude over one period at constant latitude.
pub fn estimate_ground_track(position: &OrbitalPosition) -> Vec<OrbitalPosition> {
    let period_ms = ORBITAL_PERIOD_MINUTES * 60.0 * 1000.0;
    let step_ms = period_ms / GROUND_TRACK_STEPS as f64;
    let step_deg = 360.0 / GROUND_TRACK_STEPS as f64;

    (0..GROUND_TRACK_STEPS)
        .map(|i| OrbitalPosition {
            latitude: position.latitude,
            longitude: (position.longitude + i as f64 * step_deg + 180.0).rem_euclid(360.0)
                - 180.0,
            altitude: position.altitude,
            timestamp: position.timestamp + (i as f64 * step_ms) as i64,
            velocity: None,
        })
        .collect()
}
