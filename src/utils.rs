/// Utility functions
use crate::domain::RiseTime;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde_json::Value;

/// Extract number from JSON value
pub fn num(v: &Value) -> Option<f64> {
    if let Some(x) = v.as_f64() {
        return Some(x);
    }
    if let Some(s) = v.as_str() {
        return s.parse::<f64>().ok();
    }
    None
}

/// Calculate distance between two coordinates using Haversine formula
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let rlat1 = lat1.to_radians();
    let rlat2 = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + rlat1.cos() * rlat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    6371.0 * c
}

/// Parse an instant given either as epoch milliseconds or an RFC 3339 string
pub fn instant(v: &Value) -> Option<DateTime<Utc>> {
    if let Some(ms) = v.as_i64() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    if let Some(ms) = v.as_f64() {
        return Utc.timestamp_millis_opt(ms as i64).single();
    }
    v.as_str()?.parse::<DateTime<Utc>>().ok()
}

/// en-GB short date and short time, in the local timezone
pub fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%d/%m/%Y, %H:%M")
        .to_string()
}

/// Substitute `%lat%` / `%lon%` in a pass-prediction URL template
pub fn build_passes_url(template: &str, lat: f64, lon: f64) -> String {
    template
        .replace("%lat%", &lat.to_string())
        .replace("%lon%", &lon.to_string())
}

/// Earliest pass starting after `now`.
///
/// Returns `None` when the response carries no `passes` array at all.
pub fn calc_rise_time(response: &Value, now: DateTime<Utc>) -> Option<RiseTime> {
    let passes = response.get("passes")?.as_array()?;

    let next = passes
        .iter()
        .filter_map(|pass| pass.get("start").and_then(instant))
        .filter(|start| *start > now)
        .min();

    Some(match next {
        Some(start) => RiseTime {
            found: true,
            result: Some(format_local(start)),
        },
        None => RiseTime {
            found: false,
            result: None,
        },
    })
}
