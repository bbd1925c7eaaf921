/// Application configuration module
use crate::domain::{Coordinates, Units};
use std::env;
use std::time::Duration;

/// Shortest accepted telemetry poll interval
pub const MIN_TELEMETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub telemetry_url: String,
    pub passes_url: String,
    pub orbital_api_url: String,
    pub satellite_id: u32,
    pub countries_url: String,
    pub units: Units,
    pub observer: Option<Coordinates>,
    pub historical_tracking: bool,
    pub telemetry_interval: Duration,
    pub retries: RetryBudgets,
}

/// Retry budget per fetch site
#[derive(Clone, Debug)]
pub struct RetryBudgets {
    pub telemetry: u32,
    pub passes: u32,
    pub countries: u32,
    pub orbital: u32,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let telemetry_url = env::var("ISS_TELEMETRY_URL")
            .unwrap_or_else(|_| "https://api.wheretheiss.at/v1/satellites/25544".to_string());

        let passes_url = env::var("ISS_PASSES_URL").unwrap_or_else(|_| {
            "https://api.g7vrd.co.uk/v1/satellite-passes/25544/%lat%/%lon%.json?hours=12"
                .to_string()
        });

        let orbital_api_url = env::var("ORBITAL_API_URL")
            .unwrap_or_else(|_| "https://api.wheretheiss.at/v1".to_string());

        let countries_url = env::var("COUNTRIES_URL").unwrap_or_else(|_| {
            "https://restcountries.com/v2/all?fields=name,capital,latlng".to_string()
        });

        let units = env::var("UNITS")
            .ok()
            .and_then(|s| Units::parse(&s))
            .unwrap_or_default();

        let observer = match (env_f64("OBSERVER_LAT"), env_f64("OBSERVER_LON")) {
            (Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        };

        let retries = RetryBudgets {
            telemetry: env_u32("TELEMETRY_RETRIES", 3),
            passes: env_u32("PASSES_RETRIES", 3),
            countries: env_u32("COUNTRIES_RETRIES", 3),
            orbital: env_u32("ORBITAL_RETRIES", 2),
        };

        Ok(Self {
            telemetry_url,
            passes_url,
            orbital_api_url,
            satellite_id: env_u32("ISS_SATELLITE_ID", 25544),
            countries_url,
            units,
            observer,
            historical_tracking: env_bool("HISTORICAL_TRACKING", false),
            telemetry_interval: Duration::from_millis(env_u64("TELEMETRY_EVERY_MS", 5000))
                .max(MIN_TELEMETRY_INTERVAL),
            retries,
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Out-of-range values fall back to `default` instead of truncating
fn env_u32(key: &str, default: u32) -> u32 {
    u32::try_from(env_u64(key, u64::from(default))).unwrap_or(default)
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key).map(|s| s.trim().to_ascii_lowercase()) {
        Ok(s) if matches!(s.as_str(), "1" | "true" | "yes" | "on") => true,
        Ok(s) if matches!(s.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
