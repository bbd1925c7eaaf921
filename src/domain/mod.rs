/// Domain models for the tracker
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Measurement units requested from and reported by the upstream APIs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Kilometers,
    Miles,
}

impl Units {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kilometers" | "km" => Some(Units::Kilometers),
            "miles" | "mi" => Some(Units::Miles),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Kilometers => "kilometers",
            Units::Miles => "miles",
        }
    }

    /// Speed suffix shown next to the velocity readout
    pub fn speed_label(&self) -> &'static str {
        match self {
            Units::Kilometers => "kph",
            Units::Miles => "mph",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Daylight,
    Eclipsed,
}

/// Where a telemetry sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Live,
    /// Placeholder published when the upstream document could not be parsed
    Fallback,
}

/// One real-time reading of the ISS
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    pub name: String,
    pub id: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub velocity: f64,
    pub visibility: Visibility,
    pub footprint: f64,
    pub timestamp: DateTime<Utc>,
    pub daynum: f64,
    pub solar_lat: f64,
    pub solar_lon: f64,
    pub units: Units,
    pub provenance: Provenance,
}

impl TelemetrySample {
    /// Fixed, clearly flagged position used when the upstream is unreadable
    pub fn fallback(units: Units) -> Self {
        Self {
            name: "iss".to_string(),
            id: 25544,
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            velocity: 0.0,
            visibility: Visibility::Daylight,
            footprint: 0.0,
            timestamp: Utc::now(),
            daynum: 0.0,
            solar_lat: 0.0,
            solar_lon: 0.0,
            units,
            provenance: Provenance::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.provenance == Provenance::Fallback
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn as_orbital_position(&self) -> OrbitalPosition {
        OrbitalPosition {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            timestamp: self.timestamp.timestamp_millis(),
            velocity: Some(self.velocity),
        }
    }
}

/// Point on the Earth's surface in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Sampled position along the orbit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrbitalPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
}

/// Reference country record with its capital
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub name: String,
    #[serde(default)]
    pub capital: String,
    /// `[latitude, longitude]`, sometimes empty upstream
    #[serde(default)]
    pub latlng: Vec<f64>,
}

impl Country {
    /// Capital coordinates, if the record carries a usable pair.
    /// Zero is a legitimate coordinate.
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self.latlng.as_slice() {
            [lat, lon, ..] if lat.is_finite() && lon.is_finite() => Some(Coordinates {
                latitude: *lat,
                longitude: *lon,
            }),
            _ => None,
        }
    }
}

/// Next-visible-pass summary for a ground location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiseTime {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Batch answer of the orbital positions endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct PositionsResponse {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub positions: Vec<RawPosition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPosition {
    pub satlatitude: f64,
    pub satlongitude: f64,
    pub sataltitude: f64,
    #[serde(default)]
    pub azimuth: f64,
    #[serde(default)]
    pub elevation: f64,
    #[serde(default)]
    pub ra: f64,
    #[serde(default)]
    pub dec: f64,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default)]
    pub eclipsed: bool,
}

impl From<&RawPosition> for OrbitalPosition {
    fn from(raw: &RawPosition) -> Self {
        Self {
            latitude: raw.satlatitude,
            longitude: raw.satlongitude,
            altitude: raw.sataltitude,
            timestamp: raw.timestamp * 1000,
            velocity: None,
        }
    }
}

/// User-editable orbital overlay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationSettings {
    pub show_historical_path: bool,
    pub show_future_predictions: bool,
    pub show_ground_track: bool,
    /// Hours of history
    pub path_duration: f64,
    /// Hours of prediction
    pub prediction_duration: f64,
    /// Milliseconds between orbital refreshes
    pub update_interval: u64,
    pub path_opacity: f64,
    pub path_color: String,
}

impl Default for VisualizationSettings {
    fn default() -> Self {
        Self {
            show_historical_path: true,
            show_future_predictions: false,
            show_ground_track: true,
            path_duration: 2.0,
            prediction_duration: 1.0,
            update_interval: 30_000,
            path_opacity: 0.7,
            path_color: "#00ff00".to_string(),
        }
    }
}

/// Partial update of [`VisualizationSettings`]; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub show_historical_path: Option<bool>,
    pub show_future_predictions: Option<bool>,
    pub show_ground_track: Option<bool>,
    pub path_duration: Option<f64>,
    pub prediction_duration: Option<f64>,
    pub update_interval: Option<u64>,
    pub path_opacity: Option<f64>,
    pub path_color: Option<String>,
}

impl VisualizationSettings {
    pub fn apply(&mut self, patch: SettingsPatch) {
        let SettingsPatch {
            show_historical_path,
            show_future_predictions,
            show_ground_track,
            path_duration,
            prediction_duration,
            update_interval,
            path_opacity,
            path_color,
        } = patch;

        if let Some(v) = show_historical_path {
            self.show_historical_path = v;
        }
        if let Some(v) = show_future_predictions {
            self.show_future_predictions = v;
        }
        if let Some(v) = show_ground_track {
            self.show_ground_track = v;
        }
        if let Some(v) = path_duration {
            self.path_duration = v;
        }
        if let Some(v) = prediction_duration {
            self.prediction_duration = v;
        }
        if let Some(v) = update_interval {
            self.update_interval = v;
        }
        if let Some(v) = path_opacity {
            self.path_opacity = v.clamp(0.0, 1.0);
        }
        if let Some(v) = path_color {
            self.path_color = v;
        }
    }
}
