/// Shared orbital visualisation state
use crate::domain::{
    OrbitalPosition, RiseTime, SettingsPatch, TelemetrySample, VisualizationSettings,
};
use crate::errors::FetchError;
use std::sync::Arc;
use tokio::sync::watch;

/// Immutable snapshot of everything the presentation layer reads.
///
/// Series and the current sample sit behind `Arc`s: a write replaces them,
/// it never mutates a snapshot someone else is holding.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitalState {
    pub settings: VisualizationSettings,
    pub is_control_panel_open: bool,
    pub is_historical_tracking_enabled: bool,
    pub current_position: Option<Arc<TelemetrySample>>,
    /// Set while the latest telemetry poll failed; `current_position` is stale then
    pub telemetry_error: Option<FetchError>,
    pub historical_positions: Arc<[OrbitalPosition]>,
    pub future_predictions: Arc<[OrbitalPosition]>,
    pub ground_track: Arc<[OrbitalPosition]>,
    pub is_loading_historical: bool,
    pub is_loading_predictions: bool,
    /// Next pass over the selected location
    pub rise_time: Option<RiseTime>,
    /// Why the last pass prediction failed, if it did
    pub rise_time_error: Option<FetchError>,
}

impl Default for OrbitalState {
    fn default() -> Self {
        Self {
            settings: VisualizationSettings::default(),
            is_control_panel_open: false,
            is_historical_tracking_enabled: false,
            current_position: None,
            telemetry_error: None,
            historical_positions: Arc::from([]),
            future_predictions: Arc::from([]),
            ground_track: Arc::from([]),
            is_loading_historical: false,
            is_loading_predictions: false,
            rise_time: None,
            rise_time_error: None,
        }
    }
}

/// Handle to the single state container; clones share the same state.
#[derive(Clone)]
pub struct OrbitalStore {
    tx: Arc<watch::Sender<OrbitalState>>,
}

impl Default for OrbitalStore {
    fn default() -> Self {
        Self::new(OrbitalState::default())
    }
}

impl OrbitalStore {
    pub fn new(initial: OrbitalState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> OrbitalState {
        self.tx.borrow().clone()
    }

    pub fn settings(&self) -> VisualizationSettings {
        self.tx.borrow().settings.clone()
    }

    /// Notified after every action that changed something
    pub fn subscribe(&self) -> watch::Receiver<OrbitalState> {
        self.tx.subscribe()
    }

    pub fn toggle_control_panel(&self) {
        self.tx
            .send_modify(|s| s.is_control_panel_open = !s.is_control_panel_open);
    }

    /// Disabling tracking also clears both position series
    pub fn toggle_historical_tracking(&self) {
        self.tx.send_modify(|s| {
            s.is_historical_tracking_enabled = !s.is_historical_tracking_enabled;
            if !s.is_historical_tracking_enabled {
                s.historical_positions = Arc::from([]);
                s.future_predictions = Arc::from([]);
            }
        });
    }

    pub fn update_settings(&self, patch: SettingsPatch) {
        self.tx.send_if_modified(|s| {
            let before = s.settings.clone();
            s.settings.apply(patch);
            s.settings != before
        });
    }

    pub fn set_current_position(&self, position: Option<TelemetrySample>) {
        self.tx
            .send_modify(|s| s.current_position = position.map(Arc::new));
    }

    pub fn set_historical_positions(&self, positions: Vec<OrbitalPosition>) {
        self.tx
            .send_modify(|s| s.historical_positions = positions.into());
    }

    pub fn set_future_predictions(&self, positions: Vec<OrbitalPosition>) {
        self.tx
            .send_modify(|s| s.future_predictions = positions.into());
    }

    pub fn set_ground_track(&self, positions: Vec<OrbitalPosition>) {
        self.tx.send_modify(|s| s.ground_track = positions.into());
    }

    pub fn set_loading_historical(&self, loading: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.is_loading_historical != loading;
            s.is_loading_historical = loading;
            changed
        });
    }

    pub fn set_loading_predictions(&self, loading: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.is_loading_predictions != loading;
            s.is_loading_predictions = loading;
            changed
        });
    }

    pub fn set_telemetry_error(&self, error: Option<FetchError>) {
        self.tx.send_if_modified(|s| {
            let changed = s.telemetry_error != error;
            s.telemetry_error = error;
            changed
        });
    }

    /// A fresh prediction also clears any earlier failure
    pub fn set_rise_time(&self, rise_time: Option<RiseTime>) {
        self.tx.send_modify(|s| {
            s.rise_time = rise_time;
            s.rise_time_error = None;
        });
    }

    /// Drop the stale prediction and keep the reason
    pub fn fail_rise_time(&self, error: FetchError) {
        self.tx.send_modify(|s| {
            s.rise_time = None;
            s.rise_time_error = Some(error);
        });
    }

    pub fn reset_visualisation(&self) {
        self.tx.send_modify(|s| {
            s.historical_positions = Arc::from([]);
            s.future_predictions = Arc::from([]);
            s.is_loading_historical = false;
            s.is_loading_predictions = false;
        });
    }
}
