/// Wires the services, the polling engines and the shared store together
use crate::clients::Transport;
use crate::config::MIN_TELEMETRY_INTERVAL;
use crate::domain::{Coordinates, Country, OrbitalPosition, RiseTime, TelemetrySample, Units};
use crate::geo::{city_from_index, closest_capital};
use crate::services::{estimate_ground_track, IssService, OrbitalService};
use crate::store::{OrbitalState, OrbitalStore};
use crate::tasks::{ArgsFetchFn, Attempt, AsyncResolver, FetchFn, PollingEngine, Settlement};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Floor for the user-configurable orbital refresh interval
const MIN_ORBITAL_INTERVAL: Duration = Duration::from_secs(1);

/// Requests the tracker accepts while running
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Predict the next pass over an arbitrary location
    SelectLocation(Coordinates),
    /// Predict the next pass over the capital at this index of the sorted list
    SelectCapital(usize),
    /// Fetch the prediction for the current location again
    RefreshRiseTime,
}

pub struct Tracker<T> {
    iss: Arc<IssService<T>>,
    orbital: Arc<OrbitalService<T>>,
    store: OrbitalStore,
    countries: Arc<[Country]>,
    telemetry_interval: Duration,
}

impl<T: Transport + 'static> Tracker<T> {
    pub fn new(
        iss: IssService<T>,
        orbital: OrbitalService<T>,
        store: OrbitalStore,
        countries: Vec<Country>,
        telemetry_interval: Duration,
    ) -> Self {
        Self {
            iss: Arc::new(iss),
            orbital: Arc::new(orbital),
            store,
            countries: countries.into(),
            telemetry_interval: telemetry_interval.max(MIN_TELEMETRY_INTERVAL),
        }
    }

    pub fn store(&self) -> &OrbitalStore {
        &self.store
    }

    pub fn countries(&self) -> &[Country] {
        &self.countries
    }

    /// Drive every fetch site until `shutdown` fires.
    ///
    /// Telemetry polls while `focus` is true. Historical and predicted
    /// series poll while tracking is enabled and their overlay is shown,
    /// and restart whenever their window or refresh interval changes.
    pub async fn run(
        self,
        mut focus: watch::Receiver<bool>,
        mut commands: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
    ) {
        let units = self.iss.units();
        let mut store_rx = self.store.subscribe();
        let initial = store_rx.borrow_and_update().clone();

        let mut telemetry = PollingEngine::new(
            "telemetry",
            telemetry_fetch(self.iss.clone()),
            self.telemetry_interval,
        );
        let mut telemetry_rx = telemetry.subscribe();
        let mut telemetry_seen = 0;

        let mut rise = AsyncResolver::new("rise-time", rise_time_fetch(self.iss.clone()));
        let mut rise_rx = rise.subscribe();

        let mut historical =
            OrbitalFeed::new(Series::Historical, &self.orbital, units, &initial);
        let mut future = OrbitalFeed::new(Series::Future, &self.orbital, units, &initial);
        let mut tracking = initial.is_historical_tracking_enabled;

        let focused = *focus.borrow_and_update();
        telemetry.set_polling(focused).await;
        historical.reconcile(&self.orbital, units, &initial, &self.store).await;
        future.reconcile(&self.orbital, units, &initial, &self.store).await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Ok(()) = focus.changed() => {
                    let focused = *focus.borrow_and_update();
                    telemetry.set_polling(focused).await;
                }
                Ok(()) = store_rx.changed() => {
                    let state = store_rx.borrow_and_update().clone();
                    if tracking && !state.is_historical_tracking_enabled {
                        self.store.reset_visualisation();
                    }
                    tracking = state.is_historical_tracking_enabled;
                    if !state.settings.show_ground_track && !state.ground_track.is_empty() {
                        self.store.set_ground_track(Vec::new());
                    }
                    historical.reconcile(&self.orbital, units, &state, &self.store).await;
                    future.reconcile(&self.orbital, units, &state, &self.store).await;
                }
                Some(command) = commands.recv() => self.handle(command, &mut rise),
                Ok(()) = telemetry_rx.changed() => {
                    let attempt = telemetry_rx.borrow_and_update().clone();
                    if let Some(settlement) = newer_settlement(&mut telemetry_seen, attempt) {
                        self.on_telemetry(settlement);
                    }
                }
                Ok(()) = rise_rx.changed() => {
                    let attempt = rise_rx.borrow_and_update().clone();
                    self.on_rise_time(attempt);
                }
                Ok(()) = historical.output.changed() => historical.mirror(&self.store),
                Ok(()) = future.output.changed() => future.mirror(&self.store),
            }
        }

        telemetry.set_polling(false).await;
        historical.engine.set_polling(false).await;
        future.engine.set_polling(false).await;
        rise.dispose();
        info!("tracker stopped");
    }

    fn handle(&self, command: Command, rise: &mut AsyncResolver<Coordinates, RiseTime>) {
        let location = match command {
            Command::RefreshRiseTime => {
                if !rise.refresh() {
                    warn!("no location selected to refresh");
                }
                return;
            }
            Command::SelectLocation(at) => at,
            Command::SelectCapital(index) => {
                let Some(country) = city_from_index(&self.countries, index) else {
                    warn!(index, "no capital at index");
                    return;
                };
                let Some(at) = country.coordinates() else {
                    warn!(capital = %country.capital, "capital has no coordinates");
                    return;
                };
                info!(capital = %country.capital, country = %country.name, "location selected");
                at
            }
        };
        if !rise.resolve(location) {
            debug!(?location, "location unchanged");
        }
    }

    fn on_telemetry(&self, settlement: Settlement<TelemetrySample>) {
        let sample = match settlement {
            Settlement::Ready(sample) => sample,
            Settlement::Failed(e) if e.is_cancelled() => return,
            Settlement::Failed(e) => {
                self.store.set_telemetry_error(Some(e));
                return;
            }
            Settlement::Pending => return,
        };

        if let Some(country) = closest_capital(&self.countries, sample.coordinates()) {
            info!(
                lat = sample.latitude,
                lon = sample.longitude,
                capital = %country.capital,
                "closest capital"
            );
        }
        if self.store.settings().show_ground_track {
            self.store
                .set_ground_track(estimate_ground_track(&sample.as_orbital_position()));
        }
        self.store.set_current_position(Some(sample));
        self.store.set_telemetry_error(None);
    }

    fn on_rise_time(&self, attempt: Option<Attempt<RiseTime>>) {
        match attempt.map(|a| a.settlement) {
            Some(Settlement::Ready(rise)) => {
                info!(found = rise.found, next = rise.result.as_deref().unwrap_or("-"), "next pass");
                self.store.set_rise_time(Some(rise));
            }
            Some(Settlement::Failed(e)) => self.store.fail_rise_time(e),
            Some(Settlement::Pending) | None => {}
        }
    }
}

/// Settlement of `attempt` when it is newer than the last one taken.
///
/// Ordering by sequence number rather than by engine state keeps a sample
/// that settled just before a pause.
fn newer_settlement<T>(last_seen: &mut u64, attempt: Option<Attempt<T>>) -> Option<Settlement<T>> {
    let attempt = attempt?;
    if attempt.is_pending() || attempt.seq <= *last_seen {
        return None;
    }
    *last_seen = attempt.seq;
    Some(attempt.settlement)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Series {
    Historical,
    Future,
}

/// What a series engine should currently be doing
#[derive(Debug, Clone, Copy, PartialEq)]
struct Window {
    enabled: bool,
    hours: f64,
    interval: Duration,
}

impl Window {
    fn of(series: Series, state: &OrbitalState) -> Self {
        let settings = &state.settings;
        let (shown, hours) = match series {
            Series::Historical => (settings.show_historical_path, settings.path_duration),
            Series::Future => (settings.show_future_predictions, settings.prediction_duration),
        };
        Self {
            enabled: state.is_historical_tracking_enabled && shown,
            hours,
            interval: Duration::from_millis(settings.update_interval).max(MIN_ORBITAL_INTERVAL),
        }
    }
}

/// One orbital series: its engine, the window it was built for, and its output
struct OrbitalFeed {
    series: Series,
    engine: PollingEngine<Vec<OrbitalPosition>>,
    output: watch::Receiver<Option<Attempt<Vec<OrbitalPosition>>>>,
    applied: Window,
}

impl OrbitalFeed {
    fn new<T: Transport + 'static>(
        series: Series,
        orbital: &Arc<OrbitalService<T>>,
        units: Units,
        state: &OrbitalState,
    ) -> Self {
        let window = Window::of(series, state);
        let name = match series {
            Series::Historical => "historical",
            Series::Future => "future",
        };
        let engine = PollingEngine::new(
            name,
            series_fetch(series, orbital.clone(), window.hours, units),
            window.interval,
        );
        let output = engine.subscribe();
        Self {
            series,
            engine,
            output,
            // start disabled so the first reconcile turns polling on if wanted
            applied: Window {
                enabled: false,
                ..window
            },
        }
    }

    async fn reconcile<T: Transport + 'static>(
        &mut self,
        orbital: &Arc<OrbitalService<T>>,
        units: Units,
        state: &OrbitalState,
        store: &OrbitalStore,
    ) {
        let wanted = Window::of(self.series, state);
        if wanted == self.applied {
            return;
        }

        if wanted.hours != self.applied.hours || wanted.interval != self.applied.interval {
            self.engine
                .reconfigure(
                    series_fetch(self.series, orbital.clone(), wanted.hours, units),
                    wanted.interval,
                )
                .await;
        }
        self.engine.set_polling(wanted.enabled).await;
        if !wanted.enabled {
            // whatever was published before teardown is stale now
            self.output.borrow_and_update();
            self.set_loading(store, false);
        }
        self.applied = wanted;
    }

    fn mirror(&mut self, store: &OrbitalStore) {
        let attempt = self.output.borrow_and_update().clone();
        if !self.engine.is_polling() {
            return;
        }
        match attempt.map(|a| a.settlement) {
            Some(Settlement::Pending) => self.set_loading(store, true),
            Some(Settlement::Ready(positions)) => {
                debug!(series = ?self.series, count = positions.len(), "series refreshed");
                self.set_positions(store, positions);
                self.set_loading(store, false);
            }
            Some(Settlement::Failed(e)) if e.is_cancelled() => {}
            Some(Settlement::Failed(_)) => {
                self.set_positions(store, Vec::new());
                self.set_loading(store, false);
            }
            None => {}
        }
    }

    fn set_positions(&self, store: &OrbitalStore, positions: Vec<OrbitalPosition>) {
        match self.series {
            Series::Historical => store.set_historical_positions(positions),
            Series::Future => store.set_future_predictions(positions),
        }
    }

    fn set_loading(&self, store: &OrbitalStore, loading: bool) {
        match self.series {
            Series::Historical => store.set_loading_historical(loading),
            Series::Future => store.set_loading_predictions(loading),
        }
    }
}

fn telemetry_fetch<T: Transport + 'static>(iss: Arc<IssService<T>>) -> FetchFn<TelemetrySample> {
    Arc::new(move |cancel: CancellationToken| {
        let iss = iss.clone();
        async move { iss.fetch_telemetry(&cancel).await }.boxed()
    })
}

fn rise_time_fetch<T: Transport + 'static>(
    iss: Arc<IssService<T>>,
) -> ArgsFetchFn<Coordinates, RiseTime> {
    Arc::new(move |location: Coordinates, cancel: CancellationToken| {
        let iss = iss.clone();
        async move { iss.fetch_rise_time(location, &cancel).await }.boxed()
    })
}

fn series_fetch<T: Transport + 'static>(
    series: Series,
    orbital: Arc<OrbitalService<T>>,
    hours: f64,
    units: Units,
) -> FetchFn<Vec<OrbitalPosition>> {
    Arc::new(move |cancel: CancellationToken| {
        let orbital = orbital.clone();
        async move {
            match series {
                Series::Historical => orbital.get_historical_positions(hours, units, &cancel).await,
                Series::Future => orbital.get_future_positions(hours, units, &cancel).await,
            }
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fake::{Reply, ScriptedTransport};
    use crate::clients::RetryPolicy;
    use crate::domain::SettingsPatch;
    use crate::errors::FetchError;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinHandle;

    fn country(name: &str, capital: &str, latlng: &[f64]) -> Country {
        Country {
            name: name.to_string(),
            capital: capital.to_string(),
            latlng: latlng.to_vec(),
        }
    }

    /// Whether call `n` to an endpoint succeeds; failing calls get a 503
    type Healthy = fn(usize) -> bool;

    fn always(_: usize) -> bool {
        true
    }

    fn iss_transport(
        telemetry_calls: Arc<AtomicUsize>,
        telemetry_ok: Healthy,
        passes_ok: Healthy,
    ) -> ScriptedTransport {
        let passes_calls = AtomicUsize::new(0);
        ScriptedTransport::new(move |url, _| {
            if url.starts_with("http://iss/now") {
                let n = telemetry_calls.fetch_add(1, Ordering::SeqCst);
                if !telemetry_ok(n) {
                    return Reply::Json(503, json!({}));
                }
                Reply::Json(
                    200,
                    json!({
                        "name": "iss",
                        "id": 25544,
                        "latitude": 51.0,
                        "longitude": 0.5,
                        "altitude": 420.0,
                        "velocity": 27600.0,
                        "visibility": "daylight",
                        "timestamp": 1_700_000_000
                    }),
                )
            } else {
                if !passes_ok(passes_calls.fetch_add(1, Ordering::SeqCst)) {
                    return Reply::Json(503, json!({}));
                }
                let start = Utc::now().timestamp_millis() + 3_600_000;
                Reply::Json(200, json!({ "passes": [{ "start": start }] }))
            }
        })
    }

    /// One position per requested timestamp
    fn orbital_transport(calls: Arc<AtomicUsize>) -> ScriptedTransport {
        ScriptedTransport::new(move |url, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            let query = url.split("timestamps=").nth(1).unwrap_or_default();
            let positions: Vec<Value> = query
                .split('&')
                .next()
                .unwrap_or_default()
                .split(',')
                .filter_map(|t| t.parse::<i64>().ok())
                .map(|t| {
                    json!({
                        "satlatitude": 10.0,
                        "satlongitude": 20.0,
                        "sataltitude": 420.0,
                        "timestamp": t
                    })
                })
                .collect();
            Reply::Json(200, json!({ "positions": positions }))
        })
    }

    struct Harness {
        store: OrbitalStore,
        focus: watch::Sender<bool>,
        commands: mpsc::Sender<Command>,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
        telemetry_calls: Arc<AtomicUsize>,
        orbital_calls: Arc<AtomicUsize>,
    }

    fn start(store: OrbitalStore) -> Harness {
        start_with(store, always, always)
    }

    fn start_with(store: OrbitalStore, telemetry_ok: Healthy, passes_ok: Healthy) -> Harness {
        let telemetry_calls = Arc::new(AtomicUsize::new(0));
        let orbital_calls = Arc::new(AtomicUsize::new(0));
        let iss = IssService::new(
            iss_transport(telemetry_calls.clone(), telemetry_ok, passes_ok),
            "http://iss/now".to_string(),
            "http://passes/%lat%/%lon%.json".to_string(),
            Units::Kilometers,
            RetryPolicy::immediate(0),
            RetryPolicy::immediate(0),
        );
        let orbital = OrbitalService::new(
            orbital_transport(orbital_calls.clone()),
            "http://orbital".to_string(),
            25544,
            RetryPolicy::immediate(0),
        );
        let countries = vec![
            country("United Kingdom", "London", &[51.5, -0.12]),
            country("France", "Paris", &[48.85, 2.35]),
        ];
        let tracker = Tracker::new(iss, orbital, store.clone(), countries, Duration::from_secs(5));

        let (focus, focus_rx) = watch::channel(true);
        let (commands, commands_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(tracker.run(focus_rx, commands_rx, shutdown.clone()));
        Harness {
            store,
            focus,
            commands,
            shutdown,
            task,
            telemetry_calls,
            orbital_calls,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_reaches_store_while_focused() {
        let h = start(OrbitalStore::default());
        settle().await;

        let state = h.store.snapshot();
        let current = state.current_position.expect("telemetry mirrored");
        assert_eq!(current.latitude, 51.0);
        assert_eq!(state.ground_track.len(), 100);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.telemetry_calls.load(Ordering::SeqCst), 2);

        h.focus.send(false).unwrap();
        settle().await;
        let paused_at = h.telemetry_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.telemetry_calls.load(Ordering::SeqCst), paused_at);

        h.focus.send(true).unwrap();
        settle().await;
        assert_eq!(h.telemetry_calls.load(Ordering::SeqCst), paused_at + 1);

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ground_track_hidden_clears_it() {
        let h = start(OrbitalStore::default());
        settle().await;
        assert!(!h.store.snapshot().ground_track.is_empty());

        h.store.update_settings(SettingsPatch {
            show_ground_track: Some(false),
            ..Default::default()
        });
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(h.store.snapshot().ground_track.is_empty());

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_series_follow_tracking_toggle() {
        let h = start(OrbitalStore::default());
        h.store.update_settings(SettingsPatch {
            path_duration: Some(0.5),
            ..Default::default()
        });
        settle().await;
        assert_eq!(h.orbital_calls.load(Ordering::SeqCst), 0);

        h.store.toggle_historical_tracking();
        settle().await;
        let state = h.store.snapshot();
        // 30 minutes every 5 minutes, both ends included
        assert_eq!(state.historical_positions.len(), 7);
        assert!(!state.is_loading_historical);
        assert!(state.future_predictions.is_empty());
        assert_eq!(h.orbital_calls.load(Ordering::SeqCst), 1);

        h.store.toggle_historical_tracking();
        settle().await;
        let state = h.store.snapshot();
        assert!(state.historical_positions.is_empty());
        assert!(!state.is_loading_historical);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.orbital_calls.load(Ordering::SeqCst), 1);

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_predictions_refresh_on_interval() {
        let store = OrbitalStore::default();
        store.update_settings(SettingsPatch {
            show_historical_path: Some(false),
            show_future_predictions: Some(true),
            prediction_duration: Some(0.5),
            update_interval: Some(10_000),
            ..Default::default()
        });
        store.toggle_historical_tracking();
        let h = start(store);
        settle().await;

        let state = h.store.snapshot();
        assert_eq!(state.future_predictions.len(), 6);
        assert!(state.historical_positions.is_empty());
        assert_eq!(h.orbital_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.orbital_calls.load(Ordering::SeqCst), 2);

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_capital_resolves_next_pass() {
        let h = start(OrbitalStore::default());
        h.commands.send(Command::SelectCapital(1)).await.unwrap();
        settle().await;

        let rise = h.store.snapshot().rise_time.expect("rise time stored");
        assert!(rise.found);
        assert!(rise.result.is_some());

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_capital_is_ignored() {
        let h = start(OrbitalStore::default());
        h.commands.send(Command::SelectCapital(42)).await.unwrap();
        settle().await;
        assert!(h.store.snapshot().rise_time.is_none());

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    fn first_only(n: usize) -> bool {
        n == 0
    }

    fn not_first(n: usize) -> bool {
        n > 0
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_outage_is_visible() {
        let h = start_with(OrbitalStore::default(), first_only, always);
        settle().await;
        let state = h.store.snapshot();
        assert!(state.current_position.is_some());
        assert!(state.telemetry_error.is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        let state = h.store.snapshot();
        assert_eq!(state.telemetry_error, Some(FetchError::Status(503)));
        // last good sample is kept, flagged stale by the error
        assert_eq!(state.current_position.unwrap().latitude, 51.0);

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_recovery_clears_error() {
        let h = start_with(OrbitalStore::default(), not_first, always);
        settle().await;
        let state = h.store.snapshot();
        assert!(state.current_position.is_none());
        assert_eq!(state.telemetry_error, Some(FetchError::Status(503)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let state = h.store.snapshot();
        assert!(state.current_position.is_some());
        assert!(state.telemetry_error.is_none());

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rise_time_can_be_refreshed() {
        let h = start_with(OrbitalStore::default(), always, not_first);
        h.commands.send(Command::SelectCapital(0)).await.unwrap();
        settle().await;
        let state = h.store.snapshot();
        assert!(state.rise_time.is_none());
        assert_eq!(state.rise_time_error, Some(FetchError::Status(503)));

        // same capital again is deduplicated, refresh is not
        h.commands.send(Command::SelectCapital(0)).await.unwrap();
        settle().await;
        assert!(h.store.snapshot().rise_time.is_none());

        h.commands.send(Command::RefreshRiseTime).await.unwrap();
        settle().await;
        let state = h.store.snapshot();
        assert!(state.rise_time.expect("refreshed").found);
        assert!(state.rise_time_error.is_none());

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    fn ready(seq: u64, value: u8) -> Option<Attempt<u8>> {
        Some(Attempt {
            seq,
            settlement: Settlement::Ready(value),
        })
    }

    #[test]
    fn test_newer_settlement_ignores_pending_and_replays() {
        let mut seen = 0;
        let pending = Some(Attempt::<u8> {
            seq: 1,
            settlement: Settlement::Pending,
        });
        assert_eq!(newer_settlement(&mut seen, pending), None);
        assert_eq!(newer_settlement(&mut seen, ready(1, 7)), Some(Settlement::Ready(7)));
        assert_eq!(newer_settlement(&mut seen, ready(1, 7)), None);
        assert_eq!(newer_settlement::<u8>(&mut seen, None), None);
        assert_eq!(seen, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_settled_before_pause_is_kept() {
        let h = start(OrbitalStore::default());
        // blur as soon as the first poll has settled
        while h.telemetry_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        h.focus.send(false).unwrap();
        settle().await;

        assert_eq!(h.telemetry_calls.load(Ordering::SeqCst), 1);
        assert!(h.store.snapshot().current_position.is_some());

        h.shutdown.cancel();
        h.task.await.unwrap();
    }
}
