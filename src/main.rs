/// Headless ISS tracker driven from the terminal
use iss_tracker::clients::{HttpClient, RetryPolicy};
use iss_tracker::config::AppConfig;
use iss_tracker::services::{CountriesService, IssService, OrbitalService};
use iss_tracker::store::{OrbitalState, OrbitalStore};
use iss_tracker::tasks::{FocusDetector, PageEvent};
use iss_tracker::tracker::{Command, Tracker};
use std::io::BufRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Load configuration
    let config = AppConfig::from_env()?;
    info!("Configuration loaded successfully");

    let shutdown = CancellationToken::new();

    // Reference country list, loaded once
    let countries_service = CountriesService::new(
        HttpClient::new()?,
        config.countries_url.clone(),
        RetryPolicy::immediate(config.retries.countries),
    );
    let countries = match countries_service.fetch_countries(&shutdown).await {
        Ok(countries) => {
            info!(count = countries.len(), "countries loaded");
            countries
        }
        Err(e) => {
            warn!(code = e.code(), "countries unavailable, closest capital disabled: {}", e);
            Vec::new()
        }
    };

    // Initialize services
    let iss_service = IssService::new(
        HttpClient::new()?,
        config.telemetry_url.clone(),
        config.passes_url.clone(),
        config.units,
        RetryPolicy::immediate(config.retries.telemetry),
        RetryPolicy::immediate(config.retries.passes),
    );
    let orbital_service = OrbitalService::new(
        HttpClient::new()?,
        config.orbital_api_url.clone(),
        config.satellite_id,
        RetryPolicy::exponential(config.retries.orbital),
    );

    let store = OrbitalStore::new(OrbitalState {
        is_historical_tracking_enabled: config.historical_tracking,
        ..OrbitalState::default()
    });

    // Focus signal and commands, both fed from stdin
    let (events_tx, events_rx) = mpsc::channel(16);
    let (commands_tx, commands_rx) = mpsc::channel(16);
    let focus = FocusDetector::spawn(events_rx, |focused| {
        info!(focused, "telemetry polling {}", if focused { "resumed" } else { "paused" });
    });

    if let Some(observer) = config.observer {
        commands_tx.send(Command::SelectLocation(observer)).await?;
    }

    let tracker = Tracker::new(
        iss_service,
        orbital_service,
        store.clone(),
        countries,
        config.telemetry_interval,
    );
    let tracker_task = tokio::spawn(tracker.run(focus.subscribe(), commands_rx, shutdown.clone()));

    spawn_stdin_reader(events_tx, commands_tx, store.clone());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.cancel();

    if let Err(e) = tracker_task.await {
        error!("tracker task failed: {:?}", e);
    }
    drop(focus);

    let state = store.snapshot();
    if let Some(position) = state.current_position {
        info!(
            lat = position.latitude,
            lon = position.longitude,
            speed = %format!("{:.0} {}", position.velocity, position.units.speed_label()),
            "last known position"
        );
    }

    Ok(())
}

/// Read page events and tracker commands, one per line.
///
/// Runs on a plain thread: a blocked stdin read must not hold up runtime
/// shutdown.
fn spawn_stdin_reader(
    events: mpsc::Sender<PageEvent>,
    commands: mpsc::Sender<Command>,
    store: OrbitalStore,
) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("stdin read error: {:?}", e);
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(event) = PageEvent::parse(line) {
                if events.blocking_send(event).is_err() {
                    break;
                }
                continue;
            }

            let mut words = line.split_whitespace();
            match (words.next(), words.next()) {
                (Some("track"), None) => {
                    store.toggle_historical_tracking();
                    info!(
                        enabled = store.snapshot().is_historical_tracking_enabled,
                        "historical tracking toggled"
                    );
                }
                (Some("refresh"), None) => {
                    if commands.blocking_send(Command::RefreshRiseTime).is_err() {
                        break;
                    }
                }
                (Some("goto"), Some(index)) => match index.parse::<usize>() {
                    Ok(index) => {
                        if commands.blocking_send(Command::SelectCapital(index)).is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!(input = index, "goto expects a list index"),
                },
                _ => warn!(input = line, "unknown command"),
            }
        }
    });
}
