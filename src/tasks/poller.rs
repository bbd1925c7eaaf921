/// Fixed-interval polling engine
use super::{Attempt, FetchFn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Not polling: never started, paused, or torn down
    Idle,
    /// A request is in flight
    Fetching,
    /// Timer armed for the next poll
    Waiting,
}

struct RunningLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Repeatedly runs a fetch operation on a fixed interval.
///
/// Fetch N+1 never starts before fetch N settles, and a failed fetch
/// does not stop the loop. Any change of polling flag, interval or fetch
/// operation tears the running loop down completely before a new one starts.
pub struct PollingEngine<T> {
    name: &'static str,
    fetch: FetchFn<T>,
    interval: Duration,
    polling: bool,
    running: Option<RunningLoop>,
    output: Arc<watch::Sender<Option<Attempt<T>>>>,
    state: Arc<watch::Sender<PollState>>,
    seq: Arc<AtomicU64>,
}

impl<T: Send + Sync + 'static> PollingEngine<T> {
    /// Create an idle engine; nothing runs until [`set_polling`](Self::set_polling).
    pub fn new(name: &'static str, fetch: FetchFn<T>, interval: Duration) -> Self {
        let (output, _) = watch::channel(None);
        let (state, _) = watch::channel(PollState::Idle);
        Self {
            name,
            fetch,
            interval,
            polling: false,
            running: None,
            output: Arc::new(output),
            state: Arc::new(state),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Latest attempt; `None` until the first poll is dispatched
    pub fn subscribe(&self) -> watch::Receiver<Option<Attempt<T>>> {
        self.output.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn set_polling(&mut self, polling: bool) {
        if self.polling == polling {
            return;
        }
        self.polling = polling;
        self.restart().await;
    }

    pub async fn set_interval(&mut self, interval: Duration) {
        if self.interval == interval {
            return;
        }
        self.interval = interval;
        self.restart().await;
    }

    pub async fn set_fetch(&mut self, fetch: FetchFn<T>) {
        self.fetch = fetch;
        self.restart().await;
    }

    /// Swap fetch and interval together with a single restart
    pub async fn reconfigure(&mut self, fetch: FetchFn<T>, interval: Duration) {
        self.fetch = fetch;
        self.interval = interval;
        self.restart().await;
    }

    /// Tear down the current loop and, if polling, start a fresh one
    pub async fn restart(&mut self) {
        self.teardown().await;
        if self.polling {
            self.start();
        }
    }

    fn start(&mut self) {
        let cancel = CancellationToken::new();
        info!(poller = self.name, interval_ms = self.interval.as_millis() as u64, "polling started");
        let task = tokio::spawn(run_loop(
            self.name,
            self.fetch.clone(),
            self.interval,
            cancel.clone(),
            self.output.clone(),
            self.state.clone(),
            self.seq.clone(),
        ));
        self.running = Some(RunningLoop { cancel, task });
    }

    async fn teardown(&mut self) {
        let Some(RunningLoop { cancel, task }) = self.running.take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = task.await {
            if e.is_panic() {
                error!(poller = self.name, "polling task panicked: {:?}", e);
            }
        }
        self.state.send_replace(PollState::Idle);
        info!(poller = self.name, "polling stopped");
    }
}

impl<T> Drop for PollingEngine<T> {
    fn drop(&mut self) {
        if let Some(RunningLoop { cancel, task }) = self.running.take() {
            cancel.cancel();
            task.abort();
        }
    }
}

async fn run_loop<T>(
    name: &'static str,
    fetch: FetchFn<T>,
    interval: Duration,
    cancel: CancellationToken,
    output: Arc<watch::Sender<Option<Attempt<T>>>>,
    state: Arc<watch::Sender<PollState>>,
    seq: Arc<AtomicU64>,
) {
    loop {
        let n = seq.fetch_add(1, Ordering::SeqCst) + 1;
        state.send_replace(PollState::Fetching);
        output.send_replace(Some(Attempt::pending(n)));
        debug!(poller = name, seq = n, "fetching");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = fetch(cancel.child_token()) => result,
        };
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = &result {
            warn!(poller = name, seq = n, code = e.code(), "poll failed: {}", e);
        }
        output.send_replace(Some(Attempt::settled(n, result)));
        state.send_replace(PollState::Waiting);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!(poller = name, "loop exited");
}
