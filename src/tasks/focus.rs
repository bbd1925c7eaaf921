/// Page focus and visibility detection
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Environment-level focus/visibility transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    Focus,
    Blur,
    Visible,
    Hidden,
}

impl PageEvent {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "focus" => Some(PageEvent::Focus),
            "blur" => Some(PageEvent::Blur),
            "visible" => Some(PageEvent::Visible),
            "hidden" => Some(PageEvent::Hidden),
            _ => None,
        }
    }

    fn is_focused(self) -> bool {
        matches!(self, PageEvent::Focus | PageEvent::Visible)
    }
}

/// Boolean "page is focused" signal derived from a stream of [`PageEvent`]s.
///
/// Starts out focused. The event listener lives exactly as long as the
/// detector: dropping it closes the event channel.
pub struct FocusDetector {
    state: watch::Receiver<bool>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl FocusDetector {
    /// Listen on `events`, calling `on_change` on every transition
    pub fn spawn<F>(mut events: mpsc::Receiver<PageEvent>, on_change: F) -> Self
    where
        F: Fn(bool) + Send + 'static,
    {
        let (tx, rx) = watch::channel(true);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                let focused = event.is_focused();
                let changed = tx.send_if_modified(|current| {
                    if *current == focused {
                        return false;
                    }
                    *current = focused;
                    true
                });
                if changed {
                    info!(?event, focused, "page focus changed");
                    on_change(focused);
                }
            }
            debug!("focus listener removed");
        });

        Self {
            state: rx,
            cancel,
            task,
        }
    }

    pub fn is_focused(&self) -> bool {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.clone()
    }
}

impl Drop for FocusDetector {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
