/// Latest-wins fetch keyed by its arguments
use super::{ArgsFetchFn, Attempt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs one fetch per distinct argument value, latest wins.
///
/// A new argument value cancels the still-pending fetch of the previous one.
/// Settlements are only published while their sequence number is current,
/// so a stale fetch can never overwrite the result for newer arguments.
pub struct AsyncResolver<A, T> {
    name: &'static str,
    fetch: ArgsFetchFn<A, T>,
    args: Option<A>,
    current: Option<CancellationToken>,
    seq: u64,
    output: Arc<watch::Sender<Option<Attempt<T>>>>,
}

impl<A, T> AsyncResolver<A, T>
where
    A: Clone + PartialEq + Send + 'static,
    T: Send + Sync + 'static,
{
    pub fn new(name: &'static str, fetch: ArgsFetchFn<A, T>) -> Self {
        let (output, _) = watch::channel(None);
        Self {
            name,
            fetch,
            args: None,
            current: None,
            seq: 0,
            output: Arc::new(output),
        }
    }

    /// Latest attempt; `None` until the first fetch is dispatched
    pub fn subscribe(&self) -> watch::Receiver<Option<Attempt<T>>> {
        self.output.subscribe()
    }

    pub fn args(&self) -> Option<&A> {
        self.args.as_ref()
    }

    /// Dispatch a fetch for `args` unless they equal the previous arguments.
    /// Returns whether a fetch was dispatched.
    pub fn resolve(&mut self, args: A) -> bool {
        if self.args.as_ref() == Some(&args) {
            return false;
        }
        self.args = Some(args.clone());
        self.dispatch(args);
        true
    }

    /// Fetch again for the current arguments, superseding any pending fetch.
    /// Returns `false` when nothing has been resolved yet.
    pub fn refresh(&mut self) -> bool {
        let Some(args) = self.args.clone() else {
            return false;
        };
        self.dispatch(args);
        true
    }

    fn dispatch(&mut self, args: A) {
        if let Some(previous) = self.current.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        self.current = Some(cancel.clone());

        self.seq += 1;
        let seq = self.seq;
        self.output.send_replace(Some(Attempt::pending(seq)));
        debug!(resolver = self.name, seq, "dispatching");

        let fetch = (self.fetch)(args, cancel.clone());
        let output = self.output.clone();
        let name = self.name;
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = fetch => result,
            };
            if let Err(e) = &result {
                if e.is_cancelled() {
                    return;
                }
                warn!(resolver = name, seq, code = e.code(), "fetch failed: {}", e);
            }
            output.send_if_modified(|latest| match latest {
                Some(attempt) if attempt.seq == seq => {
                    *attempt = Attempt::settled(seq, result);
                    true
                }
                _ => false,
            });
        });
    }

    /// Cancel whatever is outstanding
    pub fn dispose(&mut self) {
        if let Some(cancel) = self.current.take() {
            cancel.cancel();
        }
    }
}

impl<A, T> Drop for AsyncResolver<A, T> {
    fn drop(&mut self) {
        if let Some(cancel) = self.current.take() {
            cancel.cancel();
        }
    }
}
