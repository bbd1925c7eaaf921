/// Async orchestration primitives: polling, latest-wins resolution, focus tracking
mod focus;
mod poller;
mod resolver;

pub use focus::{FocusDetector, PageEvent};
pub use poller::{PollState, PollingEngine};
pub use resolver::AsyncResolver;

use crate::errors::{FetchError, FetchResult};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Fetch operation driven by a polling loop
pub type FetchFn<T> = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, FetchResult<T>> + Send + Sync>;

/// Fetch operation parameterised by its arguments
pub type ArgsFetchFn<A, T> =
    Arc<dyn Fn(A, CancellationToken) -> BoxFuture<'static, FetchResult<T>> + Send + Sync>;

/// State of one dispatched fetch as seen by consumers
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement<T> {
    Pending,
    Ready(T),
    Failed(FetchError),
}

/// Most recent fetch of a site; replaced, never merged, on every new dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt<T> {
    /// Increases with every dispatch of the same site
    pub seq: u64,
    pub settlement: Settlement<T>,
}

impl<T> Attempt<T> {
    fn pending(seq: u64) -> Self {
        Self {
            seq,
            settlement: Settlement::Pending,
        }
    }

    fn settled(seq: u64, result: FetchResult<T>) -> Self {
        Self {
            seq,
            settlement: match result {
                Ok(value) => Settlement::Ready(value),
                Err(e) => Settlement::Failed(e),
            },
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.settlement, Settlement::Pending)
    }
}
