use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};
use serde_json::Value;

use super::error::Error;

/// The outcome of a single fetch-and-persist computation.
pub type ComputationResult = Result<Value, Error>;

/// A computation which is still pending, shared by every caller of the same cache key.
pub type PendingFetch = Shared<oneshot::Receiver<ComputationResult>>;

/// Calls a closure when dropped.
struct CallOnDrop {
    f: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl CallOnDrop {
    fn new<F: FnOnce() + Send + 'static>(f: F) -> Self {
        Self {
            f: Some(Box::new(f)),
        }
    }
}

impl Drop for CallOnDrop {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}

struct InFlight {
    /// Distinguishes this computation from later ones for the same key.
    id: u64,
    pending: PendingFetch,
}

/// How a caller got hold of a [`PendingFetch`].
pub(crate) enum Join {
    /// Another caller already started the computation.
    Joined(PendingFetch),
    /// This caller started the computation.
    Spawned(PendingFetch),
}

/// The table of computations currently in flight, keyed by effective cache key.
#[derive(Clone, Default)]
pub(crate) struct InFlightTable {
    computations: Arc<Mutex<HashMap<String, InFlight>>>,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for InFlightTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightTable")
            .field("len", &self.len())
            .finish()
    }
}

impl InFlightTable {
    /// Joins the computation for `key`, or starts it with `computation` if there is none.
    ///
    /// The lookup and the registration of a new computation happen under the same lock, so
    /// concurrent callers of the same key can never start two computations.
    ///
    /// New computations are spawned onto the runtime and run to completion even if all callers
    /// go away. The entry is removed right before the result is handed out, so every caller that
    /// comes in after that point starts from scratch.
    pub fn join<F, Fut>(&self, key: &str, computation: F) -> Join
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ComputationResult> + Send + 'static,
    {
        let mut computations = self.computations.lock();
        if let Some(in_flight) = computations.get(key) {
            return Join::Joined(in_flight.pending.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let pending = receiver.shared();
        computations.insert(
            key.to_owned(),
            InFlight {
                id,
                pending: pending.clone(),
            },
        );
        drop(computations);

        let done_token = {
            let key = key.to_owned();
            let computations = Arc::clone(&self.computations);
            CallOnDrop::new(move || {
                let mut computations = computations.lock();
                // `clear` may have let a newer computation take over the key in the meantime.
                if computations.get(&key).is_some_and(|in_flight| in_flight.id == id) {
                    computations.remove(&key);
                }
            })
        };

        tracing::trace!(key, "Spawning deduplicated fetch computation");
        let future = computation();
        let task = async move {
            let result = future.await;
            drop(done_token);
            // All receivers may be gone, which is fine.
            sender.send(result).ok();
        };
        tokio::spawn(task.bind_hub(Hub::new_from_top(Hub::current())));

        Join::Spawned(pending)
    }

    /// Forgets about all pending computations.
    ///
    /// Computations which already started still run to completion and report to their callers.
    pub fn clear(&self) {
        self.computations.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.computations.lock().len()
    }
}

/// Waits for the result of a pending computation for `key`.
pub(crate) async fn wait(key: &str, pending: PendingFetch) -> ComputationResult {
    pending
        .await
        .unwrap_or_else(|_canceled| Err(Error::Interrupted(key.to_owned())))
}
