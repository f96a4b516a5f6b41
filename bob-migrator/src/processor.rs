//! Parallel endpoint-balanced processor
//!
//! Runs a fixed list of operations, each keyed by a `(from, to)` pair of
//! endpoint addresses, with bounded concurrency. Whenever a worker is free
//! it picks the remaining operation whose endpoints currently carry the
//! least load. This is best-effort fairness, not mutual exclusion: two
//! operations may still hit the same endpoint when nothing less loaded is
//! left.

use bob_core::{BobError, Result};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// An operation between two endpoints
#[derive(Debug, Clone)]
pub struct EndpointOperation<T> {
    pub from: String,
    pub to: String,
    pub payload: T,
}

impl<T> EndpointOperation<T> {
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: T) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            payload,
        }
    }
}

/// Load counters and not-yet-started operations of one `invoke` call
struct SchedulerState<T> {
    load_by_endpoint: HashMap<String, usize>,
    remaining: Vec<(usize, EndpointOperation<T>)>,
}

impl<T> SchedulerState<T> {
    fn new(operations: Vec<EndpointOperation<T>>) -> Self {
        Self {
            load_by_endpoint: HashMap::new(),
            remaining: operations.into_iter().enumerate().collect(),
        }
    }

    fn load(&self, endpoint: &str) -> usize {
        self.load_by_endpoint.get(endpoint).copied().unwrap_or(0)
    }

    fn pair_load(&self, op: &EndpointOperation<T>) -> usize {
        self.load(&op.from) + self.load(&op.to)
    }

    fn acquire(&mut self, endpoint: &str) {
        *self.load_by_endpoint.entry(endpoint.to_string()).or_default() += 1;
    }

    fn release(&mut self, endpoint: &str) {
        if let Some(load) = self.load_by_endpoint.get_mut(endpoint) {
            *load = load.saturating_sub(1);
        }
    }

    /// Remove the least loaded operation and charge its endpoints
    fn take_next(&mut self) -> Option<(usize, EndpointOperation<T>)> {
        let position = self
            .remaining
            .iter()
            .enumerate()
            .min_by(|(_, (index_a, a)), (_, (index_b, b))| {
                self.pair_load(a)
                    .cmp(&self.pair_load(b))
                    .then_with(|| a.from.cmp(&b.from))
                    .then_with(|| a.to.cmp(&b.to))
                    .then_with(|| index_a.cmp(index_b))
            })
            .map(|(position, _)| position)?;

        let (index, op) = self.remaining.swap_remove(position);
        self.acquire(&op.from);
        self.acquire(&op.to);
        Some((index, op))
    }
}

/// Releases both endpoint counters when dropped, whatever way the
/// operation ended
struct EndpointLease<'a, T> {
    state: &'a Mutex<SchedulerState<T>>,
    from: String,
    to: String,
}

impl<T> Drop for EndpointLease<'_, T> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.release(&self.from);
        state.release(&self.to);
    }
}

fn take_next<T>(state: &Mutex<SchedulerState<T>>) -> Option<(usize, T, EndpointLease<'_, T>)> {
    let (index, op) = state.lock().take_next()?;
    let lease = EndpointLease {
        state,
        from: op.from,
        to: op.to,
    };
    Some((index, op.payload, lease))
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct ParallelEndpointProcessor;

impl ParallelEndpointProcessor {
    /// Run `work` over every operation with at most `max_parallelism` in flight.
    ///
    /// Returns one result per operation, in input order. A failing or
    /// panicking operation does not stop the others. Once `cancel` fires no
    /// new operation starts; those never started report
    /// [`BobError::Cancelled`].
    #[instrument(skip(operations, work, cancel), fields(operations = operations.len()))]
    pub async fn invoke<T, R, F, Fut>(
        max_parallelism: usize,
        operations: Vec<EndpointOperation<T>>,
        work: F,
        cancel: &CancellationToken,
    ) -> Vec<Result<R>>
    where
        F: Fn(T, CancellationToken) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let total = operations.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = max_parallelism.max(1).min(total);
        let state = Mutex::new(SchedulerState::new(operations));

        debug!(workers, total, "Starting endpoint-balanced processing");

        let worker_results = join_all((0..workers).map(|worker| {
            let state = &state;
            let work = &work;
            async move {
                let mut finished = Vec::new();

                while !cancel.is_cancelled() {
                    let Some((index, payload, lease)) = take_next(state) else {
                        break;
                    };

                    debug!(worker, index, from = %lease.from, to = %lease.to, "Operation started");

                    let result = match AssertUnwindSafe(work(payload, cancel.clone()))
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(panic) => {
                            let message = panic_message(panic);
                            warn!(worker, index, panic = %message, "Operation panicked");
                            Err(BobError::Operation(format!("operation panicked: {}", message)))
                        }
                    };

                    drop(lease);
                    finished.push((index, result));
                }

                finished
            }
        }))
        .await;

        let mut results: Vec<Option<Result<R>>> = (0..total).map(|_| None).collect();
        for (index, result) in worker_results.into_iter().flatten() {
            results[index] = Some(result);
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or(Err(BobError::Cancelled)))
            .collect()
    }
}
