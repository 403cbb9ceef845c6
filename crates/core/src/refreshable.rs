//! Interval-gated asynchronously refreshed value.
//!
//! A [`Refreshable`] holds the latest value of one data source together with
//! the time of its last successful refresh. Callers poll [`Refreshable::needs_update`]
//! and call [`Refreshable::update`] when it returns true; at most one refresh
//! runs at a time and the busy flag is released on every exit path.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::retry::RetryPolicy;

type RefreshFn<T> = Box<dyn Fn(Option<Arc<T>>) -> BoxFuture<'static, Result<T>> + Send + Sync>;

struct State<T> {
    value: Option<Arc<T>>,
    /// Start of the last successful refresh
    last_refresh: Option<Instant>,
    busy: bool,
    /// Bumped by every reseed
    generation: u64,
}

/// Clears the busy flag when the refresh completes or is dropped.
struct BusyGuard<'a, T> {
    state: &'a Mutex<State<T>>,
}

impl<T> Drop for BusyGuard<'_, T> {
    fn drop(&mut self) {
        self.state.lock().busy = false;
    }
}

/// Cached value refreshed on a fixed interval.
pub struct Refreshable<T> {
    name: &'static str,
    interval: Duration,
    retry: RetryPolicy,
    refresh: RefreshFn<T>,
    state: Mutex<State<T>>,
}

impl<T: Send + Sync + 'static> Refreshable<T> {
    /// Create an empty cache. `refresh` receives the previous value
    /// (`None` on the first call).
    pub fn new<F, Fut>(name: &'static str, interval: Duration, refresh: F) -> Self
    where
        F: Fn(Option<Arc<T>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name,
            interval,
            retry: RetryPolicy::none(),
            refresh: Box::new(move |previous| refresh(previous).boxed()),
            state: Mutex::new(State {
                value: None,
                last_refresh: None,
                busy: false,
                generation: 0,
            }),
        }
    }

    /// Wrap each refresh in `retry`.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True when no refresh is in flight and the value is missing or older
    /// than the interval. Exactly one interval of age is not yet stale.
    pub fn needs_update(&self) -> bool {
        let state = self.state.lock();
        if state.busy {
            return false;
        }
        match state.last_refresh {
            None => true,
            Some(at) => at.elapsed() > self.interval,
        }
    }

    /// Run the refresh function and store its result.
    ///
    /// On failure the current value and timestamp are left untouched. Fails
    /// immediately if a refresh is already in flight.
    pub async fn update(&self) -> Result<Arc<T>> {
        let (previous, generation) = {
            let mut state = self.state.lock();
            if state.busy {
                anyhow::bail!("{} refresh already in flight", self.name);
            }
            state.busy = true;
            (state.value.clone(), state.generation)
        };
        let _busy = BusyGuard { state: &self.state };

        let started = Instant::now();
        let refresh = &self.refresh;
        let value = self
            .retry
            .run(self.name, || refresh(previous.clone()))
            .await
            .with_context(|| format!("failed to refresh {}", self.name))?;
        let value = Arc::new(value);

        let current = {
            let mut state = self.state.lock();
            state.last_refresh = Some(started);
            if state.generation == generation {
                state.value = Some(Arc::clone(&value));
                value
            } else {
                // Reseeded while in flight; the reseeded value wins
                debug!(cache = self.name, "Discarding refresh superseded by reseed");
                state.value.clone().unwrap_or(value)
            }
        };

        debug!(
            cache = self.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cache refreshed"
        );
        Ok(current)
    }

    /// Replace the value wholesale without touching the refresh timestamp.
    pub fn reseed(&self, value: T) {
        let mut state = self.state.lock();
        state.value = Some(Arc::new(value));
        state.generation += 1;
    }

    pub fn current_value(&self) -> Option<Arc<T>> {
        self.state.lock().value.clone()
    }

    /// Whether a refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.state.lock().busy
    }

    pub fn last_refreshed(&self) -> Option<Instant> {
        self.state.lock().last_refresh
    }
}
