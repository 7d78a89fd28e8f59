//! Bounded-frequency execution of a sync function
//!
//! Requests coalesce: any number of [`BoundedFrequencyRunner::run`] calls
//! made while a run is pending result in one execution. Executions are
//! spaced by a token bucket (one token per `min_interval`, `burst` tokens
//! deep) and forced at least every `max_interval`.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub struct BoundedFrequencyRunner {
    name: String,
    min_interval: Duration,
    max_interval: Duration,
    limiter: Option<DefaultDirectRateLimiter>,
    /// Set by `run`, cleared right before each execution
    pending: AtomicBool,
    trigger: Notify,
}

impl BoundedFrequencyRunner {
    /// A zero `min_interval` disables throttling; a zero `burst` counts as one.
    pub fn new(
        name: impl Into<String>,
        min_interval: Duration,
        max_interval: Duration,
        burst: u32,
    ) -> Self {
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let limiter = Quota::with_period(min_interval)
            .map(|quota| RateLimiter::direct(quota.allow_burst(burst)));
        Self {
            name: name.into(),
            min_interval,
            max_interval,
            limiter,
            pending: AtomicBool::new(false),
            trigger: Notify::new(),
        }
    }

    /// Request a run. Never blocks.
    pub fn run(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.trigger.notify_one();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive `f` until `cancel` fires.
    pub async fn loop_until<F, Fut>(&self, cancel: &CancellationToken, mut f: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        debug!(
            runner = %self.name,
            min_interval = ?self.min_interval,
            max_interval = ?self.max_interval,
            "starting bounded frequency runner"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.trigger.notified() => {
                    // a permit left over from requests the last run already served
                    if !self.pending.load(Ordering::SeqCst) {
                        continue;
                    }
                    trace!(runner = %self.name, "run requested")
                }
                _ = tokio::time::sleep(self.max_interval) => {
                    trace!(runner = %self.name, "max interval elapsed")
                }
            }

            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = limiter.until_ready() => {}
                }
            }

            self.pending.store(false, Ordering::SeqCst);
            f().await;
        }

        debug!(runner = %self.name, "bounded frequency runner stopped");
    }
}
