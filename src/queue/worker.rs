//! Per-queue concurrency and rate limiting (spec §4.6, §5).

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};
use tokio::sync::Semaphore;

use super::job::QueueName;

type DefaultRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

/// Gates one queue's execution: at most 2 concurrent jobs (spec §5), and
/// — where the queue defines one — a rolling rate limit on job starts.
pub struct QueueGate {
    pub name: QueueName,
    concurrency: Arc<Semaphore>,
    rate_limiter: Option<DefaultRateLimiter>,
}

impl QueueGate {
    pub fn new(name: QueueName) -> Self {
        let rate_limiter = name.rate_limit_per_minute().map(|per_minute| {
            let quota = Quota::per_minute(
                NonZeroU32::new(per_minute).expect("queue rate limits are always non-zero"),
            );
            RateLimiter::direct(quota)
        });
        Self {
            name,
            concurrency: Arc::new(Semaphore::new(2)),
            rate_limiter,
        }
    }

    /// Waits until both a concurrency slot and the rate limit admit one
    /// more job, then returns a permit that releases the slot on drop.
    pub async fn acquire(&self) -> tokio::sync::OwnedSemaphorePermit {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }
        self.concurrency
            .clone()
            .acquire_owned()
            .await
            .expect("queue semaphore is never closed")
    }
}
