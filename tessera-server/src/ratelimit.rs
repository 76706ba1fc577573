//! Admission-control rate limiting for agent-facing calls.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as Governor,
};
use tonic::Status;

/// The rate-limiting capability; each call states its cost.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn rate_limit(&self, count: u32) -> Result<(), Status>;
}

/// Token-bucket limiter on `governor`.
pub struct GovernorRateLimiter {
    limiter: Arc<Governor<NotKeyed, InMemoryState, DefaultClock>>,
}

impl GovernorRateLimiter {
    /// * `per_second` - sustained rate
    /// * `burst_size` - maximum burst
    pub fn new(per_second: u32, burst_size: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::new(2).unwrap());
        let burst_size = NonZeroU32::new(burst_size).unwrap_or(NonZeroU32::new(10).unwrap());

        let quota = Quota::per_second(per_second).allow_burst(burst_size);

        Self {
            limiter: Arc::new(Governor::direct(quota)),
        }
    }
}

impl Default for GovernorRateLimiter {
    fn default() -> Self {
        Self::new(2, 10)
    }
}

impl Clone for GovernorRateLimiter {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
        }
    }
}

#[async_trait]
impl RateLimiter for GovernorRateLimiter {
    async fn rate_limit(&self, count: u32) -> Result<(), Status> {
        let Some(count) = NonZeroU32::new(count) else {
            return Ok(());
        };
        match self.limiter.check_n(count) {
            Ok(Ok(())) => Ok(()),
            _ => {
                tracing::warn!("Rate limit exceeded");
                Err(Status::resource_exhausted(
                    "rate limit exceeded, please try again later",
                ))
            }
        }
    }
}
