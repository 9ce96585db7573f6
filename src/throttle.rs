//! Politeness delays before network fetches and generation calls
//!
//! Delays are sampled uniformly and independently for every call. They are
//! serialization points, not a rate limiter.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

/// Inclusive `[min, max]` delay interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn from_secs(min: f64, max: f64) -> Self {
        Self {
            min: Duration::from_secs_f64(min),
            max: Duration::from_secs_f64(max),
        }
    }

    pub fn zero() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Draw a delay uniformly from the interval
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rng.gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        // f64 rounding can land just past the largest representable Duration
        Duration::try_from_secs_f64(secs).unwrap_or(self.max)
    }
}

/// Delay strategy injected into the fetcher and summarizer
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Wait for a duration drawn from `range`. `purpose` is only used for logging.
    async fn pause(&self, range: DelayRange, purpose: &str);
}

/// Samples from the range and sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDelay;

#[async_trait]
impl Throttle for RandomDelay {
    async fn pause(&self, range: DelayRange, purpose: &str) {
        let delay = range.sample(&mut rand::thread_rng());
        tracing::debug!("Waiting {:.1}s before {}", delay.as_secs_f64(), purpose);
        tokio::time::sleep(delay).await;
    }
}

/// Never waits
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

#[async_trait]
impl Throttle for NoDelay {
    async fn pause(&self, _range: DelayRange, _purpose: &str) {}
}
