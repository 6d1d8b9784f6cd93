//! Minimum-interval rate limiter for mail provider calls
//!
//! Every outbound provider request first calls [`RateLimiter::acquire`]. The
//! limiter remembers when the previous call was released and sleeps until at
//! least `min_interval` has passed since then. The first call never waits.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Spaces provider calls at least `min_interval` apart
#[derive(Debug)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterState>>,
}

#[derive(Debug)]
struct RateLimiterState {
    min_interval: Duration,
    /// When the last permit was handed out
    last_release: Option<Instant>,
    total_operations: u64,
    total_waited: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiterState {
                min_interval,
                last_release: None,
                total_operations: 0,
                total_waited: Duration::ZERO,
            })),
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait until the next call is allowed.
    ///
    /// The lock is held across the sleep so concurrent callers are serialised
    /// in arrival order.
    pub async fn acquire(&self) -> RatePermit {
        let mut state = self.inner.lock().await;

        if let Some(last) = state.last_release {
            let elapsed = last.elapsed();
            if elapsed < state.min_interval {
                let wait = state.min_interval - elapsed;
                debug!("Rate limit: waiting {:?} before next provider call", wait);
                tokio::time::sleep(wait).await;
                state.total_waited += wait;
            } else {
                trace!("Rate limit: {:?} since last call, no wait", elapsed);
            }
        }

        state.last_release = Some(Instant::now());
        state.total_operations += 1;
        RatePermit { _private: () }
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let state = self.inner.lock().await;
        RateLimiterStats {
            min_interval: state.min_interval,
            total_operations: state.total_operations,
            total_waited: state.total_waited,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_millis(100)
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Marker returned by [`RateLimiter::acquire`]
#[derive(Debug)]
pub struct RatePermit {
    _private: (),
}

#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub min_interval: Duration,
    pub total_operations: u64,
    pub total_waited: Duration,
}
