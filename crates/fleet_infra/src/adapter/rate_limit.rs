//! Per-adapter token bucket and exponential backoff, shared across all
//! calls a single adapter instance makes. One instance of this type is
//! owned by each concrete adapter; it is never shared across providers.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(consecutive_failures as i32);
        Duration::from_secs_f64(secs).min(self.max_delay)
    }
}

#[derive(Debug, Default)]
struct State {
    tokens: f64,
    last_refill: Option<Instant>,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

/// A token bucket (steady-state rate limiting) fused with exponential
/// backoff (reactive throttling after 429/5xx). Calls go through
/// [`RateLimiter::acquire`] before the adapter issues its HTTP request, and
/// report back via [`RateLimiter::record_success`] /
/// [`RateLimiter::record_failure`].
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    backoff: BackoffConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(capacity: f64, refill_per_sec: f64, backoff: BackoffConfig) -> Self {
        Self {
            capacity,
            refill_per_sec,
            backoff,
            state: Mutex::new(State {
                tokens: capacity,
                last_refill: None,
                consecutive_failures: 0,
                cooldown_until: None,
            }),
        }
    }

    /// Block until a token is available and any active backoff cooldown has
    /// elapsed.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);

                if let Some(until) = state.cooldown_until {
                    let now = Instant::now();
                    if now < until {
                        Some(until - now)
                    } else {
                        state.cooldown_until = None;
                        None
                    }
                } else if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };

            match wait {
                Some(duration) => sleep(duration).await,
                None => return,
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
        state.cooldown_until = None;
    }

    /// Record a 429/5xx and enter (or extend) the backoff cooldown.
    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;
        let delay = self.backoff.delay_for(state.consecutive_failures);
        state.cooldown_until = Some(Instant::now() + delay);
    }

    fn refill(&self, state: &mut State) {
        let now = Instant::now();
        if let Some(last) = state.last_refill {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        }
        state.last_refill = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = BackoffConfig::default();
        let first = config.delay_for(0);
        let second = config.delay_for(1);
        assert!(second > first);
        assert!(config.delay_for(20) <= config.max_delay);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn acquire_does_not_block_with_tokens_available() {
        let limiter = RateLimiter::new(5.0, 5.0, BackoffConfig::default());
        limiter.acquire().await;
        limiter.acquire().await;
    }
}
