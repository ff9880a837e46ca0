use crate::crawl::cancel::CancellationController;
use std::ops::Range;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Shape of the randomized pause before each request, in seconds
#[derive(Debug, Clone, PartialEq)]
pub struct DelayPolicy {
    /// Probability of taking a long pause instead of a short one
    pub long_pause_chance: f64,
    pub short_pause: Range<f64>,
    pub long_pause: Range<f64>,
    /// Upper bound of the extra noise added to either pause
    pub max_jitter: f64,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            long_pause_chance: 0.1,
            short_pause: 2.0..7.0,
            long_pause: 8.0..15.0,
            max_jitter: 0.5,
        }
    }
}

impl DelayPolicy {
    /// No pauses at all. Used when replaying against local fixtures.
    pub fn none() -> Self {
        Self {
            long_pause_chance: 0.0,
            short_pause: 0.0..0.0,
            long_pause: 0.0..0.0,
            max_jitter: 0.0,
        }
    }

    fn draw(&self, rng: &mut fastrand::Rng) -> Duration {
        let range = if rng.f64() < self.long_pause_chance {
            &self.long_pause
        } else {
            &self.short_pause
        };
        let base = range.start + rng.f64() * (range.end - range.start);
        let jitter = rng.f64() * self.max_jitter;
        Duration::from_secs_f64(base + jitter)
    }
}

/// Human-paced waits between requests that give way to a stop request
pub struct PoliteDelayScheduler {
    policy: DelayPolicy,
    rng: Mutex<fastrand::Rng>,
    cancel: CancellationController,
}

impl PoliteDelayScheduler {
    pub fn new(policy: DelayPolicy, cancel: CancellationController) -> Self {
        Self::with_rng(policy, cancel, fastrand::Rng::new())
    }

    pub fn with_rng(policy: DelayPolicy, cancel: CancellationController, rng: fastrand::Rng) -> Self {
        Self {
            policy,
            rng: Mutex::new(rng),
            cancel,
        }
    }

    /// Draw the next pause length without waiting
    pub fn next_pause(&self) -> Duration {
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.policy.draw(&mut rng)
    }

    /// Sleep for a randomized pause, returning early if a stop is requested
    pub async fn delay(&self) {
        let pause = self.next_pause();
        if pause.is_zero() {
            return;
        }

        debug!("Waiting {:.2}s before next request", pause.as_secs_f64());
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = self.cancel.stopped() => {
                debug!("Delay interrupted by stop request");
            }
        }
    }
}
