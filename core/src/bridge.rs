//! Submit, poll with backoff, give up at a deadline.
//!
//! # Design
//! The engine has no completion notification, so a request is driven by
//! polling its handle from the async task that submitted it:
//!
//! ```text
//! Submitted -> Polling -> Ready | TimedOut | Failed
//!                 ^   |
//!                 +---+  (not ready: wait, poll again)
//! ```
//!
//! The only suspension point is [`WaitStrategy::wait`] between polls. Encode,
//! submit, poll and decode never suspend.
//!
//! The deadline is checked before every poll against a monotonic clock.
//! When it passes, the handle is dropped unconsumed. There is no way to
//! cancel engine-side work, so the engine may keep the finished result for
//! that handle forever: a timed-out request is a known leak path.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::codec::{EncodedPayload, EncodedResult};
use crate::engine::{Completion, Gateway};
use crate::error::{Error, Result};

/// Checks answered by yielding to the scheduler with no delay.
pub const YIELD_CHECKS: u32 = 100;
/// Checks answered with [`SHORT_BACKOFF`] before switching to [`LONG_BACKOFF`].
pub const SHORT_BACKOFF_CHECKS: u32 = 1000;
pub const SHORT_BACKOFF: Duration = Duration::from_micros(100);
pub const LONG_BACKOFF: Duration = Duration::from_millis(1);

/// Shortest delay handed to the timer; anything below is yielded out.
const TIMER_RESOLUTION: Duration = Duration::from_millis(1);

/// Default client-side deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Submitted,
    Polling,
    Ready,
    TimedOut,
    Failed,
}

/// How to wait between polls.
///
/// Polling is the only strategy today; a notification-driven completion
/// would slot in here as another variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStrategy {
    /// Yield for the first 100 checks, sleep 100µs up to check 1000, then
    /// 1ms. Keeps latency low for fast responses and bounds CPU burn on slow
    /// ones.
    #[default]
    Adaptive,
    /// Sleep the same interval after every check.
    Fixed(Duration),
}

impl WaitStrategy {
    /// Zero means "unspecified" and selects the adaptive schedule.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            WaitStrategy::Adaptive
        } else {
            WaitStrategy::Fixed(interval)
        }
    }

    /// Delay after the `check`-th unsuccessful poll (0-based). `None` means
    /// yield without sleeping.
    pub fn delay(&self, check: u32) -> Option<Duration> {
        match self {
            WaitStrategy::Fixed(interval) => Some(*interval),
            WaitStrategy::Adaptive if check < YIELD_CHECKS => None,
            WaitStrategy::Adaptive if check < SHORT_BACKOFF_CHECKS => Some(SHORT_BACKOFF),
            WaitStrategy::Adaptive => Some(LONG_BACKOFF),
        }
    }

    /// Longest single wait this strategy can produce.
    pub fn max_delay(&self) -> Duration {
        match self {
            WaitStrategy::Fixed(interval) => *interval,
            WaitStrategy::Adaptive => LONG_BACKOFF,
        }
    }

    /// Suspend until the next poll is due.
    ///
    /// The timer wheel has millisecond resolution, so shorter delays spin on
    /// `yield_now` against the clock instead of sleeping.
    pub async fn wait(&self, check: u32) {
        match self.delay(check) {
            None => tokio::task::yield_now().await,
            Some(delay) if delay < TIMER_RESOLUTION => {
                let due = Instant::now() + delay;
                loop {
                    tokio::task::yield_now().await;
                    if Instant::now() >= due {
                        break;
                    }
                }
            }
            Some(delay) => tokio::time::sleep(delay).await,
        }
    }
}

/// Polling parameters for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub wait: WaitStrategy,
    pub timeout: Duration,
}

impl PollConfig {
    /// A zero `poll_interval` selects [`WaitStrategy::Adaptive`].
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            wait: WaitStrategy::from_interval(poll_interval),
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_wait(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            wait: WaitStrategy::Adaptive,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Drive one payload from submission to its encoded result.
pub async fn bridge(gateway: &Gateway, payload: &EncodedPayload, config: PollConfig) -> Result<EncodedResult> {
    let started = Instant::now();
    let mut handle = match gateway.submit(payload) {
        Ok(handle) => handle,
        Err(e) => {
            debug!(state = ?BridgeState::Failed, error = %e, "submission failed");
            return Err(e);
        }
    };
    let id = handle.get();
    trace!(handle = id, state = ?BridgeState::Submitted, "handle issued");

    let mut checks: u32 = 0;
    loop {
        let elapsed = started.elapsed();
        if elapsed > config.timeout {
            warn!(
                handle = id,
                state = ?BridgeState::TimedOut,
                ?elapsed,
                checks,
                "poll deadline passed; abandoning handle, engine-side result may never be released"
            );
            return Err(Error::Timeout { handle: id, elapsed });
        }

        match gateway.poll(handle) {
            Ok(Completion::Ready(result)) => {
                debug!(handle = id, state = ?BridgeState::Ready, checks, ?elapsed, "request completed");
                return Ok(result);
            }
            Ok(Completion::Pending(pending)) => handle = pending,
            Err(e) => {
                debug!(handle = id, state = ?BridgeState::Failed, error = %e, "poll failed");
                return Err(e);
            }
        }

        if checks == 0 || checks == YIELD_CHECKS || checks == SHORT_BACKOFF_CHECKS {
            trace!(handle = id, state = ?BridgeState::Polling, checks, delay = ?config.wait.delay(checks), "backoff tier");
        }
        config.wait.wait(checks).await;
        checks = checks.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_schedule_tiers() {
        let wait = WaitStrategy::Adaptive;
        assert_eq!(wait.delay(0), None);
        assert_eq!(wait.delay(99), None);
        assert_eq!(wait.delay(100), Some(SHORT_BACKOFF));
        assert_eq!(wait.delay(999), Some(SHORT_BACKOFF));
        assert_eq!(wait.delay(1000), Some(LONG_BACKOFF));
        assert_eq!(wait.delay(u32::MAX), Some(LONG_BACKOFF));
    }

    #[test]
    fn fixed_interval_is_constant() {
        let wait = WaitStrategy::Fixed(Duration::from_millis(7));
        assert_eq!(wait.delay(0), Some(Duration::from_millis(7)));
        assert_eq!(wait.delay(5000), Some(Duration::from_millis(7)));
        assert_eq!(wait.max_delay(), Duration::from_millis(7));
    }

    #[test]
    fn zero_interval_means_adaptive() {
        assert_eq!(WaitStrategy::from_interval(Duration::ZERO), WaitStrategy::Adaptive);
        let cfg = PollConfig::new(Duration::from_millis(2), Duration::from_secs(1));
        assert_eq!(cfg.wait, WaitStrategy::Fixed(Duration::from_millis(2)));
        assert_eq!(cfg.timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn sub_millisecond_wait_is_not_rounded_up_to_the_timer_tick() {
        let wait = WaitStrategy::Fixed(Duration::from_micros(100));
        let started = Instant::now();
        for check in 0..50 {
            wait.wait(check).await;
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(5), "elapsed: {elapsed:?}");
        // Fifty timer sleeps would take at least 50ms.
        assert!(elapsed < Duration::from_millis(40), "elapsed: {elapsed:?}");
    }

    #[test]
    fn default_config() {
        let cfg = PollConfig::default();
        assert_eq!(cfg.wait, WaitStrategy::Adaptive);
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);
        assert_eq!(cfg.with_timeout(Duration::from_secs(2)).timeout, Duration::from_secs(2));
    }
}
