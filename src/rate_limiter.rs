//! Request pacing for the Deezer and Last.fm clients.
//!
//! [`Pacer`] is the seam the crawl loop and the playlist sync talk to;
//! [`RateLimiter`] is the production implementation with adaptive backoff.

use log::{debug, info};
use std::thread;
use std::time::{Duration, Instant};

/// Something that spaces out outbound requests.
pub trait Pacer {
    /// Called before every request.  Blocks until the next request is allowed.
    fn wait(&mut self);

    /// Fixed pause, independent of the per-request interval (write delays,
    /// cooldowns between playlist chunks).
    fn pause(&mut self, duration: Duration, reason: &str) {
        if duration.is_zero() {
            return;
        }
        info!("{}: pausing {:.1}s", reason, duration.as_secs_f64());
        thread::sleep(duration);
    }

    fn report_success(&mut self) {}

    fn report_failure(&mut self) {}
}

/// Enforces a minimum interval between requests, doubling it on failures
/// and halving it back after a run of successes.
pub struct RateLimiter {
    name: String,
    last_request: Option<Instant>,
    current_interval: Duration,
    base_interval: Duration,
    max_interval: Duration,
    success_count: u32,
    successes_to_reduce: u32,
}

impl RateLimiter {
    /// * `name` — label for log messages (e.g. "Deezer", "Last.fm")
    /// * `base_interval` — minimum time between requests
    /// * `max_interval` — upper bound after repeated failures
    /// * `successes_to_reduce` — consecutive successes before halving the
    ///   interval (0 disables the reduction)
    pub fn new(
        name: &str,
        base_interval: Duration,
        max_interval: Duration,
        successes_to_reduce: u32,
    ) -> Self {
        RateLimiter {
            name: name.to_string(),
            last_request: None,
            current_interval: base_interval,
            base_interval,
            max_interval,
            success_count: 0,
            successes_to_reduce,
        }
    }

    /// Max interval = 16× base, reduce after 10 successes.
    pub fn from_millis(name: &str, millis: u64) -> Self {
        let base = Duration::from_millis(millis);
        Self::new(name, base, base * 16, 10)
    }

    /// A limiter that never sleeps.  Backoff still applies once a failure
    /// is reported, capped at one second.
    pub fn unthrottled(name: &str) -> Self {
        Self::new(name, Duration::ZERO, Duration::from_secs(1), 10)
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Sleep if not enough time has elapsed since the last request.
    pub fn wait_if_needed(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.current_interval {
                let wait_time = self.current_interval - elapsed;
                debug!(
                    "[{}] rate limiting: waiting {:.2}s",
                    self.name,
                    wait_time.as_secs_f64()
                );
                thread::sleep(wait_time);
            }
        }
        self.last_request = Some(Instant::now());
    }

    fn record_success(&mut self) {
        if self.successes_to_reduce == 0 {
            return;
        }

        self.success_count += 1;

        if self.success_count >= self.successes_to_reduce
            && self.current_interval > self.base_interval
        {
            self.current_interval = (self.current_interval / 2).max(self.base_interval);
            info!(
                "[{}] rate limit reduced to {:.1}s after {} successes",
                self.name,
                self.current_interval.as_secs_f64(),
                self.success_count
            );
            self.success_count = 0;
        }
    }

    fn record_failure(&mut self) {
        let doubled = if self.current_interval.is_zero() {
            Duration::from_millis(100)
        } else {
            self.current_interval * 2
        };
        self.current_interval = doubled.min(self.max_interval);
        info!(
            "[{}] rate limit increased to {:.1}s due to error",
            self.name,
            self.current_interval.as_secs_f64()
        );
        self.success_count = 0;
    }
}

impl Pacer for RateLimiter {
    fn wait(&mut self) {
        self.wait_if_needed();
    }

    fn report_success(&mut self) {
        self.record_success();
    }

    fn report_failure(&mut self) {
        self.record_failure();
    }
}

/// Pacer with no per-request interval; only honours explicit pauses.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedPause;

impl Pacer for FixedPause {
    fn wait(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_doubles_up_to_max() {
        let mut rl = RateLimiter::new(
            "test",
            Duration::from_millis(100),
            Duration::from_millis(300),
            2,
        );
        rl.report_failure();
        assert_eq!(rl.current_interval(), Duration::from_millis(200));
        rl.report_failure();
        assert_eq!(rl.current_interval(), Duration::from_millis(300));
    }

    #[test]
    fn test_successes_reduce_to_base() {
        let mut rl = RateLimiter::new(
            "test",
            Duration::from_millis(100),
            Duration::from_millis(1600),
            2,
        );
        rl.report_failure();
        rl.report_failure();
        assert_eq!(rl.current_interval(), Duration::from_millis(400));

        rl.report_success();
        rl.report_success();
        assert_eq!(rl.current_interval(), Duration::from_millis(200));
        rl.report_success();
        rl.report_success();
        assert_eq!(rl.current_interval(), Duration::from_millis(100));
        rl.report_success();
        rl.report_success();
        assert_eq!(rl.current_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_unthrottled_backs_off_from_zero() {
        let mut rl = RateLimiter::unthrottled("test");
        assert_eq!(rl.current_interval(), Duration::ZERO);
        rl.report_failure();
        assert_eq!(rl.current_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_first_wait_does_not_sleep() {
        let mut rl = RateLimiter::from_millis("test", 5_000);
        let start = Instant::now();
        rl.wait();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
