#![forbid(unsafe_code)]

use std::time::Duration;

use tokio::time::Instant;

/// Fixed-delay, bounded reconnect schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
	pub delay: Duration,
	pub max_attempts: u32,
}

impl ReconnectPolicy {
	pub fn new(delay: Duration, max_attempts: u32) -> Self {
		Self { delay, max_attempts }
	}

	/// Deadline and delay (ms) for `attempt` (1-based), or `None` once attempts are exhausted.
	pub fn schedule(&self, attempt: u32) -> Option<(Instant, u64)> {
		if attempt == 0 || attempt > self.max_attempts {
			return None;
		}
		let ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX);
		Some((Instant::now() + self.delay, ms))
	}
}
