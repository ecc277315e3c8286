//! Debounced flush scheduling.

use std::time::Duration;

use web_time::Instant;

/// Tracks when the next flush is due.
///
/// Each request pushes the deadline to `now + debounce`, so a burst of
/// writes results in one flush after the burst goes quiet. A zero debounce
/// makes the flush due on the next tick.
#[derive(Debug, Clone)]
pub struct FlushScheduler {
	debounce: Duration,
	due_at: Option<Instant>,
}

impl FlushScheduler {
	/// Creates an idle scheduler.
	pub fn new(debounce: Duration) -> Self {
		Self {
			debounce,
			due_at: None,
		}
	}

	/// Requests a flush, restarting the quiet window.
	pub fn schedule(&mut self, now: Instant) {
		self.due_at = Some(now + self.debounce);
	}

	/// Drops the pending request.
	pub fn cancel(&mut self) {
		self.due_at = None;
	}

	/// Whether a flush has been requested.
	pub fn is_scheduled(&self) -> bool {
		self.due_at.is_some()
	}

	/// Whether the requested flush should run at `now`.
	pub fn is_due(&self, now: Instant) -> bool {
		self.due_at.is_some_and(|due| now >= due)
	}

	/// Deadline of the pending request.
	pub fn due_at(&self) -> Option<Instant> {
		self.due_at
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_burst_restarts_window() {
		let mut scheduler = FlushScheduler::new(Duration::from_millis(16));
		let start = Instant::now();
		scheduler.schedule(start);
		scheduler.schedule(start + Duration::from_millis(10));
		assert!(!scheduler.is_due(start + Duration::from_millis(16)));
		assert!(scheduler.is_due(start + Duration::from_millis(26)));
		scheduler.cancel();
		assert!(!scheduler.is_scheduled());
	}

	#[rstest]
	fn test_zero_debounce_is_due_immediately() {
		let mut scheduler = FlushScheduler::new(Duration::ZERO);
		let now = Instant::now();
		scheduler.schedule(now);
		assert!(scheduler.is_due(now));
	}
}
