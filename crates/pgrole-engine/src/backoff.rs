//! Retry cadence

use parking_lot::Mutex;
use pgrole_core::ReconcileRequest;
use std::collections::HashMap;
use std::time::Duration;

/// How the delay grows between failed passes of one resource
///
/// # Examples
///
/// ```
/// use pgrole_engine::RetryStrategy;
/// use std::time::Duration;
///
/// let strategy = RetryStrategy::ExponentialBackoff {
///     initial_delay: Duration::from_secs(5),
///     max_delay: Duration::from_secs(60),
/// };
/// assert_eq!(strategy.calculate_delay(0), Duration::from_secs(5));
/// assert_eq!(strategy.calculate_delay(2), Duration::from_secs(20));
/// assert_eq!(strategy.calculate_delay(10), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryStrategy {
	/// Retry immediately without delay
	Immediate,

	/// Retry with a fixed delay between attempts
	FixedDelay {
		/// Delay between retry attempts
		delay: Duration,
	},

	/// Retry with exponential backoff
	ExponentialBackoff {
		/// Delay after the first failure
		initial_delay: Duration,
		/// Upper bound of the delay
		max_delay: Duration,
	},
}

impl Default for RetryStrategy {
	fn default() -> Self {
		Self::ExponentialBackoff {
			initial_delay: Duration::from_secs(5),
			max_delay: Duration::from_secs(300),
		}
	}
}

impl RetryStrategy {
	/// Delay before retry number `attempt` (zero-based)
	pub fn calculate_delay(&self, attempt: u32) -> Duration {
		match self {
			RetryStrategy::Immediate => Duration::ZERO,
			RetryStrategy::FixedDelay { delay } => *delay,
			RetryStrategy::ExponentialBackoff {
				initial_delay,
				max_delay,
			} => {
				// 2^31 already exceeds any sane cap
				let factor = 2_u32.saturating_pow(attempt.min(31));
				initial_delay
					.checked_mul(factor)
					.unwrap_or(*max_delay)
					.min(*max_delay)
			}
		}
	}
}

/// Consecutive failure counters per resource
#[derive(Debug, Default)]
pub struct Backoff {
	strategy: RetryStrategy,
	attempts: Mutex<HashMap<ReconcileRequest, u32>>,
}

impl Backoff {
	pub fn new(strategy: RetryStrategy) -> Self {
		Self {
			strategy,
			attempts: Mutex::new(HashMap::new()),
		}
	}

	/// Record a failure and return the delay before the next attempt
	pub fn next_delay(&self, request: &ReconcileRequest) -> Duration {
		let mut attempts = self.attempts.lock();
		let attempt = attempts.entry(request.clone()).or_insert(0);
		let delay = self.strategy.calculate_delay(*attempt);
		*attempt = attempt.saturating_add(1);
		delay
	}

	/// Forget the failures of `request`
	pub fn reset(&self, request: &ReconcileRequest) {
		self.attempts.lock().remove(request);
	}

	/// Consecutive failures recorded for `request`
	pub fn attempts(&self, request: &ReconcileRequest) -> u32 {
		self.attempts.lock().get(request).copied().unwrap_or(0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(RetryStrategy::Immediate, 3, Duration::ZERO)]
	#[case(RetryStrategy::FixedDelay { delay: Duration::from_secs(7) }, 9, Duration::from_secs(7))]
	#[case(RetryStrategy::default(), 0, Duration::from_secs(5))]
	#[case(RetryStrategy::default(), 3, Duration::from_secs(40))]
	#[case(RetryStrategy::default(), 6, Duration::from_secs(300))]
	#[case(RetryStrategy::default(), u32::MAX, Duration::from_secs(300))]
	fn test_calculate_delay(
		#[case] strategy: RetryStrategy,
		#[case] attempt: u32,
		#[case] expected: Duration,
	) {
		assert_eq!(strategy.calculate_delay(attempt), expected);
	}

	#[rstest]
	fn test_backoff_grows_per_key_and_resets() {
		let backoff = Backoff::new(RetryStrategy::default());
		let app = ReconcileRequest::role("apps", "app");
		let other = ReconcileRequest::grant("apps", "app");

		assert_eq!(backoff.next_delay(&app), Duration::from_secs(5));
		assert_eq!(backoff.next_delay(&app), Duration::from_secs(10));
		assert_eq!(backoff.next_delay(&other), Duration::from_secs(5));
		assert_eq!(backoff.attempts(&app), 2);

		backoff.reset(&app);
		assert_eq!(backoff.attempts(&app), 0);
		assert_eq!(backoff.next_delay(&app), Duration::from_secs(5));
	}
}
