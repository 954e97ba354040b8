//! Controller configuration

use crate::backoff::RetryStrategy;
use pgrole_core::{Error, Result};
use std::time::Duration;

/// Timing and concurrency of reconciliation
///
/// # Examples
///
/// ```
/// use pgrole_engine::{ControllerConfig, RetryStrategy};
/// use std::time::Duration;
///
/// let config = ControllerConfig::new()
///     .with_resync_interval(Duration::from_secs(60))
///     .with_retry_strategy(RetryStrategy::FixedDelay { delay: Duration::from_secs(2) });
/// assert_eq!(config.reconcile_timeout, Duration::from_secs(30));
/// assert!(config.validate().is_ok());
/// ```
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ControllerConfig {
	/// Upper bound of one pass, exceeded passes fail as a connection failure
	pub reconcile_timeout: Duration,
	/// Delay before a healthy resource is looked at again
	pub resync_interval: Duration,
	pub retry_strategy: RetryStrategy,
	/// Passes running at the same time across all resources
	pub max_concurrent_reconciles: usize,
}

impl Default for ControllerConfig {
	fn default() -> Self {
		Self {
			reconcile_timeout: Duration::from_secs(30),
			resync_interval: Duration::from_secs(300),
			retry_strategy: RetryStrategy::default(),
			max_concurrent_reconciles: 8,
		}
	}
}

impl ControllerConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
		self.reconcile_timeout = timeout;
		self
	}

	pub fn with_resync_interval(mut self, interval: Duration) -> Self {
		self.resync_interval = interval;
		self
	}

	pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
		self.retry_strategy = strategy;
		self
	}

	pub fn with_max_concurrent_reconciles(mut self, max: usize) -> Self {
		self.max_concurrent_reconciles = max;
		self
	}

	pub fn validate(&self) -> Result<()> {
		let mut problems = Vec::new();
		if self.reconcile_timeout.is_zero() {
			problems.push("reconcile_timeout must be non-zero");
		}
		if self.resync_interval.is_zero() {
			problems.push("resync_interval must be non-zero");
		}
		if self.max_concurrent_reconciles == 0 {
			problems.push("max_concurrent_reconciles must be at least 1");
		}
		if let RetryStrategy::ExponentialBackoff {
			initial_delay,
			max_delay,
		} = self.retry_strategy
		{
			if initial_delay > max_delay {
				problems.push("retry initial_delay must not exceed max_delay");
			}
		}

		if problems.is_empty() {
			Ok(())
		} else {
			Err(Error::validation(problems.join("; ")))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_defaults() {
		let config = ControllerConfig::default();
		assert_eq!(config.resync_interval, Duration::from_secs(300));
		assert_eq!(config.max_concurrent_reconciles, 8);
		assert_eq!(
			config.retry_strategy,
			RetryStrategy::ExponentialBackoff {
				initial_delay: Duration::from_secs(5),
				max_delay: Duration::from_secs(300),
			}
		);
	}

	#[rstest]
	fn test_validate_reports_every_problem() {
		let config = ControllerConfig::new()
			.with_reconcile_timeout(Duration::ZERO)
			.with_max_concurrent_reconciles(0)
			.with_retry_strategy(RetryStrategy::ExponentialBackoff {
				initial_delay: Duration::from_secs(10),
				max_delay: Duration::from_secs(1),
			});
		let message = config.validate().unwrap_err().to_string();
		assert!(message.contains("reconcile_timeout"));
		assert!(message.contains("max_concurrent_reconciles"));
		assert!(message.contains("initial_delay"));
		assert!(!message.contains("resync_interval"));
	}
}
