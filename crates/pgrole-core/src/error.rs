//! Error taxonomy
//!
//! Every layer reports failures with one of four kinds. Lower layers pick the
//! kind; only the controller decides what the kind means for retry cadence and
//! status.

use crate::condition::Reason;

/// Failure of one reconciliation step, scoped to a single resource
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	/// Missing or malformed fields in a spec or a referenced secret.
	///
	/// Terminal until the spec or secret changes; never retried on a backoff timer.
	#[error("Validation failed: {0}")]
	Validation(String),

	/// Network, authentication, timeout or cancellation while talking to the database
	#[error("Connection failed: {0}")]
	ConnectionFailed(String),

	/// A referenced platform object (e.g. a secret) could not be located
	#[error("Resource not found: {0}")]
	ResourceNotFound(String),

	/// A specific statement was rejected by the database
	#[error("Execution failed: {0}")]
	Execution(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
	pub fn validation(message: impl Into<String>) -> Self {
		Self::Validation(message.into())
	}

	pub fn connection(message: impl Into<String>) -> Self {
		Self::ConnectionFailed(message.into())
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		Self::ResourceNotFound(message.into())
	}

	pub fn execution(message: impl Into<String>) -> Self {
		Self::Execution(message.into())
	}

	/// Machine-readable condition reason for this error
	///
	/// # Examples
	///
	/// ```
	/// use pgrole_core::{Error, Reason};
	///
	/// let err = Error::connection("timed out");
	/// assert_eq!(err.reason(), Reason::ConnectionFailed);
	/// ```
	pub fn reason(&self) -> Reason {
		match self {
			Self::Validation(_) => Reason::ValidationFailed,
			Self::ConnectionFailed(_) => Reason::ConnectionFailed,
			Self::ResourceNotFound(_) => Reason::ResourceNotFound,
			Self::Execution(_) => Reason::ExecutionFailed,
		}
	}

	/// Message without the kind prefix
	pub fn message(&self) -> &str {
		match self {
			Self::Validation(message)
			| Self::ConnectionFailed(message)
			| Self::ResourceNotFound(message)
			| Self::Execution(message) => message,
		}
	}

	/// Whether the controller should retry this error with backoff
	pub fn is_retryable(&self) -> bool {
		!matches!(self, Self::Validation(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(Error::validation("x"), Reason::ValidationFailed, false)]
	#[case(Error::connection("x"), Reason::ConnectionFailed, true)]
	#[case(Error::not_found("x"), Reason::ResourceNotFound, true)]
	#[case(Error::execution("x"), Reason::ExecutionFailed, true)]
	fn test_error_classification(
		#[case] error: Error,
		#[case] reason: Reason,
		#[case] retryable: bool,
	) {
		assert_eq!(error.reason(), reason);
		assert_eq!(error.is_retryable(), retryable);
	}

	#[rstest]
	fn test_error_display_keeps_message() {
		let err = Error::execution("role \"app\" cannot be dropped (SQLSTATE 2BP01)");
		assert_eq!(
			err.to_string(),
			"Execution failed: role \"app\" cannot be dropped (SQLSTATE 2BP01)"
		);
	}
}
