//! Redacted secret values

use std::fmt;

/// A string whose contents never appear in `Debug` or `Display` output
///
/// # Examples
///
/// ```
/// use pgrole_core::SecretString;
///
/// let secret = SecretString::new("hunter2");
/// assert_eq!(secret.expose_secret(), "hunter2");
/// assert_eq!(format!("{:?}", secret), "SecretString(***)");
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Access the underlying value
	pub fn expose_secret(&self) -> &str {
		&self.0
	}

	/// True when the value is empty or whitespace only
	pub fn is_blank(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(***)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("***")
	}
}

impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl From<&str> for SecretString {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}
