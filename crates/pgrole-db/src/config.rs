//! Pool configuration

use pgrole_core::{ConnectionParams, Error, Result, SslMode};
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::time::Duration;

/// `application_name` reported by every administrative connection
pub const APPLICATION_NAME: &str = "pgrole";

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct PoolConfig {
	pub max_connections: u32,
	pub min_connections: u32,
	pub acquire_timeout: Duration,
	pub idle_timeout: Option<Duration>,
	pub max_lifetime: Option<Duration>,
	/// Server-side `statement_timeout` set on every connection
	pub statement_timeout: Duration,
	pub test_before_acquire: bool,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			max_connections: 4,
			min_connections: 0,
			acquire_timeout: Duration::from_secs(10),
			idle_timeout: Some(Duration::from_secs(300)),
			max_lifetime: Some(Duration::from_secs(1800)),
			statement_timeout: Duration::from_secs(30),
			test_before_acquire: true,
		}
	}
}

impl PoolConfig {
	/// Create a new pool configuration with default values
	///
	/// # Examples
	///
	/// ```rust
	/// use pgrole_db::PoolConfig;
	///
	/// let config = PoolConfig::new();
	/// assert_eq!(config.max_connections, 4);
	/// assert!(config.validate().is_ok());
	/// ```
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_max_connections(mut self, max: u32) -> Self {
		self.max_connections = max;
		self
	}

	pub fn with_min_connections(mut self, min: u32) -> Self {
		self.min_connections = min;
		self
	}

	pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
		self.acquire_timeout = timeout;
		self
	}

	pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.idle_timeout = timeout;
		self
	}

	pub fn with_max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
		self.max_lifetime = lifetime;
		self
	}

	pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
		self.statement_timeout = timeout;
		self
	}

	pub fn with_test_before_acquire(mut self, test: bool) -> Self {
		self.test_before_acquire = test;
		self
	}

	pub fn validate(&self) -> Result<()> {
		if self.max_connections == 0 {
			return Err(Error::validation("max_connections must be at least 1"));
		}
		if self.max_connections < self.min_connections {
			return Err(Error::validation(
				"max_connections must be >= min_connections",
			));
		}
		if self.statement_timeout.is_zero() {
			return Err(Error::validation("statement_timeout must be non-zero"));
		}
		Ok(())
	}

	/// Connect options for `params` with this configuration's session settings
	///
	/// Statement logging is disabled since `PASSWORD` clauses carry secrets.
	pub fn connect_options(&self, params: &ConnectionParams) -> PgConnectOptions {
		PgConnectOptions::new()
			.host(&params.endpoint)
			.port(params.port)
			.username(&params.username)
			.password(params.password.expose_secret())
			.database(&params.database)
			.ssl_mode(ssl_mode(params.ssl_mode))
			.application_name(APPLICATION_NAME)
			.options([(
				"statement_timeout",
				self.statement_timeout.as_millis().to_string(),
			)])
			.disable_statement_logging()
	}
}

pub(crate) fn ssl_mode(mode: SslMode) -> PgSslMode {
	match mode {
		SslMode::Disable => PgSslMode::Disable,
		SslMode::Allow => PgSslMode::Allow,
		SslMode::Prefer => PgSslMode::Prefer,
		SslMode::Require => PgSslMode::Require,
		SslMode::VerifyCa => PgSslMode::VerifyCa,
		SslMode::VerifyFull => PgSslMode::VerifyFull,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pgrole_core::SecretString;
	use rstest::rstest;

	fn params() -> ConnectionParams {
		ConnectionParams {
			endpoint: "db.internal".to_string(),
			port: 6432,
			username: "admin".to_string(),
			password: SecretString::new("s3cret"),
			database: "billing".to_string(),
			ssl_mode: SslMode::Require,
		}
	}

	#[rstest]
	fn test_connect_options_carry_params() {
		let options = PoolConfig::new().connect_options(&params());
		assert_eq!(options.get_host(), "db.internal");
		assert_eq!(options.get_port(), 6432);
		assert_eq!(options.get_username(), "admin");
		assert_eq!(options.get_database(), Some("billing"));
		assert_eq!(options.get_application_name(), Some(APPLICATION_NAME));
	}

	#[rstest]
	#[case(PoolConfig::new().with_max_connections(0), false)]
	#[case(PoolConfig::new().with_max_connections(2).with_min_connections(3), false)]
	#[case(PoolConfig::new().with_statement_timeout(Duration::ZERO), false)]
	#[case(PoolConfig::new().with_max_connections(2).with_min_connections(2), true)]
	fn test_validate(#[case] config: PoolConfig, #[case] valid: bool) {
		assert_eq!(config.validate().is_ok(), valid);
	}
}
