//! Connection credentials
//!
//! Connection details live in a platform secret with the keys `endpoint`,
//! `port`, `username`, `password` and optionally `database` and `sslmode`.

use crate::error::{Error, Result};
use crate::resource::{ResourceReference, SecretKeySelector};
use crate::secret::SecretString;
use crate::store::SecretStore;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const ENDPOINT_KEY: &str = "endpoint";
pub const PORT_KEY: &str = "port";
pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";
pub const DATABASE_KEY: &str = "database";
pub const SSLMODE_KEY: &str = "sslmode";

/// Keys that must be present and non-blank before connecting
pub const REQUIRED_KEYS: [&str; 4] = [ENDPOINT_KEY, PORT_KEY, USERNAME_KEY, PASSWORD_KEY];

pub const DEFAULT_DATABASE: &str = "postgres";
pub const DEFAULT_SSL_MODE: SslMode = SslMode::Disable;

/// Raw secret payload, keyed by entry name
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// TLS negotiation mode, mirroring libpq's `sslmode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SslMode {
	#[default]
	Disable,
	Allow,
	Prefer,
	Require,
	VerifyCa,
	VerifyFull,
}

impl SslMode {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Disable => "disable",
			Self::Allow => "allow",
			Self::Prefer => "prefer",
			Self::Require => "require",
			Self::VerifyCa => "verify-ca",
			Self::VerifyFull => "verify-full",
		}
	}
}

impl fmt::Display for SslMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for SslMode {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"disable" => Ok(Self::Disable),
			"allow" => Ok(Self::Allow),
			"prefer" => Ok(Self::Prefer),
			"require" => Ok(Self::Require),
			"verify-ca" => Ok(Self::VerifyCa),
			"verify-full" => Ok(Self::VerifyFull),
			other => Err(Error::Validation(format!("unknown sslmode {:?}", other))),
		}
	}
}

/// Everything needed to open an administrative connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
	pub endpoint: String,
	pub port: u16,
	pub username: String,
	pub password: SecretString,
	pub database: String,
	pub ssl_mode: SslMode,
}

impl ConnectionParams {
	/// Validate and parse a connection secret
	///
	/// Missing required keys and malformed values are all reported in one
	/// validation error.
	///
	/// # Examples
	///
	/// ```
	/// use pgrole_core::{ConnectionParams, SecretData};
	///
	/// let mut data = SecretData::new();
	/// data.insert("endpoint".into(), b"db.internal".to_vec());
	/// data.insert("port".into(), b"5432".to_vec());
	///
	/// let err = ConnectionParams::from_secret(&data).unwrap_err();
	/// assert_eq!(
	///     err.to_string(),
	///     "Validation failed: missing required keys: username, password"
	/// );
	/// ```
	pub fn from_secret(data: &SecretData) -> Result<Self> {
		let missing = Self::missing_keys(data);
		let mut problems = Vec::new();
		if !missing.is_empty() {
			problems.push(format!("missing required keys: {}", missing.join(", ")));
		}

		let port = match value_of(data, PORT_KEY) {
			Some(Ok(raw)) => match raw.trim().parse::<u16>() {
				Ok(port) if port > 0 => Some(port),
				_ => {
					problems.push(format!("malformed {}: {:?}", PORT_KEY, raw.trim()));
					None
				}
			},
			Some(Err(())) => {
				problems.push(format!("malformed {}: not valid UTF-8", PORT_KEY));
				None
			}
			None => None,
		};

		let ssl_mode = match value_of(data, SSLMODE_KEY) {
			Some(Ok(raw)) => match raw.parse::<SslMode>() {
				Ok(mode) => mode,
				Err(_) => {
					problems.push(format!("malformed {}: {:?}", SSLMODE_KEY, raw.trim()));
					DEFAULT_SSL_MODE
				}
			},
			Some(Err(())) => {
				problems.push(format!("malformed {}: not valid UTF-8", SSLMODE_KEY));
				DEFAULT_SSL_MODE
			}
			None => DEFAULT_SSL_MODE,
		};

		for key in [ENDPOINT_KEY, USERNAME_KEY, PASSWORD_KEY, DATABASE_KEY] {
			if let Some(Err(())) = value_of(data, key) {
				problems.push(format!("malformed {}: not valid UTF-8", key));
			}
		}

		if !problems.is_empty() {
			return Err(Error::Validation(problems.join("; ")));
		}

		let text = |key: &str| match value_of(data, key) {
			Some(Ok(value)) => value,
			_ => String::new(),
		};

		Ok(Self {
			endpoint: text(ENDPOINT_KEY).trim().to_string(),
			port: port.unwrap_or_default(),
			username: text(USERNAME_KEY).trim().to_string(),
			password: SecretString::new(text(PASSWORD_KEY)),
			database: match value_of(data, DATABASE_KEY) {
				Some(Ok(database)) => database.trim().to_string(),
				_ => DEFAULT_DATABASE.to_string(),
			},
			ssl_mode,
		})
	}

	/// Required keys that are absent or blank, in canonical order
	pub fn missing_keys(data: &SecretData) -> Vec<&'static str> {
		REQUIRED_KEYS
			.iter()
			.copied()
			.filter(|key| value_of(data, key).is_none())
			.collect()
	}

	/// Same credentials against another database
	pub fn with_database(mut self, database: impl Into<String>) -> Self {
		self.database = database.into();
		self
	}

	/// libpq key/value connection string with the password masked
	pub fn masked_connection_string(&self) -> String {
		format!(
			"host={} port={} user={} password=*** dbname={} sslmode={}",
			self.endpoint, self.port, self.username, self.database, self.ssl_mode
		)
	}
}

impl fmt::Display for ConnectionParams {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.masked_connection_string())
	}
}

// Present non-blank value, or `Err` when the bytes are not UTF-8
fn value_of(data: &SecretData, key: &str) -> Option<std::result::Result<String, ()>> {
	let raw = data.get(key)?;
	match std::str::from_utf8(raw) {
		Ok(value) if value.trim().is_empty() => None,
		Ok(value) => Some(Ok(value.to_string())),
		Err(_) => Some(Err(())),
	}
}

/// Looks up and validates secrets referenced by resources
#[derive(Clone)]
pub struct CredentialResolver {
	store: Arc<dyn SecretStore>,
}

impl CredentialResolver {
	pub fn new(store: Arc<dyn SecretStore>) -> Self {
		Self { store }
	}

	/// Resolve the connection parameters held by a connection secret
	pub async fn resolve(&self, reference: &ResourceReference) -> Result<ConnectionParams> {
		let data = self
			.store
			.get_secret(&reference.namespace, &reference.name)
			.await?
			.ok_or_else(|| Error::not_found(format!("secret {} not found", reference)))?;

		ConnectionParams::from_secret(&data).map_err(|e| {
			Error::validation(format!("secret {}: {}", reference, e.message()))
		})
	}

	/// Read a role password from one key of a secret
	pub async fn resolve_password(&self, selector: &SecretKeySelector) -> Result<SecretString> {
		let data = self
			.store
			.get_secret(&selector.namespace, &selector.name)
			.await?
			.ok_or_else(|| {
				Error::not_found(format!(
					"secret {}/{} not found",
					selector.namespace, selector.name
				))
			})?;

		match value_of(&data, &selector.key) {
			Some(Ok(password)) => Ok(SecretString::new(password)),
			Some(Err(())) => Err(Error::validation(format!(
				"secret key {} is not valid UTF-8",
				selector
			))),
			None => Err(Error::validation(format!(
				"secret key {} is missing or blank",
				selector
			))),
		}
	}
}

impl fmt::Debug for CredentialResolver {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CredentialResolver").finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use rstest::rstest;

	fn secret(entries: &[(&str, &str)]) -> SecretData {
		entries
			.iter()
			.map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
			.collect()
	}

	fn complete() -> SecretData {
		secret(&[
			("endpoint", "db.internal"),
			("port", "5432"),
			("username", "admin"),
			("password", "s3cret"),
		])
	}

	#[rstest]
	fn test_defaults_for_optional_keys() {
		let params = ConnectionParams::from_secret(&complete()).unwrap();
		assert_eq!(params.database, DEFAULT_DATABASE);
		assert_eq!(params.ssl_mode, SslMode::Disable);
		assert_eq!(params.port, 5432);
	}

	#[rstest]
	fn test_missing_endpoint_and_password_reported_together() {
		let mut data = complete();
		data.remove("endpoint");
		data.insert("password".into(), b"   ".to_vec());
		let err = ConnectionParams::from_secret(&data).unwrap_err();
		assert_eq!(
			err,
			Error::Validation("missing required keys: endpoint, password".to_string())
		);
	}

	#[rstest]
	fn test_malformed_values_share_one_message() {
		let mut data = complete();
		data.remove("username");
		data.insert("port".into(), b"54x2".to_vec());
		data.insert("sslmode".into(), b"sometimes".to_vec());
		let message = ConnectionParams::from_secret(&data).unwrap_err().to_string();
		assert!(message.contains("missing required keys: username"));
		assert!(message.contains("malformed port: \"54x2\""));
		assert!(message.contains("malformed sslmode: \"sometimes\""));
	}

	#[rstest]
	#[case("verify-full", SslMode::VerifyFull)]
	#[case("REQUIRE", SslMode::Require)]
	#[case(" prefer ", SslMode::Prefer)]
	fn test_sslmode_parsing(#[case] raw: &str, #[case] expected: SslMode) {
		let mut data = complete();
		data.insert("sslmode".into(), raw.as_bytes().to_vec());
		assert_eq!(
			ConnectionParams::from_secret(&data).unwrap().ssl_mode,
			expected
		);
	}

	#[rstest]
	fn test_masked_connection_string_hides_password() {
		let params = ConnectionParams::from_secret(&complete())
			.unwrap()
			.with_database("billing");
		let rendered = params.to_string();
		assert_eq!(
			rendered,
			"host=db.internal port=5432 user=admin password=*** dbname=billing sslmode=disable"
		);
		assert!(!format!("{:?}", params).contains("s3cret"));
	}

	struct OneSecret(SecretData);

	#[async_trait]
	impl SecretStore for OneSecret {
		async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>> {
			Ok((namespace == "db" && name == "conn").then(|| self.0.clone()))
		}
	}

	#[tokio::test]
	async fn test_resolver_reports_missing_secret() {
		let resolver = CredentialResolver::new(Arc::new(OneSecret(complete())));
		let err = resolver
			.resolve(&ResourceReference::new("db", "other"))
			.await
			.unwrap_err();
		assert_eq!(err, Error::not_found("secret db/other not found"));
	}

	#[tokio::test]
	async fn test_resolve_password_requires_key() {
		let resolver = CredentialResolver::new(Arc::new(OneSecret(complete())));
		let password = resolver
			.resolve_password(&SecretKeySelector::new("db", "conn", "password"))
			.await
			.unwrap();
		assert_eq!(password.expose_secret(), "s3cret");

		let err = resolver
			.resolve_password(&SecretKeySelector::new("db", "conn", "rolepass"))
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Validation(_)));
	}
}
