//! Password verifier comparison
//!
//! PostgreSQL stores role passwords as SCRAM-SHA-256 or md5 verifiers. To
//! detect drift without ever reading a plaintext password back, the desired
//! password is hashed with the parameters of the stored verifier and the
//! results are compared.

use crate::secret::SecretString;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const SCRAM_PREFIX: &str = "SCRAM-SHA-256$";
const MD5_PREFIX: &str = "md5";

/// Largest SCRAM iteration count a stored verifier is checked against
///
/// Verifiers above it are not recomputed and count as matching, like an
/// unreadable one.
pub const MAX_SCRAM_ITERATIONS: u32 = 1 << 20;

/// Password state of a role as read from the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordVerifier {
	/// The admin role may not read `pg_authid`
	Unreadable,
	/// No password is set
	Absent,
	/// Stored verifier, e.g. `SCRAM-SHA-256$4096:...`
	Stored(SecretString),
}

impl PasswordVerifier {
	/// Build from a nullable `rolpassword` column
	pub fn from_catalog(value: Option<String>) -> Self {
		match value {
			Some(verifier) if !verifier.is_empty() => Self::Stored(SecretString::new(verifier)),
			_ => Self::Absent,
		}
	}

	/// Whether `password` is what this verifier was derived from
	///
	/// An unreadable verifier always matches since drift cannot be observed,
	/// and so does a SCRAM verifier above [`MAX_SCRAM_ITERATIONS`]. Unknown
	/// verifier formats never match.
	///
	/// # Examples
	///
	/// ```
	/// use pgrole_core::{PasswordVerifier, SecretString};
	/// use pgrole_core::password::md5_verifier;
	///
	/// let stored = PasswordVerifier::Stored(md5_verifier("app", "hunter2").into());
	/// assert!(stored.matches("app", &SecretString::new("hunter2")));
	/// assert!(!stored.matches("app", &SecretString::new("hunter3")));
	/// ```
	pub fn matches(&self, role: &str, password: &SecretString) -> bool {
		match self {
			Self::Unreadable => true,
			Self::Absent => false,
			Self::Stored(verifier) => {
				let verifier = verifier.expose_secret();
				if verifier.starts_with(SCRAM_PREFIX) {
					scram_matches(verifier, password.expose_secret()).unwrap_or(false)
				} else if verifier.starts_with(MD5_PREFIX) {
					verifier == md5_verifier(role, password.expose_secret())
				} else {
					false
				}
			}
		}
	}
}

/// Compute the md5 verifier PostgreSQL stores for `role`
pub fn md5_verifier(role: &str, password: &str) -> String {
	let mut hasher = Md5::new();
	hasher.update(password.as_bytes());
	hasher.update(role.as_bytes());
	format!("{}{}", MD5_PREFIX, hex::encode(hasher.finalize()))
}

/// Compute a SCRAM-SHA-256 verifier in PostgreSQL's storage format
pub fn scram_sha256_verifier(password: &str, salt: &[u8], iterations: u32) -> Option<String> {
	let (stored_key, server_key) = scram_keys(password, salt, iterations)?;
	Some(format!(
		"{}{}:{}${}:{}",
		SCRAM_PREFIX,
		iterations,
		STANDARD.encode(salt),
		STANDARD.encode(stored_key),
		STANDARD.encode(server_key)
	))
}

fn scram_matches(verifier: &str, password: &str) -> Option<bool> {
	let body = verifier.strip_prefix(SCRAM_PREFIX)?;
	let (params, keys) = body.split_once('$')?;
	let (iterations, salt) = params.split_once(':')?;
	let (stored_key, server_key) = keys.split_once(':')?;

	let iterations: u32 = iterations.parse().ok()?;
	if iterations > MAX_SCRAM_ITERATIONS {
		return Some(true);
	}
	let salt = STANDARD.decode(salt).ok()?;
	let stored_key = STANDARD.decode(stored_key).ok()?;
	let server_key = STANDARD.decode(server_key).ok()?;

	let (expected_stored, expected_server) = scram_keys(password, &salt, iterations)?;
	Some(expected_stored == stored_key && expected_server == server_key)
}

fn scram_keys(password: &str, salt: &[u8], iterations: u32) -> Option<(Vec<u8>, Vec<u8>)> {
	if iterations == 0 {
		return None;
	}
	let mut salted = [0u8; 32];
	pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut salted);
	let client_key = hmac_sha256(&salted, b"Client Key")?;
	let stored_key = Sha256::digest(&client_key).to_vec();
	let server_key = hmac_sha256(&salted, b"Server Key")?;
	Some((stored_key, server_key))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
	let mut mac = HmacSha256::new_from_slice(key).ok()?;
	mac.update(data);
	Some(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	const SCRAM_HUNTER2: &str = "SCRAM-SHA-256$4096:MDEyMzQ1Njc4OWFiY2RlZg==$HJFePfOAb1GWwyOATbgkhasVp3hFg6hYYE7eNrTx7UA=:4t0aPsdm+OD8h/VVwxMjgry9wezSEEHf1L5kcG4VJsw=";

	#[rstest]
	fn test_md5_verifier_matches_postgres_format() {
		assert_eq!(
			md5_verifier("app", "hunter2"),
			"md5ae683e9e3a46c249efd75afd69dd69d3"
		);
	}

	#[rstest]
	fn test_scram_verifier_matches_postgres_format() {
		assert_eq!(
			scram_sha256_verifier("hunter2", b"0123456789abcdef", 4096).unwrap(),
			SCRAM_HUNTER2
		);
	}

	#[rstest]
	#[case("hunter2", true)]
	#[case("hunter3", false)]
	#[case("", false)]
	fn test_scram_comparison(#[case] password: &str, #[case] expected: bool) {
		let stored = PasswordVerifier::Stored(SecretString::new(SCRAM_HUNTER2));
		assert_eq!(stored.matches("app", &SecretString::new(password)), expected);
	}

	#[rstest]
	fn test_md5_depends_on_role_name() {
		let stored = PasswordVerifier::Stored(md5_verifier("app", "hunter2").into());
		assert!(!stored.matches("other", &SecretString::new("hunter2")));
	}

	#[rstest]
	#[case(PasswordVerifier::Unreadable, true)]
	#[case(PasswordVerifier::Absent, false)]
	#[case(PasswordVerifier::Stored(SecretString::new("plaintext")), false)]
	#[case(PasswordVerifier::Stored(SecretString::new("SCRAM-SHA-256$garbage")), false)]
	fn test_special_verifiers(#[case] verifier: PasswordVerifier, #[case] expected: bool) {
		assert_eq!(verifier.matches("app", &SecretString::new("hunter2")), expected);
	}

	#[rstest]
	fn test_excessive_iterations_are_not_recomputed() {
		let verifier = format!(
			"{}{}:MDEyMzQ1Njc4OWFiY2RlZg==$AAAA:AAAA",
			SCRAM_PREFIX,
			u32::MAX
		);
		let stored = PasswordVerifier::Stored(SecretString::new(verifier));
		assert!(stored.matches("app", &SecretString::new("hunter2")));
	}

	#[rstest]
	fn test_from_catalog() {
		assert_eq!(PasswordVerifier::from_catalog(None), PasswordVerifier::Absent);
		assert!(matches!(
			PasswordVerifier::from_catalog(Some("md5abc".to_string())),
			PasswordVerifier::Stored(_)
		));
	}
}
