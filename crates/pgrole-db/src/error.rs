//! Mapping of driver errors onto the reconciliation error taxonomy

use pgrole_core::Error;

/// `insufficient_privilege`
pub const INSUFFICIENT_PRIVILEGE: &str = "42501";

/// SQLSTATEs outside class 08 that still mean the session is unusable
const CONNECTION_STATES: &[&str] = &[
	"28000", // invalid_authorization_specification
	"28P01", // invalid_password
	"57014", // query_canceled, raised by statement_timeout
	"57P01", // admin_shutdown
	"57P02", // crash_shutdown
	"57P03", // cannot_connect_now
	"53300", // too_many_connections
];

/// SQLSTATE of a database error, if any
pub fn sqlstate(err: &sqlx::Error) -> Option<String> {
	match err {
		sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
		_ => None,
	}
}

/// Classify a driver error
///
/// Transport, TLS, pool and connection-class SQLSTATE failures become
/// [`Error::ConnectionFailed`]; everything else is an [`Error::Execution`]
/// carrying the SQLSTATE. `context` must never contain secrets.
pub fn classify(err: sqlx::Error, context: &str) -> Error {
	match &err {
		sqlx::Error::Database(db) => {
			let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
			if is_connection_state(&code) {
				Error::connection(format!("{}: {} (SQLSTATE {})", context, db.message(), code))
			} else {
				Error::execution(format!("{}: {} (SQLSTATE {})", context, db.message(), code))
			}
		}
		sqlx::Error::Io(_)
		| sqlx::Error::Tls(_)
		| sqlx::Error::Protocol(_)
		| sqlx::Error::PoolTimedOut
		| sqlx::Error::PoolClosed
		| sqlx::Error::WorkerCrashed
		| sqlx::Error::Configuration(_) => Error::connection(format!("{}: {}", context, err)),
		_ => Error::execution(format!("{}: {}", context, err)),
	}
}

fn is_connection_state(code: &str) -> bool {
	code.starts_with("08") || CONNECTION_STATES.contains(&code)
}
