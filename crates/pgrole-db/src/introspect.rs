//! Catalog introspection
//!
//! Reads role attributes, password verifiers and privileges from the
//! PostgreSQL system catalogs. Absent roles and objects are reported as
//! absent state, never as errors.

use crate::error::{INSUFFICIENT_PRIVILEGE, classify, sqlstate};
use pgrole_core::{
	GrantState, GrantTarget, PasswordVerifier, Privilege, PrivilegeSet, Result, RolePrivileges,
	RoleState,
};
use sqlx::{PgPool, Row};

const ROLE_QUERY: &str = r#"
	SELECT
		rolsuper,
		rolcreatedb,
		rolcreaterole,
		rolcanlogin,
		rolinherit,
		rolreplication,
		rolbypassrls,
		rolconnlimit
	FROM pg_catalog.pg_roles
	WHERE rolname = $1
"#;

const PASSWORD_QUERY: &str = r#"
	SELECT rolpassword
	FROM pg_catalog.pg_authid
	WHERE rolname = $1
"#;

const ROLE_EXISTS_QUERY: &str = r#"
	SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = $1)
"#;

const DATABASE_EXISTS_QUERY: &str = r#"
	SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_database WHERE datname = $1)
"#;

// Default ACLs are expanded so that an owner's implicit privileges count
const DATABASE_PRIVILEGES_QUERY: &str = r#"
	SELECT a.privilege_type
	FROM pg_catalog.pg_database d
	CROSS JOIN LATERAL aclexplode(coalesce(d.datacl, acldefault('d', d.datdba))) AS a
	JOIN pg_catalog.pg_roles r ON r.oid = a.grantee
	WHERE d.datname = $1 AND r.rolname = $2
"#;

const TABLE_EXISTS_QUERY: &str = r#"
	SELECT EXISTS (
		SELECT 1
		FROM pg_catalog.pg_class c
		JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
		WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'p', 'v', 'm', 'f')
	)
"#;

const TABLE_PRIVILEGES_QUERY: &str = r#"
	SELECT a.privilege_type
	FROM pg_catalog.pg_class c
	JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
	CROSS JOIN LATERAL aclexplode(coalesce(c.relacl, acldefault('r', c.relowner))) AS a
	JOIN pg_catalog.pg_roles r ON r.oid = a.grantee
	WHERE n.nspname = $1
		AND c.relname = $2
		AND c.relkind IN ('r', 'p', 'v', 'm', 'f')
		AND r.rolname = $3
"#;

/// Attributes, connection limit and password verifier of `role`
pub async fn role_state(pool: &PgPool, role: &str) -> Result<RoleState> {
	let context = format!("inspect role {}", role);
	let row = sqlx::query(ROLE_QUERY)
		.bind(role)
		.fetch_optional(pool)
		.await
		.map_err(|e| classify(e, &context))?;

	let Some(row) = row else {
		return Ok(RoleState::absent());
	};

	let attributes = RolePrivileges {
		super_user: row.try_get("rolsuper").map_err(|e| classify(e, &context))?,
		create_db: row.try_get("rolcreatedb").map_err(|e| classify(e, &context))?,
		create_role: row.try_get("rolcreaterole").map_err(|e| classify(e, &context))?,
		login: row.try_get("rolcanlogin").map_err(|e| classify(e, &context))?,
		inherit: row.try_get("rolinherit").map_err(|e| classify(e, &context))?,
		replication: row.try_get("rolreplication").map_err(|e| classify(e, &context))?,
		bypass_rls: row.try_get("rolbypassrls").map_err(|e| classify(e, &context))?,
	};
	let connection_limit: i32 = row
		.try_get("rolconnlimit")
		.map_err(|e| classify(e, &context))?;

	let password = password_verifier(pool, role).await?;

	Ok(RoleState::present(attributes, connection_limit, password))
}

/// Stored password verifier of `role`
///
/// Reading `pg_authid` requires superuser; without it the verifier is
/// [`PasswordVerifier::Unreadable`].
pub async fn password_verifier(pool: &PgPool, role: &str) -> Result<PasswordVerifier> {
	let result = sqlx::query(PASSWORD_QUERY)
		.bind(role)
		.fetch_optional(pool)
		.await;

	match result {
		Ok(Some(row)) => {
			let value: Option<String> = row
				.try_get("rolpassword")
				.map_err(|e| classify(e, "read password verifier"))?;
			Ok(PasswordVerifier::from_catalog(value))
		}
		Ok(None) => Ok(PasswordVerifier::Absent),
		Err(e) if sqlstate(&e).as_deref() == Some(INSUFFICIENT_PRIVILEGE) => {
			tracing::debug!(role = %role, "pg_authid is not readable, password drift is not detected");
			Ok(PasswordVerifier::Unreadable)
		}
		Err(e) => Err(classify(e, "read password verifier")),
	}
}

pub async fn role_exists(pool: &PgPool, role: &str) -> Result<bool> {
	sqlx::query_scalar::<_, bool>(ROLE_EXISTS_QUERY)
		.bind(role)
		.fetch_one(pool)
		.await
		.map_err(|e| classify(e, &format!("check role {}", role)))
}

/// Privileges granted directly to `grantee` on `target`
pub async fn grant_state(pool: &PgPool, grantee: &str, target: &GrantTarget) -> Result<GrantState> {
	let context = format!("inspect privileges of {} on {}", grantee, target);

	let grantee_exists = role_exists(pool, grantee).await?;
	let object_exists = match target {
		GrantTarget::Database { name } => sqlx::query_scalar::<_, bool>(DATABASE_EXISTS_QUERY)
			.bind(name)
			.fetch_one(pool)
			.await,
		GrantTarget::Table { schema, name } => sqlx::query_scalar::<_, bool>(TABLE_EXISTS_QUERY)
			.bind(schema)
			.bind(name)
			.fetch_one(pool)
			.await,
	}
	.map_err(|e| classify(e, &context))?;

	if !grantee_exists || !object_exists {
		return Ok(GrantState {
			object_exists,
			grantee_exists,
			privileges: PrivilegeSet::new(),
		});
	}

	let names: Vec<String> = match target {
		GrantTarget::Database { name } => {
			sqlx::query_scalar::<_, String>(DATABASE_PRIVILEGES_QUERY)
				.bind(name)
				.bind(grantee)
				.fetch_all(pool)
				.await
		}
		GrantTarget::Table { schema, name } => {
			sqlx::query_scalar::<_, String>(TABLE_PRIVILEGES_QUERY)
				.bind(schema)
				.bind(name)
				.bind(grantee)
				.fetch_all(pool)
				.await
		}
	}
	.map_err(|e| classify(e, &context))?;

	Ok(GrantState::new(held_privileges(target, names)))
}

/// Keep the privileges that apply to the target's scope
///
/// Privileges this engine does not manage (e.g. `MAINTAIN`) are ignored.
pub(crate) fn held_privileges(target: &GrantTarget, names: Vec<String>) -> PrivilegeSet {
	let scope = target.scope();
	names
		.into_iter()
		.filter_map(|name| match name.parse::<Privilege>() {
			Ok(privilege) if privilege.applies_to(scope) => Some(privilege),
			_ => {
				tracing::trace!(privilege = %name, target = %target, "ignoring unmanaged privilege");
				None
			}
		})
		.collect()
}
