//! Statement rendering
//!
//! Identifiers go through `quote_identifier` and password literals through
//! `quote_literal`. Rendered statements may contain a password and must
//! never be logged.

use pg_escape::{quote_identifier, quote_literal};
use pgrole_core::grant::privilege_list;
use pgrole_core::{Action, GrantTarget, PrivilegeSet, RoleChange, RolePrivileges, SecretString};

/// Render `action` as a single SQL statement
///
/// `role_exists` only matters for [`Action::CreateRole`]: an existing role is
/// brought to the full declared state with `ALTER ROLE` instead.
pub fn statement(action: &Action, role_exists: bool) -> String {
	match action {
		Action::CreateRole {
			name,
			attributes,
			connection_limit,
			password,
		} => {
			let verb = if role_exists { "ALTER" } else { "CREATE" };
			format!(
				"{} ROLE {} WITH {}",
				verb,
				quote_identifier(name),
				role_options(attributes, *connection_limit, password.as_ref())
			)
		}
		Action::AlterRole { name, change } => alter_role(name, change),
		Action::DropRole { name } => format!("DROP ROLE IF EXISTS {}", quote_identifier(name)),
		Action::Grant {
			grantee,
			target,
			privileges,
		} => format!(
			"GRANT {} ON {} TO {}",
			privilege_list(privileges),
			object(target),
			quote_identifier(grantee)
		),
		Action::Revoke {
			grantee,
			target,
			privileges,
		} => revoke(grantee, target, privileges),
	}
}

fn alter_role(name: &str, change: &RoleChange) -> String {
	let clause = match change {
		RoleChange::Attributes(flags) => flags
			.iter()
			.map(|(flag, enabled)| flag.keyword(*enabled))
			.collect::<Vec<_>>()
			.join(" "),
		RoleChange::ConnectionLimit(limit) => format!("CONNECTION LIMIT {}", limit),
		RoleChange::Password(password) => password_clause(password),
	};
	format!("ALTER ROLE {} WITH {}", quote_identifier(name), clause)
}

fn revoke(grantee: &str, target: &GrantTarget, privileges: &PrivilegeSet) -> String {
	format!(
		"REVOKE {} ON {} FROM {}",
		privilege_list(privileges),
		object(target),
		quote_identifier(grantee)
	)
}

fn role_options(
	attributes: &RolePrivileges,
	connection_limit: i32,
	password: Option<&SecretString>,
) -> String {
	let mut options: Vec<String> = attributes
		.entries()
		.into_iter()
		.map(|(flag, enabled)| flag.keyword(enabled).to_string())
		.collect();
	options.push(format!("CONNECTION LIMIT {}", connection_limit));
	if let Some(password) = password {
		options.push(password_clause(password));
	}
	options.join(" ")
}

fn password_clause(password: &SecretString) -> String {
	format!("PASSWORD {}", quote_literal(password.expose_secret()))
}

fn object(target: &GrantTarget) -> String {
	match target {
		GrantTarget::Database { name } => format!("DATABASE {}", quote_identifier(name)),
		GrantTarget::Table { schema, name } => format!(
			"TABLE {}.{}",
			quote_identifier(schema),
			quote_identifier(name)
		),
	}
}
