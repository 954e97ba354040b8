//! Role model
//!
//! A role resource declares the attributes of one PostgreSQL role. The role
//! name is the resource name; attributes default the way the Role CRD does
//! (`login` on, everything else off, 100 connections).

use crate::error::{Error, Result};
use crate::resource::{ResourceReference, SecretKeySelector};
use crate::secret::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_CONNECTION_LIMIT: i32 = 100;

/// PostgreSQL truncates identifiers longer than `NAMEDATALEN - 1` bytes
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// One boolean role attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleFlag {
	Superuser,
	CreateDb,
	CreateRole,
	Login,
	Inherit,
	Replication,
	BypassRls,
}

impl RoleFlag {
	/// All flags in the order they are rendered and compared
	pub const ALL: [RoleFlag; 7] = [
		RoleFlag::Superuser,
		RoleFlag::CreateDb,
		RoleFlag::CreateRole,
		RoleFlag::Login,
		RoleFlag::Inherit,
		RoleFlag::Replication,
		RoleFlag::BypassRls,
	];

	/// `CREATE ROLE` / `ALTER ROLE` option keyword for this flag
	///
	/// # Examples
	///
	/// ```
	/// use pgrole_core::RoleFlag;
	///
	/// assert_eq!(RoleFlag::CreateDb.keyword(true), "CREATEDB");
	/// assert_eq!(RoleFlag::BypassRls.keyword(false), "NOBYPASSRLS");
	/// ```
	pub fn keyword(self, enabled: bool) -> &'static str {
		match (self, enabled) {
			(Self::Superuser, true) => "SUPERUSER",
			(Self::Superuser, false) => "NOSUPERUSER",
			(Self::CreateDb, true) => "CREATEDB",
			(Self::CreateDb, false) => "NOCREATEDB",
			(Self::CreateRole, true) => "CREATEROLE",
			(Self::CreateRole, false) => "NOCREATEROLE",
			(Self::Login, true) => "LOGIN",
			(Self::Login, false) => "NOLOGIN",
			(Self::Inherit, true) => "INHERIT",
			(Self::Inherit, false) => "NOINHERIT",
			(Self::Replication, true) => "REPLICATION",
			(Self::Replication, false) => "NOREPLICATION",
			(Self::BypassRls, true) => "BYPASSRLS",
			(Self::BypassRls, false) => "NOBYPASSRLS",
		}
	}

	/// Field name used in the declarative spec
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Superuser => "superUser",
			Self::CreateDb => "createDb",
			Self::CreateRole => "createRole",
			Self::Login => "login",
			Self::Inherit => "inherit",
			Self::Replication => "replication",
			Self::BypassRls => "bypassRls",
		}
	}
}

impl fmt::Display for RoleFlag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Boolean role attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase", default)]
pub struct RolePrivileges {
	/// SUPERUSER
	pub super_user: bool,
	/// CREATEDB: the role may create databases
	pub create_db: bool,
	/// CREATEROLE: the role may create other roles
	pub create_role: bool,
	/// LOGIN: the role may log in
	pub login: bool,
	/// INHERIT: the role inherits privileges of roles it is a member of
	pub inherit: bool,
	/// REPLICATION: the role may connect in replication mode
	pub replication: bool,
	/// BYPASSRLS: the role bypasses row-level security policies
	pub bypass_rls: bool,
}

impl Default for RolePrivileges {
	fn default() -> Self {
		Self {
			super_user: false,
			create_db: false,
			create_role: false,
			login: true,
			inherit: false,
			replication: false,
			bypass_rls: false,
		}
	}
}

impl RolePrivileges {
	/// All attributes switched off
	pub fn none() -> Self {
		Self {
			login: false,
			..Self::default()
		}
	}

	pub fn get(&self, flag: RoleFlag) -> bool {
		match flag {
			RoleFlag::Superuser => self.super_user,
			RoleFlag::CreateDb => self.create_db,
			RoleFlag::CreateRole => self.create_role,
			RoleFlag::Login => self.login,
			RoleFlag::Inherit => self.inherit,
			RoleFlag::Replication => self.replication,
			RoleFlag::BypassRls => self.bypass_rls,
		}
	}

	pub fn set(&mut self, flag: RoleFlag, enabled: bool) {
		match flag {
			RoleFlag::Superuser => self.super_user = enabled,
			RoleFlag::CreateDb => self.create_db = enabled,
			RoleFlag::CreateRole => self.create_role = enabled,
			RoleFlag::Login => self.login = enabled,
			RoleFlag::Inherit => self.inherit = enabled,
			RoleFlag::Replication => self.replication = enabled,
			RoleFlag::BypassRls => self.bypass_rls = enabled,
		}
	}

	pub fn with(mut self, flag: RoleFlag, enabled: bool) -> Self {
		self.set(flag, enabled);
		self
	}

	/// Flags whose value in `self` differs from `actual`, with the value `self` wants
	///
	/// # Examples
	///
	/// ```
	/// use pgrole_core::{RoleFlag, RolePrivileges};
	///
	/// let desired = RolePrivileges::default();
	/// let actual = RolePrivileges::default().with(RoleFlag::CreateDb, true);
	/// assert_eq!(desired.diff(&actual), vec![(RoleFlag::CreateDb, false)]);
	/// ```
	pub fn diff(&self, actual: &RolePrivileges) -> Vec<(RoleFlag, bool)> {
		RoleFlag::ALL
			.iter()
			.filter(|flag| self.get(**flag) != actual.get(**flag))
			.map(|flag| (*flag, self.get(*flag)))
			.collect()
	}

	/// `(flag, value)` pairs for every attribute
	pub fn entries(&self) -> Vec<(RoleFlag, bool)> {
		RoleFlag::ALL.iter().map(|flag| (*flag, self.get(*flag))).collect()
	}
}

fn default_connection_limit() -> i32 {
	DEFAULT_CONNECTION_LIMIT
}

/// Declared state of one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
	/// Secret holding the connection details used to manage this role
	pub connect_secret_ref: ResourceReference,

	/// Secret key holding the password of this role
	pub password_secret_ref: SecretKeySelector,

	/// Connection limit applied to the role, `-1` for unlimited
	#[serde(default = "default_connection_limit")]
	pub connection_limit: i32,

	/// Role attributes
	#[serde(default)]
	pub privileges: RolePrivileges,
}

impl RoleSpec {
	pub fn new(connect_secret_ref: ResourceReference, password_secret_ref: SecretKeySelector) -> Self {
		Self {
			connect_secret_ref,
			password_secret_ref,
			connection_limit: DEFAULT_CONNECTION_LIMIT,
			privileges: RolePrivileges::default(),
		}
	}

	pub fn with_connection_limit(mut self, limit: i32) -> Self {
		self.connection_limit = limit;
		self
	}

	pub fn with_privileges(mut self, privileges: RolePrivileges) -> Self {
		self.privileges = privileges;
		self
	}

	/// Check the spec for the role `role_name`, reporting every problem at once
	pub fn validate(&self, role_name: &str) -> Result<()> {
		let mut problems = Vec::new();

		if let Some(problem) = validate_identifier("role name", role_name) {
			problems.push(problem);
		}
		if self.connection_limit < -1 {
			problems.push(format!(
				"connectionLimit must be -1 or greater, got {}",
				self.connection_limit
			));
		}
		if self.connect_secret_ref.name.trim().is_empty() {
			problems.push("connectSecretRef.name must be set".to_string());
		}
		if self.password_secret_ref.name.trim().is_empty() {
			problems.push("passwordSecretRef.name must be set".to_string());
		}
		if self.password_secret_ref.key.trim().is_empty() {
			problems.push("passwordSecretRef.key must be set".to_string());
		}

		if problems.is_empty() {
			Ok(())
		} else {
			Err(Error::Validation(problems.join("; ")))
		}
	}
}

/// Returns a problem description when `value` cannot be used as an identifier
pub(crate) fn validate_identifier(what: &str, value: &str) -> Option<String> {
	if value.trim().is_empty() {
		Some(format!("{} must not be empty", what))
	} else if value.len() > MAX_IDENTIFIER_LENGTH {
		Some(format!(
			"{} {:?} exceeds {} bytes",
			what, value, MAX_IDENTIFIER_LENGTH
		))
	} else if value.contains('\0') {
		Some(format!("{} {:?} contains a NUL byte", what, value))
	} else {
		None
	}
}

/// Desired state of a role as consumed by the planner
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredRole {
	pub name: String,
	pub attributes: RolePrivileges,
	pub connection_limit: i32,
	/// Unset while deleting, the password is not needed to drop a role
	pub password: Option<SecretString>,
	pub deleting: bool,
}

impl DesiredRole {
	pub fn from_spec(name: impl Into<String>, spec: &RoleSpec, password: SecretString) -> Self {
		Self {
			name: name.into(),
			attributes: spec.privileges,
			connection_limit: spec.connection_limit,
			password: Some(password),
			deleting: false,
		}
	}

	/// A role that must no longer exist
	pub fn deleted(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			attributes: RolePrivileges::default(),
			connection_limit: DEFAULT_CONNECTION_LIMIT,
			password: None,
			deleting: true,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn spec() -> RoleSpec {
		RoleSpec::new(
			ResourceReference::new("db", "admin-conn"),
			SecretKeySelector::new("apps", "billing-pw", "password"),
		)
	}

	#[rstest]
	fn test_defaults_follow_crd() {
		let privileges = RolePrivileges::default();
		assert!(privileges.login);
		assert!(!privileges.super_user);
		assert!(!privileges.inherit);
		assert_eq!(spec().connection_limit, DEFAULT_CONNECTION_LIMIT);
	}

	#[rstest]
	fn test_deserialize_applies_defaults() {
		let json = serde_json::json!({
			"connectSecretRef": {"name": "admin-conn", "namespace": "db"},
			"passwordSecretRef": {"name": "pw", "namespace": "apps", "key": "password"},
			"privileges": {"createDb": true}
		});
		let spec: RoleSpec = serde_json::from_value(json).unwrap();
		assert_eq!(spec.connection_limit, 100);
		assert!(spec.privileges.create_db);
		assert!(spec.privileges.login);
		assert!(!spec.privileges.bypass_rls);
	}

	#[rstest]
	fn test_validate_reports_every_problem() {
		let mut spec = spec().with_connection_limit(-5);
		spec.password_secret_ref.key = " ".to_string();

		let err = spec.validate("billing").unwrap_err();
		let Error::Validation(message) = err else {
			panic!("expected validation error");
		};
		assert!(message.contains("connectionLimit"));
		assert!(message.contains("passwordSecretRef.key"));
	}

	#[rstest]
	#[case("", false)]
	#[case("billing", true)]
	#[case("a-role-name-that-is-way-too-long-for-postgres-to-keep-around-as-is", false)]
	fn test_validate_role_name(#[case] name: &str, #[case] valid: bool) {
		assert_eq!(spec().validate(name).is_ok(), valid);
	}

	#[rstest]
	fn test_diff_returns_desired_values_in_flag_order() {
		let desired = RolePrivileges::default()
			.with(RoleFlag::Replication, true)
			.with(RoleFlag::CreateDb, false);
		let actual = RolePrivileges::none().with(RoleFlag::CreateDb, true);

		assert_eq!(
			desired.diff(&actual),
			vec![
				(RoleFlag::CreateDb, false),
				(RoleFlag::Login, true),
				(RoleFlag::Replication, true),
			]
		);
	}
}
