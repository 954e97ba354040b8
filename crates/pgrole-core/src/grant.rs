//! Grant model
//!
//! A grant resource declares the exact set of privileges a role holds on one
//! database or one table.

use crate::error::{Error, Result};
use crate::resource::ResourceReference;
use crate::role::validate_identifier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Schema assumed for table targets without an explicit schema
pub const DEFAULT_SCHEMA: &str = "public";

/// Object class a grant applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub enum GrantScope {
	Database,
	Table,
}

impl GrantScope {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Database => "Database",
			Self::Table => "Table",
		}
	}

	/// Every privilege that can be granted on this scope, in canonical order
	pub fn privileges(&self) -> &'static [Privilege] {
		match self {
			Self::Database => &[Privilege::Connect, Privilege::Create, Privilege::Temporary],
			Self::Table => &[
				Privilege::Select,
				Privilege::Insert,
				Privilege::Update,
				Privilege::Delete,
				Privilege::Truncate,
				Privilege::References,
				Privilege::Trigger,
			],
		}
	}
}

impl fmt::Display for GrantScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single grantable privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Privilege {
	Select,
	Insert,
	Update,
	Delete,
	Truncate,
	References,
	Trigger,
	Connect,
	Create,
	Temporary,
}

impl Privilege {
	/// SQL keyword, also the value reported by `aclexplode`
	pub fn as_sql(&self) -> &'static str {
		match self {
			Self::Select => "SELECT",
			Self::Insert => "INSERT",
			Self::Update => "UPDATE",
			Self::Delete => "DELETE",
			Self::Truncate => "TRUNCATE",
			Self::References => "REFERENCES",
			Self::Trigger => "TRIGGER",
			Self::Connect => "CONNECT",
			Self::Create => "CREATE",
			Self::Temporary => "TEMPORARY",
		}
	}

	pub fn applies_to(&self, scope: GrantScope) -> bool {
		scope.privileges().contains(self)
	}
}

impl fmt::Display for Privilege {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_sql())
	}
}

impl FromStr for Privilege {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim().to_ascii_uppercase().as_str() {
			"SELECT" => Ok(Self::Select),
			"INSERT" => Ok(Self::Insert),
			"UPDATE" => Ok(Self::Update),
			"DELETE" => Ok(Self::Delete),
			"TRUNCATE" => Ok(Self::Truncate),
			"REFERENCES" => Ok(Self::References),
			"TRIGGER" => Ok(Self::Trigger),
			"CONNECT" => Ok(Self::Connect),
			"CREATE" => Ok(Self::Create),
			"TEMPORARY" | "TEMP" => Ok(Self::Temporary),
			other => Err(Error::Validation(format!("unknown privilege {:?}", other))),
		}
	}
}

/// Ordered privilege set; iteration order is the canonical declaration order
pub type PrivilegeSet = BTreeSet<Privilege>;

/// Render a privilege set as a SQL privilege list
///
/// # Examples
///
/// ```
/// use pgrole_core::{Privilege, PrivilegeSet};
/// use pgrole_core::grant::privilege_list;
///
/// let set: PrivilegeSet = [Privilege::Insert, Privilege::Select].into_iter().collect();
/// assert_eq!(privilege_list(&set), "SELECT, INSERT");
/// ```
pub fn privilege_list(privileges: &PrivilegeSet) -> String {
	privileges
		.iter()
		.map(Privilege::as_sql)
		.collect::<Vec<_>>()
		.join(", ")
}

/// Parse declared privilege names for `scope`
///
/// `ALL` and `ALL PRIVILEGES` expand to every privilege of the scope. Every
/// unknown or inapplicable name is reported in a single validation error.
pub fn parse_privileges(scope: GrantScope, names: &[String]) -> Result<PrivilegeSet> {
	let mut set = PrivilegeSet::new();
	let mut unknown = Vec::new();
	let mut inapplicable = Vec::new();

	for name in names {
		let normalized = name.trim().to_ascii_uppercase();
		if normalized == "ALL" || normalized == "ALL PRIVILEGES" {
			set.extend(scope.privileges().iter().copied());
			continue;
		}
		match normalized.parse::<Privilege>() {
			Ok(privilege) if privilege.applies_to(scope) => {
				set.insert(privilege);
			}
			Ok(privilege) => inapplicable.push(privilege.as_sql().to_string()),
			Err(_) => unknown.push(name.trim().to_string()),
		}
	}

	let mut problems = Vec::new();
	if !unknown.is_empty() {
		problems.push(format!("unknown privileges: {}", unknown.join(", ")));
	}
	if !inapplicable.is_empty() {
		problems.push(format!(
			"privileges not applicable to {} scope: {}",
			scope,
			inapplicable.join(", ")
		));
	}

	if problems.is_empty() {
		Ok(set)
	} else {
		Err(Error::Validation(problems.join("; ")))
	}
}

/// The object a grant is held on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GrantTarget {
	Database { name: String },
	Table { schema: String, name: String },
}

impl GrantTarget {
	pub fn database(name: impl Into<String>) -> Self {
		Self::Database { name: name.into() }
	}

	pub fn table(schema: impl Into<String>, name: impl Into<String>) -> Self {
		Self::Table {
			schema: schema.into(),
			name: name.into(),
		}
	}

	/// Parse a declared target identifier
	///
	/// # Examples
	///
	/// ```
	/// use pgrole_core::{GrantScope, GrantTarget};
	///
	/// let target = GrantTarget::parse(GrantScope::Table, "orders").unwrap();
	/// assert_eq!(target, GrantTarget::table("public", "orders"));
	///
	/// let target = GrantTarget::parse(GrantScope::Table, "billing.invoices").unwrap();
	/// assert_eq!(target, GrantTarget::table("billing", "invoices"));
	/// ```
	pub fn parse(scope: GrantScope, target: &str) -> Result<Self> {
		let target = target.trim();
		match scope {
			GrantScope::Database => match validate_identifier("database name", target) {
				Some(problem) => Err(Error::Validation(problem)),
				None => Ok(Self::database(target)),
			},
			GrantScope::Table => {
				let (schema, name) = match target.split_once('.') {
					Some((schema, name)) => (schema.trim(), name.trim()),
					None => (DEFAULT_SCHEMA, target),
				};
				let problems: Vec<String> = [
					validate_identifier("schema name", schema),
					validate_identifier("table name", name),
				]
				.into_iter()
				.flatten()
				.collect();
				if problems.is_empty() {
					Ok(Self::table(schema, name))
				} else {
					Err(Error::Validation(problems.join("; ")))
				}
			}
		}
	}

	pub fn scope(&self) -> GrantScope {
		match self {
			Self::Database { .. } => GrantScope::Database,
			Self::Table { .. } => GrantScope::Table,
		}
	}
}

impl fmt::Display for GrantTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Database { name } => write!(f, "database {}", name),
			Self::Table { schema, name } => write!(f, "table {}.{}", schema, name),
		}
	}
}

/// Declared state of one grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct GrantSpec {
	/// Secret holding the connection details used to manage this grant
	pub connect_secret_ref: ResourceReference,

	/// Grantee role name
	pub role: String,

	/// Object class the grant applies to
	pub scope: GrantScope,

	/// Database name for `Database` scope, `[schema.]table` for `Table` scope
	pub target: String,

	/// Database holding the table for `Table` scope.
	/// Falls back to the `database` key of the connection secret.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub database: Option<String>,

	/// Privileges the grantee must hold, `ALL` expands to the whole scope
	#[serde(default)]
	pub privileges: Vec<String>,
}

impl GrantSpec {
	/// Validate the spec and turn it into a typed target and privilege set
	///
	/// Every problem is reported in a single validation error.
	pub fn resolve(&self) -> Result<(GrantTarget, PrivilegeSet)> {
		let mut problems = Vec::new();

		if let Some(problem) = validate_identifier("role", &self.role) {
			problems.push(problem);
		}
		if self.connect_secret_ref.name.trim().is_empty() {
			problems.push("connectSecretRef.name must be set".to_string());
		}
		if self.scope == GrantScope::Database && self.database.is_some() {
			problems.push("database may only be set for Table scope".to_string());
		}
		if let Some(database) = &self.database {
			if let Some(problem) = validate_identifier("database", database) {
				problems.push(problem);
			}
		}

		let target = GrantTarget::parse(self.scope, &self.target)
			.map_err(|e| problems.push(e.message().to_string()))
			.ok();
		let privileges = parse_privileges(self.scope, &self.privileges)
			.map_err(|e| problems.push(e.message().to_string()))
			.ok();

		match (target, privileges) {
			(Some(target), Some(privileges)) if problems.is_empty() => Ok((target, privileges)),
			_ => Err(Error::Validation(problems.join("; "))),
		}
	}

	/// Database to connect to when managing this grant, if it overrides the secret's
	pub fn connection_database(&self) -> Option<&str> {
		match self.scope {
			GrantScope::Database => None,
			GrantScope::Table => self.database.as_deref(),
		}
	}
}

/// Desired state of a grant as consumed by the planner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredGrant {
	pub grantee: String,
	pub target: GrantTarget,
	pub privileges: PrivilegeSet,
	pub deleting: bool,
}

impl DesiredGrant {
	pub fn new(grantee: impl Into<String>, target: GrantTarget, privileges: PrivilegeSet) -> Self {
		Self {
			grantee: grantee.into(),
			target,
			privileges,
			deleting: false,
		}
	}

	pub fn deleting(mut self) -> Self {
		self.deleting = true;
		self
	}
}
