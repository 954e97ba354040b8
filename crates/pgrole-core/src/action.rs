//! Corrective actions
//!
//! The planner turns a desired/observed pair into an ordered list of
//! actions; the executor applies them one at a time. Rendering an action for
//! logs never reveals a password.

use crate::grant::{GrantTarget, PrivilegeSet, privilege_list};
use crate::role::{RoleFlag, RolePrivileges};
use crate::secret::SecretString;
use std::fmt;

/// One category of change to an existing role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleChange {
	/// Boolean attributes to switch, only the differing ones
	Attributes(Vec<(RoleFlag, bool)>),
	ConnectionLimit(i32),
	Password(SecretString),
}

impl fmt::Display for RoleChange {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Attributes(flags) => {
				let keywords: Vec<&str> = flags
					.iter()
					.map(|(flag, enabled)| flag.keyword(*enabled))
					.collect();
				f.write_str(&keywords.join(" "))
			}
			Self::ConnectionLimit(limit) => write!(f, "CONNECTION LIMIT {}", limit),
			Self::Password(_) => f.write_str("PASSWORD ***"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
	CreateRole {
		name: String,
		attributes: RolePrivileges,
		connection_limit: i32,
		password: Option<SecretString>,
	},
	AlterRole {
		name: String,
		change: RoleChange,
	},
	DropRole {
		name: String,
	},
	Grant {
		grantee: String,
		target: GrantTarget,
		privileges: PrivilegeSet,
	},
	Revoke {
		grantee: String,
		target: GrantTarget,
		privileges: PrivilegeSet,
	},
}

impl Action {
	/// Short name used as a structured log field
	pub fn kind(&self) -> &'static str {
		match self {
			Self::CreateRole { .. } => "create_role",
			Self::AlterRole { .. } => "alter_role",
			Self::DropRole { .. } => "drop_role",
			Self::Grant { .. } => "grant",
			Self::Revoke { .. } => "revoke",
		}
	}

	/// Whether this action removes the managed object
	pub fn is_destructive(&self) -> bool {
		matches!(self, Self::DropRole { .. } | Self::Revoke { .. })
	}
}

impl fmt::Display for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::CreateRole {
				name,
				attributes,
				connection_limit,
				password,
			} => {
				write!(f, "create role {}", name)?;
				for (flag, enabled) in attributes.entries() {
					write!(f, " {}", flag.keyword(enabled))?;
				}
				write!(f, " CONNECTION LIMIT {}", connection_limit)?;
				if password.is_some() {
					f.write_str(" PASSWORD ***")?;
				}
				Ok(())
			}
			Self::AlterRole { name, change } => write!(f, "alter role {} {}", name, change),
			Self::DropRole { name } => write!(f, "drop role {}", name),
			Self::Grant {
				grantee,
				target,
				privileges,
			} => write!(
				f,
				"grant {} on {} to {}",
				privilege_list(privileges),
				target,
				grantee
			),
			Self::Revoke {
				grantee,
				target,
				privileges,
			} => write!(
				f,
				"revoke {} on {} from {}",
				privilege_list(privileges),
				target,
				grantee
			),
		}
	}
}
