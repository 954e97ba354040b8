//! Observed database state

use crate::grant::PrivilegeSet;
use crate::password::PasswordVerifier;
use crate::role::RolePrivileges;

/// A role as found in the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleState {
	pub exists: bool,
	pub attributes: RolePrivileges,
	pub connection_limit: i32,
	pub password: PasswordVerifier,
}

impl RoleState {
	/// State of a role that does not exist
	pub fn absent() -> Self {
		Self {
			exists: false,
			attributes: RolePrivileges::none(),
			connection_limit: -1,
			password: PasswordVerifier::Absent,
		}
	}

	pub fn present(
		attributes: RolePrivileges,
		connection_limit: i32,
		password: PasswordVerifier,
	) -> Self {
		Self {
			exists: true,
			attributes,
			connection_limit,
			password,
		}
	}
}

/// Privileges a grantee currently holds on one object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantState {
	pub object_exists: bool,
	pub grantee_exists: bool,
	pub privileges: PrivilegeSet,
}

impl GrantState {
	pub fn new(privileges: PrivilegeSet) -> Self {
		Self {
			object_exists: true,
			grantee_exists: true,
			privileges,
		}
	}

	/// Both the grantee and the object exist
	pub fn is_live(&self) -> bool {
		self.object_exists && self.grantee_exists
	}
}
