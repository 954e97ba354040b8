//! Diff planning
//!
//! Planning is pure: the same desired and observed state always yield the
//! same ordered actions, and applying a plan then planning again yields
//! nothing.

use pgrole_core::{
	Action, DesiredGrant, DesiredRole, GrantState, PrivilegeSet, RoleChange, RoleState,
};

/// Actions that bring the role described by `actual` to `desired`
///
/// An existing role is altered per category in a fixed order: attributes,
/// connection limit, then password.
///
/// # Examples
///
/// ```
/// use pgrole_core::{DesiredRole, RoleState};
/// use pgrole_engine::plan_role;
///
/// let plan = plan_role(&DesiredRole::deleted("app"), &RoleState::absent());
/// assert!(plan.is_empty());
/// ```
pub fn plan_role(desired: &DesiredRole, actual: &RoleState) -> Vec<Action> {
	if desired.deleting {
		return if actual.exists {
			vec![Action::DropRole {
				name: desired.name.clone(),
			}]
		} else {
			Vec::new()
		};
	}

	if !actual.exists {
		return vec![Action::CreateRole {
			name: desired.name.clone(),
			attributes: desired.attributes,
			connection_limit: desired.connection_limit,
			password: desired.password.clone(),
		}];
	}

	let mut plan = Vec::new();

	let flags = desired.attributes.diff(&actual.attributes);
	if !flags.is_empty() {
		plan.push(alter(desired, RoleChange::Attributes(flags)));
	}

	if desired.connection_limit != actual.connection_limit {
		plan.push(alter(
			desired,
			RoleChange::ConnectionLimit(desired.connection_limit),
		));
	}

	if let Some(password) = &desired.password {
		if !actual.password.matches(&desired.name, password) {
			plan.push(alter(desired, RoleChange::Password(password.clone())));
		}
	}

	plan
}

fn alter(desired: &DesiredRole, change: RoleChange) -> Action {
	Action::AlterRole {
		name: desired.name.clone(),
		change,
	}
}

/// Actions that leave the grantee holding exactly the desired privileges
///
/// Surplus privileges are revoked before missing ones are granted. A
/// deleting grant revokes everything held.
pub fn plan_grant(desired: &DesiredGrant, actual: &GrantState) -> Vec<Action> {
	let held = if actual.is_live() {
		actual.privileges.clone()
	} else {
		PrivilegeSet::new()
	};

	let wanted = if desired.deleting {
		PrivilegeSet::new()
	} else {
		desired.privileges.clone()
	};

	let surplus: PrivilegeSet = held.difference(&wanted).copied().collect();
	let missing: PrivilegeSet = wanted.difference(&held).copied().collect();

	let mut plan = Vec::new();
	if !surplus.is_empty() {
		plan.push(Action::Revoke {
			grantee: desired.grantee.clone(),
			target: desired.target.clone(),
			privileges: surplus,
		});
	}
	if !missing.is_empty() {
		plan.push(Action::Grant {
			grantee: desired.grantee.clone(),
			target: desired.target.clone(),
			privileges: missing,
		});
	}
	plan
}
