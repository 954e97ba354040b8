//! Database seams
//!
//! A [`Connector`] hands out [`Session`]s for a set of connection
//! parameters. A session inspects catalog state and applies actions.

use crate::action::Action;
use crate::credentials::ConnectionParams;
use crate::error::Result;
use crate::grant::GrantTarget;
use crate::state::{GrantState, RoleState};
use async_trait::async_trait;
use std::sync::Arc;

/// Opens (or reuses) administrative database handles
#[async_trait]
pub trait Connector: Send + Sync {
	/// Failures are always [`Error::ConnectionFailed`](crate::Error::ConnectionFailed)
	async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Session>>;
}

/// An administrative handle on one database
#[async_trait]
pub trait Session: Send + Sync {
	/// Current state of `role`, [`RoleState::absent`] when it does not exist
	async fn inspect_role(&self, role: &str) -> Result<RoleState>;

	/// Privileges `grantee` holds on `target`
	///
	/// Missing grantee or object yields an empty state rather than an error.
	async fn inspect_grant(&self, grantee: &str, target: &GrantTarget) -> Result<GrantState>;

	/// Apply one action
	async fn execute(&self, action: &Action) -> Result<()>;
}
