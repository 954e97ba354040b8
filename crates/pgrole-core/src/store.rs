//! Platform seams
//!
//! The engine reads resources and secrets and writes status through these
//! traits. The Kubernetes adapter implements them against the API server;
//! `pgrole_engine::memory` implements them in memory for tests.

use crate::condition::Condition;
use crate::credentials::SecretData;
use crate::error::Result;
use crate::grant::GrantSpec;
use crate::resource::{Resource, ResourceId, ResourceKind};
use crate::role::RoleSpec;
use async_trait::async_trait;

/// Read-only secret lookup
#[async_trait]
pub trait SecretStore: Send + Sync {
	/// Fetch a secret's entries, `None` when the secret does not exist
	async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>>;
}

/// Writes the condition history of a resource
#[async_trait]
pub trait StatusSink: Send + Sync {
	/// Replace the stored conditions of the resource with `conditions`
	async fn write_conditions(
		&self,
		kind: ResourceKind,
		id: &ResourceId,
		conditions: &[Condition],
	) -> Result<()>;
}

/// Fetches declarative resources and manages their finalizer
#[async_trait]
pub trait ResourceStore: Send + Sync {
	/// `None` when the resource no longer exists
	async fn get_role(&self, id: &ResourceId) -> Result<Option<Resource<RoleSpec>>>;

	async fn get_grant(&self, id: &ResourceId) -> Result<Option<Resource<GrantSpec>>>;

	/// Add [`FINALIZER`](crate::FINALIZER), a no-op when already present
	async fn add_finalizer(&self, kind: ResourceKind, id: &ResourceId) -> Result<()>;

	/// Remove [`FINALIZER`](crate::FINALIZER), a no-op when already absent
	async fn remove_finalizer(&self, kind: ResourceKind, id: &ResourceId) -> Result<()>;
}
