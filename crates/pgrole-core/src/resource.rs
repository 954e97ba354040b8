//! Resource identity and references

use crate::condition::Condition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Finalizer guarding a resource until its database object has been removed
pub const FINALIZER: &str = "postgresql.facets.cloud/finalizer";

/// Kind of declarative resource handled by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
	Role,
	Grant,
}

impl ResourceKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Role => "Role",
			Self::Grant => "Grant",
		}
	}
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Namespace + name of a resource
///
/// # Examples
///
/// ```
/// use pgrole_core::ResourceId;
///
/// let id = ResourceId::new("apps", "billing");
/// assert_eq!(id.to_string(), "apps/billing");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
	pub namespace: String,
	pub name: String,
}

impl ResourceId {
	pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			namespace: namespace.into(),
			name: name.into(),
		}
	}
}

impl fmt::Display for ResourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.namespace, self.name)
	}
}

/// A request to reconcile one resource, as delivered by the watch layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileRequest {
	pub kind: ResourceKind,
	pub id: ResourceId,
}

impl ReconcileRequest {
	pub fn new(kind: ResourceKind, id: ResourceId) -> Self {
		Self { kind, id }
	}

	pub fn role(namespace: impl Into<String>, name: impl Into<String>) -> Self {
		Self::new(ResourceKind::Role, ResourceId::new(namespace, name))
	}

	pub fn grant(namespace: impl Into<String>, name: impl Into<String>) -> Self {
		Self::new(ResourceKind::Grant, ResourceId::new(namespace, name))
	}
}

impl fmt::Display for ReconcileRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}", self.kind, self.id)
	}
}

/// Reference to a platform object in an arbitrary namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ResourceReference {
	/// Name of the referenced object
	pub name: String,
	/// Namespace of the referenced object
	pub namespace: String,
}

impl ResourceReference {
	pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			namespace: namespace.into(),
		}
	}
}

impl fmt::Display for ResourceReference {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.namespace, self.name)
	}
}

/// Reference to one key of a secret in an arbitrary namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct SecretKeySelector {
	/// Name of the secret
	pub name: String,
	/// Namespace of the secret
	pub namespace: String,
	/// Key inside the secret
	pub key: String,
}

impl SecretKeySelector {
	pub fn new(
		namespace: impl Into<String>,
		name: impl Into<String>,
		key: impl Into<String>,
	) -> Self {
		Self {
			name: name.into(),
			namespace: namespace.into(),
			key: key.into(),
		}
	}
}

impl fmt::Display for SecretKeySelector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}[{}]", self.namespace, self.name, self.key)
	}
}

/// A declarative resource as read from the platform
#[derive(Debug, Clone, PartialEq)]
pub struct Resource<S> {
	pub id: ResourceId,
	pub generation: Option<i64>,
	pub spec: S,
	/// The platform has marked the resource for deletion
	pub deletion_requested: bool,
	/// [`FINALIZER`] is present on the resource
	pub has_finalizer: bool,
	/// Conditions currently stored on the resource status
	pub conditions: Vec<Condition>,
}

impl<S> Resource<S> {
	pub fn new(id: ResourceId, spec: S) -> Self {
		Self {
			id,
			generation: None,
			spec,
			deletion_requested: false,
			has_finalizer: false,
			conditions: Vec::new(),
		}
	}
}
