//! `Role` and `Grant` custom resources
//!
//! Both kinds live in `postgresql.facets.cloud/v1alpha1`. Their spec is the
//! engine's declarative type as-is; the status carries the condition history.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResource, CustomResourceExt, ResourceExt};
use kube_runtime::wait::{await_condition, conditions};
use pgrole_core::{Condition, FINALIZER, GrantSpec, Resource, ResourceId, ResourceKind, RoleSpec};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

pub const GROUP: &str = "postgresql.facets.cloud";

const FIELD_MANAGER: &str = "pgrole-operator";
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// A PostgreSQL role
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
	group = "postgresql.facets.cloud",
	version = "v1alpha1",
	kind = "Role",
	plural = "roles",
	namespaced,
	status = "ResourceStatus",
	printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.conditions[-1:].status"}"#,
	printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[-1:].reason"}"#,
	printcolumn = r#"{"name":"Message", "type":"string", "priority":1, "jsonPath":".status.conditions[-1:].message"}"#,
	printcolumn = r#"{"name":"Last Transition Time", "type":"string", "priority":1, "jsonPath":".status.conditions[-1:].lastTransitionTime"}"#,
	printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct RoleResourceSpec {
	#[serde(flatten)]
	pub role: RoleSpec,
}

/// Privileges of a role on a database or table
#[derive(CustomResource, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
	group = "postgresql.facets.cloud",
	version = "v1alpha1",
	kind = "Grant",
	plural = "grants",
	namespaced,
	status = "ResourceStatus",
	printcolumn = r#"{"name":"Role", "type":"string", "jsonPath":".spec.role"}"#,
	printcolumn = r#"{"name":"Target", "type":"string", "jsonPath":".spec.target"}"#,
	printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.conditions[-1:].status"}"#,
	printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[-1:].reason"}"#,
	printcolumn = r#"{"name":"Last Transition Time", "type":"string", "priority":1, "jsonPath":".status.conditions[-1:].lastTransitionTime"}"#,
	printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct GrantResourceSpec {
	#[serde(flatten)]
	pub grant: GrantSpec,
}

/// Status shared by both kinds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
	/// Condition history, oldest first
	#[serde(default)]
	pub conditions: Vec<Condition>,
}

/// A custom resource the engine reconciles
pub trait Declared:
	kube::Resource<DynamicType = (), Scope = NamespaceResourceScope>
	+ Clone
	+ Debug
	+ DeserializeOwned
	+ Send
	+ Sync
	+ 'static
{
	type Spec;

	const KIND: ResourceKind;

	fn declared_spec(&self) -> Self::Spec;

	fn conditions(&self) -> Vec<Condition>;

	/// The engine's view of this object
	fn to_resource(&self) -> Resource<Self::Spec> {
		let meta = self.meta();
		Resource {
			id: ResourceId::new(self.namespace().unwrap_or_default(), self.name_any()),
			generation: meta.generation,
			spec: self.declared_spec(),
			deletion_requested: meta.deletion_timestamp.is_some(),
			has_finalizer: self.finalizers().iter().any(|f| f == FINALIZER),
			conditions: self.conditions(),
		}
	}
}

impl Declared for Role {
	type Spec = RoleSpec;

	const KIND: ResourceKind = ResourceKind::Role;

	fn declared_spec(&self) -> RoleSpec {
		self.spec.role.clone()
	}

	fn conditions(&self) -> Vec<Condition> {
		self.status
			.as_ref()
			.map(|s| s.conditions.clone())
			.unwrap_or_default()
	}
}

impl Declared for Grant {
	type Spec = GrantSpec;

	const KIND: ResourceKind = ResourceKind::Grant;

	fn declared_spec(&self) -> GrantSpec {
		self.spec.grant.clone()
	}

	fn conditions(&self) -> Vec<Condition> {
		self.status
			.as_ref()
			.map(|s| s.conditions.clone())
			.unwrap_or_default()
	}
}

/// Definitions of every kind served by the operator
pub fn crds() -> Vec<CustomResourceDefinition> {
	vec![Role::crd(), Grant::crd()]
}

/// The definitions as a multi-document YAML stream
pub fn crd_yaml() -> Result<String, serde_yaml::Error> {
	let documents = crds()
		.iter()
		.map(serde_yaml::to_string)
		.collect::<Result<Vec<_>, _>>()?;
	Ok(documents.join("---\n"))
}

/// Register the definitions with the API server and wait until they are served
pub async fn install(client: Client) -> anyhow::Result<()> {
	let api: Api<CustomResourceDefinition> = Api::all(client);
	let params = PatchParams::apply(FIELD_MANAGER).force();

	for crd in crds() {
		let name = crd.name_any();
		api.patch(&name, &params, &Patch::Apply(&crd)).await?;
		tokio::time::timeout(
			ESTABLISH_TIMEOUT,
			await_condition(api.clone(), &name, conditions::is_crd_established()),
		)
		.await??;
		tracing::info!(crd = %name, "custom resource definition installed");
	}
	Ok(())
}
