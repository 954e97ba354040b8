//! Platform seams backed by the Kubernetes API

use crate::crd::{Declared, Grant, Role};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use pgrole_core::{
	Condition, Error, FINALIZER, GrantSpec, Resource, ResourceId, ResourceKind, ResourceStore,
	Result, RoleSpec, SecretData, SecretStore, StatusSink,
};
use serde_json::json;

/// Map a client error onto the engine taxonomy
///
/// A missing object is `ResourceNotFound`; everything else is retried as a
/// connection failure.
pub fn kube_error(context: &str, error: kube::Error) -> Error {
	match &error {
		kube::Error::Api(response) if response.code == 404 => {
			Error::not_found(format!("{}: {}", context, response.message))
		}
		_ => Error::connection(format!("{}: {}", context, error)),
	}
}

/// Secrets, resources and status on one cluster
#[derive(Clone)]
pub struct KubeStore {
	client: Client,
}

impl KubeStore {
	pub fn new(client: Client) -> Self {
		Self { client }
	}

	fn api<K: Declared>(&self, namespace: &str) -> Api<K> {
		Api::namespaced(self.client.clone(), namespace)
	}

	async fn fetch<K: Declared>(&self, id: &ResourceId) -> Result<Option<Resource<K::Spec>>> {
		let object = self
			.api::<K>(&id.namespace)
			.get_opt(&id.name)
			.await
			.map_err(|e| kube_error(&format!("get {} {}", K::KIND, id), e))?;
		Ok(object.map(|object| object.to_resource()))
	}

	/// Rewrite the finalizer list, guarded by the observed resource version
	async fn update_finalizers<K: Declared>(&self, id: &ResourceId, add: bool) -> Result<()> {
		let api = self.api::<K>(&id.namespace);
		let context = format!("update finalizers of {} {}", K::KIND, id);
		let Some(object) = api
			.get_opt(&id.name)
			.await
			.map_err(|e| kube_error(&context, e))?
		else {
			return Ok(());
		};

		let present = object.finalizers().iter().any(|f| f == FINALIZER);
		if present == add {
			return Ok(());
		}
		let mut finalizers: Vec<String> = object
			.finalizers()
			.iter()
			.filter(|f| f.as_str() != FINALIZER)
			.cloned()
			.collect();
		if add {
			finalizers.push(FINALIZER.to_string());
		}

		let patch = json!({
			"metadata": {
				"finalizers": finalizers,
				"resourceVersion": object.resource_version(),
			}
		});
		api.patch(&id.name, &PatchParams::default(), &Patch::Merge(&patch))
			.await
			.map_err(|e| kube_error(&context, e))?;
		tracing::debug!(kind = %K::KIND, resource = %id, add, "finalizer updated");
		Ok(())
	}

	async fn patch_conditions<K: Declared>(
		&self,
		id: &ResourceId,
		conditions: &[Condition],
	) -> Result<()> {
		let patch = json!({ "status": { "conditions": conditions } });
		self.api::<K>(&id.namespace)
			.patch_status(&id.name, &PatchParams::default(), &Patch::Merge(&patch))
			.await
			.map_err(|e| kube_error(&format!("update status of {} {}", K::KIND, id), e))?;
		Ok(())
	}
}

#[async_trait]
impl SecretStore for KubeStore {
	async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>> {
		let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
		let secret = api
			.get_opt(name)
			.await
			.map_err(|e| kube_error(&format!("get secret {}/{}", namespace, name), e))?;
		Ok(secret.map(|secret| {
			secret
				.data
				.unwrap_or_default()
				.into_iter()
				.map(|(key, value)| (key, value.0))
				.collect()
		}))
	}
}

#[async_trait]
impl ResourceStore for KubeStore {
	async fn get_role(&self, id: &ResourceId) -> Result<Option<Resource<RoleSpec>>> {
		self.fetch::<Role>(id).await
	}

	async fn get_grant(&self, id: &ResourceId) -> Result<Option<Resource<GrantSpec>>> {
		self.fetch::<Grant>(id).await
	}

	async fn add_finalizer(&self, kind: ResourceKind, id: &ResourceId) -> Result<()> {
		match kind {
			ResourceKind::Role => self.update_finalizers::<Role>(id, true).await,
			ResourceKind::Grant => self.update_finalizers::<Grant>(id, true).await,
		}
	}

	async fn remove_finalizer(&self, kind: ResourceKind, id: &ResourceId) -> Result<()> {
		match kind {
			ResourceKind::Role => self.update_finalizers::<Role>(id, false).await,
			ResourceKind::Grant => self.update_finalizers::<Grant>(id, false).await,
		}
	}
}

#[async_trait]
impl StatusSink for KubeStore {
	async fn write_conditions(
		&self,
		kind: ResourceKind,
		id: &ResourceId,
		conditions: &[Condition],
	) -> Result<()> {
		match kind {
			ResourceKind::Role => self.patch_conditions::<Role>(id, conditions).await,
			ResourceKind::Grant => self.patch_conditions::<Grant>(id, conditions).await,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use kube::core::ErrorResponse;
	use rstest::rstest;

	fn api_error(code: u16) -> kube::Error {
		kube::Error::Api(ErrorResponse {
			status: "Failure".to_string(),
			message: "roles.postgresql.facets.cloud \"app\" not found".to_string(),
			reason: "NotFound".to_string(),
			code,
		})
	}

	#[rstest]
	#[case(404, true)]
	#[case(409, false)]
	#[case(500, false)]
	fn test_kube_error_mapping(#[case] code: u16, #[case] not_found: bool) {
		let error = kube_error("get Role apps/app", api_error(code));
		assert_eq!(matches!(error, Error::ResourceNotFound(_)), not_found);
		assert!(error.is_retryable());
		assert!(error.message().starts_with("get Role apps/app: "));
	}
}
