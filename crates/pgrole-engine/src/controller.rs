//! Reconciliation controller
//!
//! One pass per request: fetch the resource, bring the database in line and
//! record the outcome as conditions. Per-resource failures never escape a
//! pass; they become a `Fail` condition and a requeue delay.
//!
//! Status follows `Create → Sync ⇄ Fail`, with `Delete` reachable from any
//! state once deletion is requested. The finalizer is added before the first
//! database mutation and removed only after the database object is gone.

use crate::backoff::Backoff;
use crate::config::ControllerConfig;
use crate::executor::execute_plan;
use crate::locks::KeyedLocks;
use crate::planner::{plan_grant, plan_role};
use async_trait::async_trait;
use pgrole_core::{
	Condition, ConditionStatus, ConditionType, Conditions, Connector, CredentialResolver,
	DesiredGrant, DesiredRole, Error, GrantSpec, PrivilegeSet, ReconcileRequest, Resource,
	ResourceKind, ResourceStore, Result, RoleSpec, SecretStore, StatusSink,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of one pass as seen by the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
	/// When to look at the resource again, `None` to wait for the next event
	pub requeue_after: Option<Duration>,
	/// The failure of this pass, already recorded in the status
	pub error: Option<Error>,
}

impl ReconcileOutcome {
	pub fn done() -> Self {
		Self::default()
	}

	pub fn requeue(after: Duration) -> Self {
		Self {
			requeue_after: Some(after),
			error: None,
		}
	}

	pub fn failed(error: Error, requeue_after: Option<Duration>) -> Self {
		Self {
			requeue_after,
			error: Some(error),
		}
	}

	pub fn is_success(&self) -> bool {
		self.error.is_none()
	}
}

/// Something that can run a pass for a request
#[async_trait]
pub trait Reconciler: Send + Sync {
	async fn reconcile(
		&self,
		request: &ReconcileRequest,
		cancel: &CancellationToken,
	) -> ReconcileOutcome;
}

/// Successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
	Applied { created: bool, applied: usize },
	Deleted { applied: usize },
	/// Deletion requested on a resource this controller never claimed
	Released,
}

pub struct Controller {
	config: ControllerConfig,
	resources: Arc<dyn ResourceStore>,
	status: Arc<dyn StatusSink>,
	credentials: CredentialResolver,
	connector: Arc<dyn Connector>,
	locks: KeyedLocks,
	backoff: Backoff,
}

impl Controller {
	pub fn new(
		config: ControllerConfig,
		resources: Arc<dyn ResourceStore>,
		status: Arc<dyn StatusSink>,
		secrets: Arc<dyn SecretStore>,
		connector: Arc<dyn Connector>,
	) -> Result<Self> {
		config.validate()?;
		Ok(Self {
			backoff: Backoff::new(config.retry_strategy),
			config,
			resources,
			status,
			credentials: CredentialResolver::new(secrets),
			connector,
			locks: KeyedLocks::new(),
		})
	}

	pub fn config(&self) -> &ControllerConfig {
		&self.config
	}

	/// Consecutive failed passes of `request`
	pub fn failed_attempts(&self, request: &ReconcileRequest) -> u32 {
		self.backoff.attempts(request)
	}

	/// Run one pass for `request`
	pub async fn reconcile(&self, request: &ReconcileRequest) -> ReconcileOutcome {
		self.reconcile_with(request, &CancellationToken::new()).await
	}

	/// Run one pass for `request`, aborting when `cancel` fires
	///
	/// Passes of the same resource are serialized.
	pub async fn reconcile_with(
		&self,
		request: &ReconcileRequest,
		cancel: &CancellationToken,
	) -> ReconcileOutcome {
		let _guard = self.locks.lock(request).await;
		tracing::debug!(kind = %request.kind, resource = %request.id, "reconciling");
		match request.kind {
			ResourceKind::Role => self.reconcile_role(request, cancel).await,
			ResourceKind::Grant => self.reconcile_grant(request, cancel).await,
		}
	}

	async fn reconcile_role(
		&self,
		request: &ReconcileRequest,
		cancel: &CancellationToken,
	) -> ReconcileOutcome {
		let resource = match self.resources.get_role(&request.id).await {
			Ok(Some(resource)) => resource,
			Ok(None) => return self.gone(request),
			Err(e) => return self.fetch_failed(request, e),
		};
		let result = self.bounded(cancel, self.role_pass(&resource, cancel)).await;
		self.finish(request, &resource, result, cancel).await
	}

	async fn reconcile_grant(
		&self,
		request: &ReconcileRequest,
		cancel: &CancellationToken,
	) -> ReconcileOutcome {
		let resource = match self.resources.get_grant(&request.id).await {
			Ok(Some(resource)) => resource,
			Ok(None) => return self.gone(request),
			Err(e) => return self.fetch_failed(request, e),
		};
		let result = self.bounded(cancel, self.grant_pass(&resource, cancel)).await;
		self.finish(request, &resource, result, cancel).await
	}

	async fn role_pass(&self, resource: &Resource<RoleSpec>, cancel: &CancellationToken) -> Result<Pass> {
		let name = resource.id.name.as_str();
		let spec = &resource.spec;

		if resource.deletion_requested {
			if !resource.has_finalizer {
				return Ok(Pass::Released);
			}
			let params = self.credentials.resolve(&spec.connect_secret_ref).await?;
			let session = self.connector.connect(&params).await?;
			let actual = session.inspect_role(name).await?;
			let plan = plan_role(&DesiredRole::deleted(name), &actual);
			let applied = execute_plan(session.as_ref(), &plan, cancel)
				.await
				.into_result()?;
			return Ok(Pass::Deleted { applied });
		}

		spec.validate(name)?;
		self.claim(ResourceKind::Role, resource).await?;

		let params = self.credentials.resolve(&spec.connect_secret_ref).await?;
		let password = self
			.credentials
			.resolve_password(&spec.password_secret_ref)
			.await?;
		let session = self.connector.connect(&params).await?;
		let actual = session.inspect_role(name).await?;
		let created = !actual.exists;
		let desired = DesiredRole::from_spec(name, spec, password);
		// password comparison runs PBKDF2 with the stored iteration count
		let plan = tokio::task::spawn_blocking(move || plan_role(&desired, &actual))
			.await
			.map_err(|e| Error::execution(format!("planning role {} failed: {}", name, e)))?;
		let applied = execute_plan(session.as_ref(), &plan, cancel)
			.await
			.into_result()?;

		Ok(Pass::Applied { created, applied })
	}

	async fn grant_pass(
		&self,
		resource: &Resource<GrantSpec>,
		cancel: &CancellationToken,
	) -> Result<Pass> {
		let spec = &resource.spec;
		let resolved = spec.resolve();

		if resource.deletion_requested {
			if !resource.has_finalizer {
				return Ok(Pass::Released);
			}
			// an invalid spec never produced a privilege
			let Ok((target, _)) = resolved else {
				return Ok(Pass::Deleted { applied: 0 });
			};
			let desired = DesiredGrant::new(spec.role.clone(), target, PrivilegeSet::new()).deleting();
			let applied = self.apply_grant(spec, &desired, cancel).await?;
			return Ok(Pass::Deleted { applied });
		}

		let (target, privileges) = resolved?;
		self.claim(ResourceKind::Grant, resource).await?;

		let desired = DesiredGrant::new(spec.role.clone(), target, privileges);
		let applied = self.apply_grant(spec, &desired, cancel).await?;
		let created = Conditions::new(resource.conditions.clone())
			.latest_of(ConditionType::Create)
			.is_none();

		Ok(Pass::Applied { created, applied })
	}

	async fn apply_grant(
		&self,
		spec: &GrantSpec,
		desired: &DesiredGrant,
		cancel: &CancellationToken,
	) -> Result<usize> {
		let mut params = self.credentials.resolve(&spec.connect_secret_ref).await?;
		if let Some(database) = spec.connection_database() {
			params = params.with_database(database);
		}
		let session = self.connector.connect(&params).await?;
		let actual = session
			.inspect_grant(&desired.grantee, &desired.target)
			.await?;
		let plan = plan_grant(desired, &actual);
		execute_plan(session.as_ref(), &plan, cancel)
			.await
			.into_result()
	}

	async fn claim<S>(&self, kind: ResourceKind, resource: &Resource<S>) -> Result<()> {
		if !resource.has_finalizer {
			self.resources.add_finalizer(kind, &resource.id).await?;
		}
		Ok(())
	}

	async fn bounded<T>(
		&self,
		cancel: &CancellationToken,
		pass: impl Future<Output = Result<T>>,
	) -> Result<T> {
		let timeout = self.config.reconcile_timeout;
		tokio::select! {
			biased;
			_ = cancel.cancelled() => Err(Error::connection("reconciliation cancelled")),
			result = tokio::time::timeout(timeout, pass) => match result {
				Ok(result) => result,
				Err(_) => Err(Error::connection(format!(
					"reconciliation timed out after {:?}",
					timeout
				))),
			},
		}
	}

	async fn finish<S>(
		&self,
		request: &ReconcileRequest,
		resource: &Resource<S>,
		result: Result<Pass>,
		cancel: &CancellationToken,
	) -> ReconcileOutcome {
		let kind = request.kind;
		let id = &request.id;
		let mut conditions = Conditions::new(resource.conditions.clone());

		match result {
			Ok(Pass::Released) => {
				self.backoff.reset(request);
				ReconcileOutcome::done()
			}
			Ok(Pass::Deleted { applied }) => {
				conditions.record(Condition::deleted(format!(
					"{} {} removed from the database",
					kind, id.name
				)));
				let written = self.write_status(request, &conditions).await;
				if let Err(e) = self.resources.remove_finalizer(kind, id).await {
					tracing::warn!(kind = %kind, resource = %id, error = %e, "failed to remove finalizer");
					return ReconcileOutcome::failed(e, Some(self.backoff.next_delay(request)));
				}
				tracing::info!(kind = %kind, resource = %id, actions = applied, "deleted");
				self.backoff.reset(request);
				match written {
					Ok(()) => ReconcileOutcome::done(),
					Err(e) => ReconcileOutcome::failed(e, Some(self.backoff.next_delay(request))),
				}
			}
			Ok(Pass::Applied { created, applied }) => {
				let changed = if created {
					let created = conditions.record(Condition::created(format!(
						"{} {} created",
						kind, id.name
					)));
					let synced = conditions.record(synced(kind, &id.name));
					created || synced
				} else if applied == 0 && conditions.is_synced() {
					false
				} else {
					conditions.record(synced(kind, &id.name))
				};

				if changed {
					if let Err(e) = self.write_status(request, &conditions).await {
						return ReconcileOutcome::failed(e, Some(self.backoff.next_delay(request)));
					}
				}
				if applied > 0 {
					tracing::info!(kind = %kind, resource = %id, actions = applied, "reconciled");
				} else {
					tracing::debug!(kind = %kind, resource = %id, "in sync");
				}
				self.backoff.reset(request);
				ReconcileOutcome::requeue(self.config.resync_interval)
			}
			Err(error) if cancel.is_cancelled() => {
				tracing::debug!(kind = %kind, resource = %id, error = %error, "pass cancelled");
				ReconcileOutcome::failed(error, None)
			}
			Err(error) => {
				tracing::warn!(
					kind = %kind,
					resource = %id,
					reason = %error.reason(),
					error = %error,
					"reconciliation failed"
				);
				let mut failure = vec![Condition::failed(error.reason(), error.message())];
				if resource.deletion_requested {
					failure.push(Condition::new(
						ConditionType::Delete,
						ConditionStatus::False,
						error.reason(),
						error.message(),
					));
				}
				let written = if conditions.record_all(failure) {
					self.write_status(request, &conditions).await
				} else {
					Ok(())
				};

				let requeue = if error.is_retryable() || written.is_err() {
					self.backoff.next_delay(request)
				} else {
					self.backoff.reset(request);
					self.config.resync_interval
				};
				ReconcileOutcome::failed(error, Some(requeue))
			}
		}
	}

	async fn write_status(&self, request: &ReconcileRequest, conditions: &Conditions) -> Result<()> {
		let result = self
			.status
			.write_conditions(request.kind, &request.id, conditions.as_slice())
			.await;
		if let Err(e) = &result {
			tracing::warn!(kind = %request.kind, resource = %request.id, error = %e, "failed to write status");
		}
		result
	}

	fn gone(&self, request: &ReconcileRequest) -> ReconcileOutcome {
		tracing::debug!(kind = %request.kind, resource = %request.id, "resource no longer exists");
		self.backoff.reset(request);
		ReconcileOutcome::done()
	}

	fn fetch_failed(&self, request: &ReconcileRequest, error: Error) -> ReconcileOutcome {
		tracing::warn!(kind = %request.kind, resource = %request.id, error = %error, "failed to fetch resource");
		ReconcileOutcome::failed(error, Some(self.backoff.next_delay(request)))
	}
}

fn synced(kind: ResourceKind, name: &str) -> Condition {
	Condition::synced(format!("{} {} is in sync", kind, name))
}

#[async_trait]
impl Reconciler for Controller {
	async fn reconcile(
		&self,
		request: &ReconcileRequest,
		cancel: &CancellationToken,
	) -> ReconcileOutcome {
		self.reconcile_with(request, cancel).await
	}
}
