//! Controller passes against the in-memory platform and cluster

use pgrole_core::{
	ConditionStatus, ConditionType, Error, GrantScope, GrantSpec, GrantTarget, Privilege,
	PrivilegeSet, Reason, ReconcileRequest, Resource, ResourceId, ResourceKind,
	ResourceReference, RoleFlag, RolePrivileges, RoleSpec, SecretKeySelector,
};
use pgrole_engine::memory::{MemoryCluster, MemoryPlatform};
use pgrole_engine::{Controller, ControllerConfig, RetryStrategy};
use rstest::{fixture, rstest};
use std::sync::Arc;
use std::time::Duration;

const RESYNC: Duration = Duration::from_secs(300);
const RETRY: Duration = Duration::from_secs(7);

struct Harness {
	platform: Arc<MemoryPlatform>,
	cluster: MemoryCluster,
	controller: Controller,
}

impl Harness {
	fn with_config(config: ControllerConfig) -> Self {
		let platform = Arc::new(MemoryPlatform::new());
		let cluster = MemoryCluster::new();
		platform.put_secret(
			"db",
			"admin",
			&[
				("endpoint", "pg.db.svc"),
				("port", "5432"),
				("username", "postgres"),
				("password", "admin"),
			],
		);
		platform.put_secret("apps", "app-password", &[("password", "hunter2")]);
		let controller = Controller::new(
			config,
			platform.clone(),
			platform.clone(),
			platform.clone(),
			Arc::new(cluster.clone()),
		)
		.unwrap();
		Self {
			platform,
			cluster,
			controller,
		}
	}

	fn role_spec(&self) -> RoleSpec {
		RoleSpec::new(
			ResourceReference::new("db", "admin"),
			SecretKeySelector::new("apps", "app-password", "password"),
		)
		.with_connection_limit(50)
	}

	fn put_role(&self, name: &str, spec: RoleSpec) -> ReconcileRequest {
		let id = ResourceId::new("apps", name);
		self.platform.put_role(Resource::new(id.clone(), spec));
		ReconcileRequest::new(ResourceKind::Role, id)
	}

	fn put_grant(&self, name: &str, spec: GrantSpec) -> ReconcileRequest {
		let id = ResourceId::new("apps", name);
		self.platform.put_grant(Resource::new(id.clone(), spec));
		ReconcileRequest::new(ResourceKind::Grant, id)
	}

	fn condition_types(&self, request: &ReconcileRequest) -> Vec<(ConditionType, ConditionStatus)> {
		self.platform
			.conditions(request.kind, &request.id)
			.iter()
			.map(|c| (c.type_, c.status))
			.collect()
	}
}

#[fixture]
fn harness() -> Harness {
	Harness::with_config(
		ControllerConfig::new()
			.with_resync_interval(RESYNC)
			.with_retry_strategy(RetryStrategy::FixedDelay { delay: RETRY }),
	)
}

fn table_grant(privileges: &[&str]) -> GrantSpec {
	GrantSpec {
		connect_secret_ref: ResourceReference::new("db", "admin"),
		role: "app".to_string(),
		scope: GrantScope::Table,
		target: "orders".to_string(),
		database: None,
		privileges: privileges.iter().map(|p| p.to_string()).collect(),
	}
}

fn set(values: &[Privilege]) -> PrivilegeSet {
	values.iter().copied().collect()
}

#[rstest]
#[tokio::test]
async fn test_new_role_is_created_and_synced(harness: Harness) {
	let request = harness.put_role("app", harness.role_spec());

	let outcome = harness.controller.reconcile(&request).await;

	assert!(outcome.is_success());
	assert_eq!(outcome.requeue_after, Some(RESYNC));
	let role = harness.cluster.role("app");
	assert!(role.exists);
	assert!(role.attributes.login);
	assert_eq!(role.connection_limit, 50);
	assert!(
		role.password
			.matches("app", &pgrole_core::SecretString::new("hunter2"))
	);
	assert_eq!(
		harness.condition_types(&request),
		vec![
			(ConditionType::Create, ConditionStatus::True),
			(ConditionType::Sync, ConditionStatus::True),
		]
	);
	assert!(harness.platform.role(&request.id).unwrap().has_finalizer);
}

#[rstest]
#[tokio::test]
async fn test_steady_state_issues_nothing(harness: Harness) {
	let request = harness.put_role("app", harness.role_spec());
	harness.controller.reconcile(&request).await;
	let writes = harness.platform.status_writes();
	harness.cluster.clear_executed();

	let outcome = harness.controller.reconcile(&request).await;

	assert!(outcome.is_success());
	assert!(harness.cluster.executed().is_empty());
	assert_eq!(harness.platform.status_writes(), writes);
}

#[rstest]
#[tokio::test]
async fn test_single_attribute_drift_is_corrected(harness: Harness) {
	let request = harness.put_role("app", harness.role_spec());
	harness.controller.reconcile(&request).await;
	harness.cluster.add_role(
		"app",
		RolePrivileges::default().with(RoleFlag::CreateDb, true),
		50,
		Some("hunter2"),
	);
	harness.cluster.clear_executed();

	harness.controller.reconcile(&request).await;

	let executed = harness.cluster.executed();
	assert_eq!(executed.len(), 1);
	assert_eq!(executed[0].to_string(), "alter role app NOCREATEDB");
	assert!(!harness.cluster.role("app").attributes.create_db);
}

#[rstest]
#[tokio::test]
async fn test_rotated_password_is_applied(harness: Harness) {
	let request = harness.put_role("app", harness.role_spec());
	harness.controller.reconcile(&request).await;
	harness
		.platform
		.put_secret("apps", "app-password", &[("password", "s3cret")]);
	harness.cluster.clear_executed();

	harness.controller.reconcile(&request).await;

	let executed = harness.cluster.executed();
	assert_eq!(executed.len(), 1);
	assert_eq!(executed[0].to_string(), "alter role app PASSWORD ***");
}

#[rstest]
#[tokio::test]
async fn test_missing_connection_keys_fail_without_backoff(harness: Harness) {
	harness
		.platform
		.put_secret("db", "admin", &[("endpoint", "pg.db.svc"), ("port", "5432")]);
	let request = harness.put_role("app", harness.role_spec());

	let outcome = harness.controller.reconcile(&request).await;

	let error = outcome.error.unwrap();
	assert!(matches!(error, Error::Validation(_)));
	assert!(error.message().contains("missing required keys: username, password"));
	assert_eq!(outcome.requeue_after, Some(RESYNC));
	assert_eq!(harness.controller.failed_attempts(&request), 0);
	let conditions = harness.platform.conditions(request.kind, &request.id);
	let last = conditions.last().unwrap();
	assert_eq!(last.type_, ConditionType::Fail);
	assert_eq!(last.reason, Reason::ValidationFailed);
	assert!(harness.cluster.connections().is_empty());
}

#[rstest]
#[tokio::test]
async fn test_invalid_spec_never_claims(harness: Harness) {
	let request = harness.put_role("app", harness.role_spec().with_connection_limit(-5));

	let outcome = harness.controller.reconcile(&request).await;

	assert!(matches!(outcome.error, Some(Error::Validation(_))));
	assert!(!harness.platform.role(&request.id).unwrap().has_finalizer);
}

#[rstest]
#[tokio::test]
async fn test_missing_secret_is_not_found_with_backoff(harness: Harness) {
	harness.platform.remove_secret("apps", "app-password");
	let request = harness.put_role("app", harness.role_spec());

	let outcome = harness.controller.reconcile(&request).await;

	assert!(matches!(outcome.error, Some(Error::ResourceNotFound(_))));
	assert_eq!(outcome.requeue_after, Some(RETRY));
	assert_eq!(harness.controller.failed_attempts(&request), 1);
}

#[rstest]
#[tokio::test]
async fn test_unreachable_server_recovers(harness: Harness) {
	let request = harness.put_role("app", harness.role_spec());
	harness.cluster.set_unreachable(true);

	let outcome = harness.controller.reconcile(&request).await;
	assert!(matches!(outcome.error, Some(Error::ConnectionFailed(_))));
	assert_eq!(outcome.requeue_after, Some(RETRY));

	harness.cluster.set_unreachable(false);
	let outcome = harness.controller.reconcile(&request).await;
	assert!(outcome.is_success());
	assert_eq!(harness.controller.failed_attempts(&request), 0);
	assert_eq!(
		harness.condition_types(&request),
		vec![
			(ConditionType::Fail, ConditionStatus::False),
			(ConditionType::Create, ConditionStatus::True),
			(ConditionType::Sync, ConditionStatus::True),
		]
	);
}

#[rstest]
#[tokio::test]
async fn test_deleting_role_drops_and_releases(harness: Harness) {
	let request = harness.put_role("app", harness.role_spec());
	harness.controller.reconcile(&request).await;
	harness
		.platform
		.request_deletion(ResourceKind::Role, &request.id);

	let outcome = harness.controller.reconcile(&request).await;

	assert!(outcome.is_success());
	assert_eq!(outcome.requeue_after, None);
	assert!(!harness.cluster.role("app").exists);
	assert!(harness.platform.role(&request.id).is_none());
}

#[rstest]
#[tokio::test]
async fn test_deleting_absent_role_releases_without_statements(harness: Harness) {
	let id = ResourceId::new("apps", "app");
	let mut resource = Resource::new(id.clone(), harness.role_spec());
	resource.has_finalizer = true;
	resource.deletion_requested = true;
	harness.platform.put_role(resource);

	let outcome = harness
		.controller
		.reconcile(&ReconcileRequest::new(ResourceKind::Role, id.clone()))
		.await;

	assert!(outcome.is_success());
	assert!(harness.cluster.executed().is_empty());
	assert!(harness.platform.role(&id).is_none());
}

#[rstest]
#[tokio::test]
async fn test_deleting_role_with_grants_keeps_finalizer(harness: Harness) {
	let request = harness.put_role("app", harness.role_spec());
	harness.controller.reconcile(&request).await;
	harness.cluster.add_privileges(
		"app",
		GrantTarget::database("postgres"),
		set(&[Privilege::Connect]),
	);
	harness
		.platform
		.request_deletion(ResourceKind::Role, &request.id);

	let outcome = harness.controller.reconcile(&request).await;

	let error = outcome.error.unwrap();
	assert!(matches!(error, Error::Execution(_)));
	assert!(error.message().contains("2BP01"));
	assert_eq!(outcome.requeue_after, Some(RETRY));
	let resource = harness.platform.role(&request.id).unwrap();
	assert!(resource.has_finalizer);
	let last = resource.conditions.last().unwrap();
	assert_eq!(last.type_, ConditionType::Delete);
	assert_eq!(last.status, ConditionStatus::False);
	assert!(harness.cluster.role("app").exists);
}

#[rstest]
#[tokio::test]
async fn test_repeated_failing_deletion_keeps_history_and_backs_off() {
	let harness = Harness::with_config(
		ControllerConfig::new()
			.with_resync_interval(RESYNC)
			.with_retry_strategy(RetryStrategy::ExponentialBackoff {
				initial_delay: Duration::from_secs(1),
				max_delay: Duration::from_secs(60),
			}),
	);
	let request = harness.put_role("app", harness.role_spec());
	harness.controller.reconcile(&request).await;
	harness.cluster.add_privileges(
		"app",
		GrantTarget::database("postgres"),
		set(&[Privilege::Connect]),
	);
	harness
		.platform
		.request_deletion(ResourceKind::Role, &request.id);

	let first = harness.controller.reconcile(&request).await;
	let writes = harness.platform.status_writes();
	let history = harness.condition_types(&request);
	let second = harness.controller.reconcile(&request).await;

	assert!(matches!(second.error, Some(Error::Execution(_))));
	assert_eq!(harness.platform.status_writes(), writes);
	assert_eq!(harness.condition_types(&request), history);
	assert_eq!(
		&history[history.len() - 2..],
		&[
			(ConditionType::Fail, ConditionStatus::False),
			(ConditionType::Delete, ConditionStatus::False),
		]
	);
	assert!(second.requeue_after > first.requeue_after);
	assert_eq!(harness.controller.failed_attempts(&request), 2);
}

#[rstest]
#[tokio::test]
async fn test_deletion_without_finalizer_is_released(harness: Harness) {
	let id = ResourceId::new("apps", "app");
	let mut resource = Resource::new(id.clone(), harness.role_spec());
	resource.deletion_requested = true;
	harness.platform.put_role(resource);

	let outcome = harness
		.controller
		.reconcile(&ReconcileRequest::new(ResourceKind::Role, id))
		.await;

	assert_eq!(outcome, pgrole_engine::ReconcileOutcome::done());
	assert!(harness.cluster.connections().is_empty());
}

#[rstest]
#[tokio::test]
async fn test_missing_resource_is_done(harness: Harness) {
	let outcome = harness
		.controller
		.reconcile(&ReconcileRequest::role("apps", "ghost"))
		.await;
	assert_eq!(outcome, pgrole_engine::ReconcileOutcome::done());
}

#[rstest]
#[tokio::test]
async fn test_grant_adds_missing_privilege(harness: Harness) {
	harness.cluster.add_table("public", "orders");
	harness
		.cluster
		.add_role("app", RolePrivileges::default(), 50, Some("hunter2"));
	let target = GrantTarget::table("public", "orders");
	harness
		.cluster
		.add_privileges("app", target.clone(), set(&[Privilege::Select]));
	let request = harness.put_grant("app-orders", table_grant(&["SELECT", "INSERT"]));

	let outcome = harness.controller.reconcile(&request).await;

	assert!(outcome.is_success());
	let executed = harness.cluster.executed();
	assert_eq!(executed.len(), 1);
	assert_eq!(
		executed[0].to_string(),
		"grant INSERT on table public.orders to app"
	);
	assert_eq!(
		harness.cluster.privileges("app", &target),
		set(&[Privilege::Select, Privilege::Insert])
	);
	assert_eq!(
		harness.condition_types(&request),
		vec![
			(ConditionType::Create, ConditionStatus::True),
			(ConditionType::Sync, ConditionStatus::True),
		]
	);

	harness.cluster.clear_executed();
	harness.controller.reconcile(&request).await;
	assert!(harness.cluster.executed().is_empty());
}

#[rstest]
#[tokio::test]
async fn test_grant_uses_database_override(harness: Harness) {
	harness.cluster.add_database("billing");
	harness.cluster.add_table("sales", "invoices");
	harness
		.cluster
		.add_role("app", RolePrivileges::default(), 50, None);
	let mut spec = table_grant(&["ALL"]);
	spec.target = "sales.invoices".to_string();
	spec.database = Some("billing".to_string());
	let request = harness.put_grant("app-invoices", spec);

	let outcome = harness.controller.reconcile(&request).await;

	assert!(outcome.is_success());
	let connections = harness.cluster.connections();
	assert_eq!(connections.last().unwrap().database, "billing");
	assert_eq!(
		harness
			.cluster
			.privileges("app", &GrantTarget::table("sales", "invoices"))
			.len(),
		GrantScope::Table.privileges().len()
	);
}

#[rstest]
#[tokio::test]
async fn test_grant_for_missing_role_fails_execution(harness: Harness) {
	let request = harness.put_grant(
		"app-db",
		GrantSpec {
			connect_secret_ref: ResourceReference::new("db", "admin"),
			role: "app".to_string(),
			scope: GrantScope::Database,
			target: "postgres".to_string(),
			database: None,
			privileges: vec!["CONNECT".to_string()],
		},
	);

	let outcome = harness.controller.reconcile(&request).await;

	let error = outcome.error.unwrap();
	assert!(matches!(error, Error::Execution(_)));
	assert!(error.message().contains("42704"));
}

#[rstest]
#[tokio::test]
async fn test_deleting_grant_revokes_everything(harness: Harness) {
	harness.cluster.add_table("public", "orders");
	harness
		.cluster
		.add_role("app", RolePrivileges::default(), 50, None);
	let target = GrantTarget::table("public", "orders");
	let request = harness.put_grant("app-orders", table_grant(&["SELECT"]));
	harness.controller.reconcile(&request).await;
	harness
		.cluster
		.add_privileges("app", target.clone(), set(&[Privilege::Update]));
	harness
		.platform
		.request_deletion(ResourceKind::Grant, &request.id);

	let outcome = harness.controller.reconcile(&request).await;

	assert!(outcome.is_success());
	assert!(harness.cluster.privileges("app", &target).is_empty());
	assert!(harness.platform.grant(&request.id).is_none());
}

#[rstest]
#[tokio::test]
async fn test_invalid_grant_reports_every_problem(harness: Harness) {
	let mut spec = table_grant(&["SELECT", "CONNECT", "FLY"]);
	spec.role = String::new();
	let request = harness.put_grant("broken", spec);

	let outcome = harness.controller.reconcile(&request).await;

	let message = outcome.error.unwrap().to_string();
	assert!(message.contains("role must not be empty"));
	assert!(message.contains("FLY"));
	assert!(message.contains("CONNECT"));
}

#[rstest]
#[tokio::test]
async fn test_failed_status_write_backs_off(harness: Harness) {
	let request = harness.put_role("app", harness.role_spec());
	harness.platform.reject_status_writes(true);

	let outcome = harness.controller.reconcile(&request).await;

	assert!(matches!(outcome.error, Some(Error::ConnectionFailed(_))));
	assert_eq!(outcome.requeue_after, Some(RETRY));
	assert!(harness.cluster.role("app").exists);
}

#[rstest]
#[tokio::test]
async fn test_pass_timeout_is_connection_failure() {
	let harness = Harness::with_config(
		ControllerConfig::new()
			.with_reconcile_timeout(Duration::from_millis(50))
			.with_retry_strategy(RetryStrategy::FixedDelay { delay: RETRY }),
	);
	harness
		.cluster
		.set_execute_delay(Some(Duration::from_secs(5)));
	let request = harness.put_role("app", harness.role_spec());

	let outcome = harness.controller.reconcile(&request).await;

	let error = outcome.error.unwrap();
	assert!(matches!(error, Error::ConnectionFailed(_)));
	assert!(error.message().contains("timed out"));
	assert_eq!(outcome.requeue_after, Some(RETRY));
	assert!(!harness.cluster.role("app").exists);
	// claimed before the first mutation
	assert!(harness.platform.role(&request.id).unwrap().has_finalizer);
}
