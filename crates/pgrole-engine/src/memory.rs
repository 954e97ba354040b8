//! In-memory seams
//!
//! [`MemoryPlatform`] stands in for the orchestration platform (resources,
//! secrets and status) and [`MemoryCluster`] for a PostgreSQL server. The
//! cluster follows the server's rules that matter to reconciliation: a role
//! holding privileges cannot be dropped, privileges need an existing grantee
//! and object, and passwords are stored as SCRAM verifiers.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use pgrole_core::password::{md5_verifier, scram_sha256_verifier};
use pgrole_core::{
	Action, Condition, ConnectionParams, Connector, Error, GrantSpec, GrantState, GrantTarget,
	PasswordVerifier, PrivilegeSet, Resource, ResourceId, ResourceKind, ResourceStore, Result,
	RoleChange, RolePrivileges, RoleSpec, RoleState, SecretData, SecretStore, Session,
	StatusSink,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

const SCRAM_ITERATIONS: u32 = 4096;

#[derive(Default)]
struct PlatformState {
	secrets: HashMap<(String, String), SecretData>,
	roles: BTreeMap<ResourceId, Resource<RoleSpec>>,
	grants: BTreeMap<ResourceId, Resource<GrantSpec>>,
	status_writes: usize,
	reject_status_writes: bool,
}

struct Meta<'a> {
	has_finalizer: &'a mut bool,
	deletion_requested: bool,
	conditions: &'a mut Vec<Condition>,
}

impl PlatformState {
	fn meta(&mut self, kind: ResourceKind, id: &ResourceId) -> Option<Meta<'_>> {
		match kind {
			ResourceKind::Role => self.roles.get_mut(id).map(|r| Meta {
				has_finalizer: &mut r.has_finalizer,
				deletion_requested: r.deletion_requested,
				conditions: &mut r.conditions,
			}),
			ResourceKind::Grant => self.grants.get_mut(id).map(|r| Meta {
				has_finalizer: &mut r.has_finalizer,
				deletion_requested: r.deletion_requested,
				conditions: &mut r.conditions,
			}),
		}
	}

	fn remove(&mut self, kind: ResourceKind, id: &ResourceId) {
		match kind {
			ResourceKind::Role => {
				self.roles.remove(id);
			}
			ResourceKind::Grant => {
				self.grants.remove(id);
			}
		}
	}
}

/// Resources, secrets and status held in memory
///
/// Removing the finalizer of a resource marked for deletion removes the
/// resource, the way the platform garbage-collects it.
#[derive(Default)]
pub struct MemoryPlatform {
	state: RwLock<PlatformState>,
}

impl MemoryPlatform {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn put_secret(&self, namespace: &str, name: &str, entries: &[(&str, &str)]) {
		let data = entries
			.iter()
			.map(|(key, value)| (key.to_string(), value.as_bytes().to_vec()))
			.collect();
		self.state
			.write()
			.secrets
			.insert((namespace.to_string(), name.to_string()), data);
	}

	pub fn remove_secret(&self, namespace: &str, name: &str) {
		self.state
			.write()
			.secrets
			.remove(&(namespace.to_string(), name.to_string()));
	}

	pub fn put_role(&self, resource: Resource<RoleSpec>) {
		self.state.write().roles.insert(resource.id.clone(), resource);
	}

	pub fn put_grant(&self, resource: Resource<GrantSpec>) {
		self.state.write().grants.insert(resource.id.clone(), resource);
	}

	pub fn role(&self, id: &ResourceId) -> Option<Resource<RoleSpec>> {
		self.state.read().roles.get(id).cloned()
	}

	pub fn grant(&self, id: &ResourceId) -> Option<Resource<GrantSpec>> {
		self.state.read().grants.get(id).cloned()
	}

	/// Mark a resource for deletion; without a finalizer it disappears at once
	pub fn request_deletion(&self, kind: ResourceKind, id: &ResourceId) {
		let mut state = self.state.write();
		let has_finalizer = match kind {
			ResourceKind::Role => state.roles.get_mut(id).map(|r| {
				r.deletion_requested = true;
				r.has_finalizer
			}),
			ResourceKind::Grant => state.grants.get_mut(id).map(|r| {
				r.deletion_requested = true;
				r.has_finalizer
			}),
		};
		if has_finalizer == Some(false) {
			state.remove(kind, id);
		}
	}

	/// Conditions currently stored on a resource
	pub fn conditions(&self, kind: ResourceKind, id: &ResourceId) -> Vec<Condition> {
		self.state
			.write()
			.meta(kind, id)
			.map(|meta| meta.conditions.clone())
			.unwrap_or_default()
	}

	pub fn status_writes(&self) -> usize {
		self.state.read().status_writes
	}

	pub fn reject_status_writes(&self, reject: bool) {
		self.state.write().reject_status_writes = reject;
	}
}

#[async_trait]
impl SecretStore for MemoryPlatform {
	async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>> {
		Ok(self
			.state
			.read()
			.secrets
			.get(&(namespace.to_string(), name.to_string()))
			.cloned())
	}
}

#[async_trait]
impl ResourceStore for MemoryPlatform {
	async fn get_role(&self, id: &ResourceId) -> Result<Option<Resource<RoleSpec>>> {
		Ok(self.role(id))
	}

	async fn get_grant(&self, id: &ResourceId) -> Result<Option<Resource<GrantSpec>>> {
		Ok(self.grant(id))
	}

	async fn add_finalizer(&self, kind: ResourceKind, id: &ResourceId) -> Result<()> {
		let mut state = self.state.write();
		let meta = state
			.meta(kind, id)
			.ok_or_else(|| Error::not_found(format!("{} {} not found", kind, id)))?;
		*meta.has_finalizer = true;
		Ok(())
	}

	async fn remove_finalizer(&self, kind: ResourceKind, id: &ResourceId) -> Result<()> {
		let mut state = self.state.write();
		let deletion_requested = match state.meta(kind, id) {
			Some(meta) => {
				*meta.has_finalizer = false;
				meta.deletion_requested
			}
			None => return Ok(()),
		};
		if deletion_requested {
			state.remove(kind, id);
		}
		Ok(())
	}
}

#[async_trait]
impl StatusSink for MemoryPlatform {
	async fn write_conditions(
		&self,
		kind: ResourceKind,
		id: &ResourceId,
		conditions: &[Condition],
	) -> Result<()> {
		let mut state = self.state.write();
		if state.reject_status_writes {
			return Err(Error::connection("status update rejected"));
		}
		let meta = state
			.meta(kind, id)
			.ok_or_else(|| Error::not_found(format!("{} {} not found", kind, id)))?;
		*meta.conditions = conditions.to_vec();
		state.status_writes += 1;
		Ok(())
	}
}

#[derive(Debug, Clone)]
struct MemoryRole {
	attributes: RolePrivileges,
	connection_limit: i32,
	verifier: Option<String>,
}

#[derive(Default)]
struct ClusterState {
	roles: BTreeMap<String, MemoryRole>,
	databases: BTreeSet<String>,
	tables: BTreeSet<(String, String)>,
	grants: BTreeMap<(String, GrantTarget), PrivilegeSet>,
	executed: Vec<Action>,
	connections: Vec<ConnectionParams>,
	unreachable: bool,
	authid_unreadable: bool,
	fail_next: Option<Error>,
	execute_delay: Option<Duration>,
}

/// A PostgreSQL server held in memory, shared by every session it hands out
#[derive(Clone)]
pub struct MemoryCluster {
	state: Arc<Mutex<ClusterState>>,
}

impl Default for MemoryCluster {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryCluster {
	/// A cluster with the `postgres` database
	pub fn new() -> Self {
		let mut state = ClusterState::default();
		state.databases.insert("postgres".to_string());
		Self {
			state: Arc::new(Mutex::new(state)),
		}
	}

	pub fn add_database(&self, name: &str) {
		self.state.lock().databases.insert(name.to_string());
	}

	pub fn add_table(&self, schema: &str, name: &str) {
		self.state
			.lock()
			.tables
			.insert((schema.to_string(), name.to_string()));
	}

	/// Create a role directly, bypassing the executed-action log
	pub fn add_role(
		&self,
		name: &str,
		attributes: RolePrivileges,
		connection_limit: i32,
		password: Option<&str>,
	) {
		let role = MemoryRole {
			attributes,
			connection_limit,
			verifier: password.map(|p| verifier(name, p)),
		};
		self.state.lock().roles.insert(name.to_string(), role);
	}

	/// Grant directly, bypassing the executed-action log
	pub fn add_privileges(&self, grantee: &str, target: GrantTarget, privileges: PrivilegeSet) {
		self.state
			.lock()
			.grants
			.entry((grantee.to_string(), target))
			.or_default()
			.extend(privileges);
	}

	/// Observed state of a role, as a session would report it
	pub fn role(&self, name: &str) -> RoleState {
		role_state(&self.state.lock(), name)
	}

	/// Privileges currently held by `grantee` on `target`
	pub fn privileges(&self, grantee: &str, target: &GrantTarget) -> PrivilegeSet {
		self.state
			.lock()
			.grants
			.get(&(grantee.to_string(), target.clone()))
			.cloned()
			.unwrap_or_default()
	}

	/// Actions executed so far, in order
	pub fn executed(&self) -> Vec<Action> {
		self.state.lock().executed.clone()
	}

	pub fn clear_executed(&self) {
		self.state.lock().executed.clear();
	}

	/// Connection parameters of every `connect` call so far
	pub fn connections(&self) -> Vec<ConnectionParams> {
		self.state.lock().connections.clone()
	}

	pub fn set_unreachable(&self, unreachable: bool) {
		self.state.lock().unreachable = unreachable;
	}

	/// Report password verifiers as unreadable, like a non-superuser admin
	pub fn set_authid_unreadable(&self, unreadable: bool) {
		self.state.lock().authid_unreadable = unreadable;
	}

	/// Fail the next executed action with `error`
	pub fn fail_next_execute(&self, error: Error) {
		self.state.lock().fail_next = Some(error);
	}

	/// Delay every executed action
	pub fn set_execute_delay(&self, delay: Option<Duration>) {
		self.state.lock().execute_delay = delay;
	}
}

fn verifier(role: &str, password: &str) -> String {
	scram_sha256_verifier(password, role.as_bytes(), SCRAM_ITERATIONS)
		.unwrap_or_else(|| md5_verifier(role, password))
}

fn role_state(state: &ClusterState, name: &str) -> RoleState {
	match state.roles.get(name) {
		Some(role) => RoleState::present(
			role.attributes,
			role.connection_limit,
			if state.authid_unreadable {
				PasswordVerifier::Unreadable
			} else {
				PasswordVerifier::from_catalog(role.verifier.clone())
			},
		),
		None => RoleState::absent(),
	}
}

fn object_exists(state: &ClusterState, target: &GrantTarget) -> bool {
	match target {
		GrantTarget::Database { name } => state.databases.contains(name),
		GrantTarget::Table { schema, name } => {
			state.tables.contains(&(schema.clone(), name.clone()))
		}
	}
}

fn missing_role(name: &str) -> Error {
	Error::execution(format!("role \"{}\" does not exist (SQLSTATE 42704)", name))
}

fn missing_object(target: &GrantTarget) -> Error {
	match target {
		GrantTarget::Database { name } => Error::execution(format!(
			"database \"{}\" does not exist (SQLSTATE 3D000)",
			name
		)),
		GrantTarget::Table { schema, name } => Error::execution(format!(
			"relation \"{}.{}\" does not exist (SQLSTATE 42P01)",
			schema, name
		)),
	}
}

fn apply(state: &mut ClusterState, action: &Action) -> Result<()> {
	match action {
		Action::CreateRole {
			name,
			attributes,
			connection_limit,
			password,
		} => {
			let existing = state.roles.get(name).and_then(|r| r.verifier.clone());
			state.roles.insert(
				name.clone(),
				MemoryRole {
					attributes: *attributes,
					connection_limit: *connection_limit,
					verifier: password
						.as_ref()
						.map(|p| verifier(name, p.expose_secret()))
						.or(existing),
				},
			);
		}
		Action::AlterRole { name, change } => {
			let role = state.roles.get_mut(name).ok_or_else(|| missing_role(name))?;
			match change {
				RoleChange::Attributes(flags) => {
					for (flag, enabled) in flags {
						role.attributes.set(*flag, *enabled);
					}
				}
				RoleChange::ConnectionLimit(limit) => role.connection_limit = *limit,
				RoleChange::Password(password) => {
					role.verifier = Some(verifier(name, password.expose_secret()))
				}
			}
		}
		Action::DropRole { name } => {
			let dependents = state
				.grants
				.iter()
				.filter(|((grantee, _), privileges)| grantee == name && !privileges.is_empty())
				.count();
			if dependents > 0 {
				return Err(Error::execution(format!(
					"role \"{}\" cannot be dropped because some objects depend on it: \
					 privileges on {} objects (SQLSTATE 2BP01)",
					name, dependents
				)));
			}
			state.roles.remove(name);
		}
		Action::Grant {
			grantee,
			target,
			privileges,
		} => {
			if !state.roles.contains_key(grantee) {
				return Err(missing_role(grantee));
			}
			if !object_exists(state, target) {
				return Err(missing_object(target));
			}
			state
				.grants
				.entry((grantee.clone(), target.clone()))
				.or_default()
				.extend(privileges.iter().copied());
		}
		Action::Revoke {
			grantee,
			target,
			privileges,
		} => {
			if !state.roles.contains_key(grantee) {
				return Err(missing_role(grantee));
			}
			if !object_exists(state, target) {
				return Err(missing_object(target));
			}
			let key = (grantee.clone(), target.clone());
			if let Some(held) = state.grants.get_mut(&key) {
				held.retain(|p| !privileges.contains(p));
				if held.is_empty() {
					state.grants.remove(&key);
				}
			}
		}
	}
	Ok(())
}

#[async_trait]
impl Connector for MemoryCluster {
	async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Session>> {
		let mut state = self.state.lock();
		if state.unreachable {
			return Err(Error::connection(format!(
				"connect to {}: connection refused",
				params
			)));
		}
		if !state.databases.contains(&params.database) {
			return Err(Error::connection(format!(
				"connect to {}: database \"{}\" does not exist (SQLSTATE 3D000)",
				params, params.database
			)));
		}
		state.connections.push(params.clone());
		Ok(Arc::new(MemorySession {
			cluster: self.clone(),
		}))
	}
}

struct MemorySession {
	cluster: MemoryCluster,
}

#[async_trait]
impl Session for MemorySession {
	async fn inspect_role(&self, role: &str) -> Result<RoleState> {
		Ok(role_state(&self.cluster.state.lock(), role))
	}

	async fn inspect_grant(&self, grantee: &str, target: &GrantTarget) -> Result<GrantState> {
		let state = self.cluster.state.lock();
		let grantee_exists = state.roles.contains_key(grantee);
		let object_exists = object_exists(&state, target);
		let privileges = if grantee_exists && object_exists {
			state
				.grants
				.get(&(grantee.to_string(), target.clone()))
				.cloned()
				.unwrap_or_default()
		} else {
			PrivilegeSet::new()
		};
		Ok(GrantState {
			object_exists,
			grantee_exists,
			privileges,
		})
	}

	async fn execute(&self, action: &Action) -> Result<()> {
		let delay = self.cluster.state.lock().execute_delay;
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let mut state = self.cluster.state.lock();
		if let Some(error) = state.fail_next.take() {
			return Err(error);
		}
		apply(&mut state, action)?;
		state.executed.push(action.clone());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pgrole_core::{Privilege, RoleFlag, SecretString, SslMode};
	use rstest::rstest;

	fn params(database: &str) -> ConnectionParams {
		ConnectionParams {
			endpoint: "memory".to_string(),
			port: 5432,
			username: "admin".to_string(),
			password: SecretString::new("admin"),
			database: database.to_string(),
			ssl_mode: SslMode::Disable,
		}
	}

	#[tokio::test]
	async fn test_role_round_trip_through_session() {
		let cluster = MemoryCluster::new();
		let session = cluster.connect(&params("postgres")).await.unwrap();
		session
			.execute(&Action::CreateRole {
				name: "app".to_string(),
				attributes: RolePrivileges::default().with(RoleFlag::CreateDb, true),
				connection_limit: 5,
				password: Some(SecretString::new("pw")),
			})
			.await
			.unwrap();

		let state = session.inspect_role("app").await.unwrap();
		assert!(state.attributes.create_db);
		assert_eq!(state.connection_limit, 5);
		assert!(state.password.matches("app", &SecretString::new("pw")));
	}

	#[tokio::test]
	async fn test_drop_with_privileges_fails() {
		let cluster = MemoryCluster::new();
		cluster.add_role("app", RolePrivileges::default(), 100, None);
		cluster.add_privileges(
			"app",
			GrantTarget::database("postgres"),
			[Privilege::Connect].into_iter().collect(),
		);
		let session = cluster.connect(&params("postgres")).await.unwrap();
		let err = session
			.execute(&Action::DropRole {
				name: "app".to_string(),
			})
			.await
			.unwrap_err();
		assert!(err.message().contains("2BP01"));
		assert!(cluster.role("app").exists);
	}

	#[rstest]
	#[tokio::test]
	async fn test_connect_requires_database() {
		let cluster = MemoryCluster::new();
		let err = cluster.connect(&params("billing")).await.err().unwrap();
		assert!(matches!(err, Error::ConnectionFailed(_)));
		cluster.add_database("billing");
		assert!(cluster.connect(&params("billing")).await.is_ok());
	}

	#[tokio::test]
	async fn test_finalizer_removal_deletes_marked_resource() {
		let platform = MemoryPlatform::new();
		let id = ResourceId::new("apps", "app");
		let mut resource = Resource::new(
			id.clone(),
			RoleSpec::new(
				pgrole_core::ResourceReference::new("db", "conn"),
				pgrole_core::SecretKeySelector::new("apps", "pw", "password"),
			),
		);
		resource.has_finalizer = true;
		platform.put_role(resource);

		platform.request_deletion(ResourceKind::Role, &id);
		assert!(platform.role(&id).is_some());
		platform
			.remove_finalizer(ResourceKind::Role, &id)
			.await
			.unwrap();
		assert!(platform.role(&id).is_none());
	}
}
