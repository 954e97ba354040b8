//! Administrative session on one pool

use crate::error::classify;
use crate::introspect;
use crate::pool::{PoolKey, PoolRegistry};
use crate::sql;
use async_trait::async_trait;
use pgrole_core::{Action, Error, GrantState, GrantTarget, Result, RoleState, Session};
use sqlx::{Executor, PgConnection, PgPool};

const BACKEND_PID_QUERY: &str = "SELECT pg_backend_pid()";
const CANCEL_BACKEND_QUERY: &str = "SELECT pg_cancel_backend($1)";

/// [`Session`] backed by a pooled `PgPool`
///
/// A connection-class failure evicts the pool so that the next pass
/// reconnects from scratch. Each statement runs on its own connection; if the
/// `execute` future is dropped before the statement returns, the server is
/// asked to cancel it through `pg_cancel_backend`.
pub struct PgSession {
	pool: PgPool,
	key: PoolKey,
	generation: u64,
	registry: PoolRegistry,
}

impl PgSession {
	pub(crate) fn new(pool: PgPool, key: PoolKey, generation: u64, registry: PoolRegistry) -> Self {
		Self {
			pool,
			key,
			generation,
			registry,
		}
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	pub fn key(&self) -> &PoolKey {
		&self.key
	}

	fn observe<T>(&self, result: Result<T>) -> Result<T> {
		if let Err(Error::ConnectionFailed(_)) = &result {
			self.registry.evict(&self.key, self.generation);
		}
		result
	}

	async fn run(&self, action: &Action) -> Result<()> {
		let role_exists = match action {
			Action::CreateRole { name, .. } => {
				let exists = introspect::role_exists(&self.pool, name).await?;
				if exists {
					tracing::info!(role = %name, "role already exists, applying declared attributes");
				}
				exists
			}
			_ => true,
		};

		let statement = sql::statement(action, role_exists);
		let mut conn = self
			.pool
			.acquire()
			.await
			.map_err(|e| classify(e, "acquire connection"))?;
		let pid = backend_pid(&mut conn).await?;

		let guard = CancelOnDrop::new(self.pool.clone(), pid);
		let result = conn.execute(sqlx::raw_sql(&statement)).await;
		guard.disarm();
		result.map_err(|e| classify(e, &action.to_string()))?;
		Ok(())
	}
}

async fn backend_pid(conn: &mut PgConnection) -> Result<i32> {
	sqlx::query_scalar::<_, i32>(BACKEND_PID_QUERY)
		.fetch_one(conn)
		.await
		.map_err(|e| classify(e, "read backend pid"))
}

/// Ask the server to cancel whatever backend `pid` is running
pub(crate) async fn cancel_backend(pool: &PgPool, pid: i32) -> Result<bool> {
	sqlx::query_scalar::<_, bool>(CANCEL_BACKEND_QUERY)
		.bind(pid)
		.fetch_one(pool)
		.await
		.map_err(|e| classify(e, &format!("cancel backend {}", pid)))
}

/// Cancels the statement on backend `pid` unless disarmed first
struct CancelOnDrop {
	pool: PgPool,
	pid: i32,
	armed: bool,
}

impl CancelOnDrop {
	fn new(pool: PgPool, pid: i32) -> Self {
		Self {
			pool,
			pid,
			armed: true,
		}
	}

	fn disarm(mut self) {
		self.armed = false;
	}
}

impl Drop for CancelOnDrop {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}
		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			return;
		};
		let pool = self.pool.clone();
		let pid = self.pid;
		handle.spawn(async move {
			match cancel_backend(&pool, pid).await {
				Ok(signalled) => tracing::info!(pid, signalled, "cancelled in-flight statement"),
				Err(e) => tracing::warn!(pid, error = %e, "failed to cancel in-flight statement"),
			}
		});
	}
}

#[async_trait]
impl Session for PgSession {
	async fn inspect_role(&self, role: &str) -> Result<RoleState> {
		self.observe(introspect::role_state(&self.pool, role).await)
	}

	async fn inspect_grant(&self, grantee: &str, target: &GrantTarget) -> Result<GrantState> {
		self.observe(introspect::grant_state(&self.pool, grantee, target).await)
	}

	async fn execute(&self, action: &Action) -> Result<()> {
		self.observe(self.run(action).await)
	}
}
