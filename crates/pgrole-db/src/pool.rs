//! Pooled administrative connections
//!
//! One `PgPool` is kept per `(endpoint, port, username, database)`. A pool is
//! replaced when the admin password or the sslmode of its key changes, and
//! evicted when a session observes a connection failure.

use crate::config::PoolConfig;
use crate::error::classify;
use crate::session::PgSession;
use async_trait::async_trait;
use parking_lot::Mutex;
use pgrole_core::{ConnectionParams, Connector, Error, Result, SecretString, Session, SslMode};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identity of a pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey {
	pub endpoint: String,
	pub port: u16,
	pub username: String,
	pub database: String,
}

impl From<&ConnectionParams> for PoolKey {
	fn from(params: &ConnectionParams) -> Self {
		Self {
			endpoint: params.endpoint.clone(),
			port: params.port,
			username: params.username.clone(),
			database: params.database.clone(),
		}
	}
}

impl fmt::Display for PoolKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}@{}:{}/{}",
			self.username, self.endpoint, self.port, self.database
		)
	}
}

struct PoolEntry {
	pool: PgPool,
	password: SecretString,
	ssl_mode: SslMode,
	generation: u64,
}

impl PoolEntry {
	fn opened_with(&self, params: &ConnectionParams) -> bool {
		self.password == params.password && self.ssl_mode == params.ssl_mode
	}
}

#[derive(Default)]
struct Registry {
	pools: HashMap<PoolKey, PoolEntry>,
	next_generation: u64,
}

/// Shared pool table, also held by sessions for eviction
#[derive(Clone, Default)]
pub(crate) struct PoolRegistry {
	inner: Arc<Mutex<Registry>>,
}

impl PoolRegistry {
	/// Reusable pool for `params`, dropping one opened with other credentials
	/// or another sslmode
	fn lookup(&self, params: &ConnectionParams) -> Option<(PgPool, u64)> {
		let key = PoolKey::from(params);
		let mut registry = self.inner.lock();
		let entry = registry.pools.get(&key)?;
		if entry.opened_with(params) && !entry.pool.is_closed() {
			return Some((entry.pool.clone(), entry.generation));
		}
		if let Some(stale) = registry.pools.remove(&key) {
			if !stale.opened_with(params) {
				tracing::info!(pool = %key, "connection settings changed, replacing pool");
			}
			close_in_background(stale.pool);
		}
		None
	}

	fn insert(&self, params: &ConnectionParams, pool: PgPool) -> u64 {
		let mut registry = self.inner.lock();
		registry.next_generation += 1;
		let generation = registry.next_generation;
		let previous = registry.pools.insert(
			PoolKey::from(params),
			PoolEntry {
				pool,
				password: params.password.clone(),
				ssl_mode: params.ssl_mode,
				generation,
			},
		);
		if let Some(previous) = previous {
			close_in_background(previous.pool);
		}
		generation
	}

	/// Evict the pool of `key` if it is still the one created at `generation`
	pub(crate) fn evict(&self, key: &PoolKey, generation: u64) {
		let mut registry = self.inner.lock();
		let current = registry
			.pools
			.get(key)
			.is_some_and(|entry| entry.generation == generation);
		if current {
			if let Some(entry) = registry.pools.remove(key) {
				tracing::warn!(pool = %key, "evicting pool after connection failure");
				close_in_background(entry.pool);
			}
		}
	}

	fn len(&self) -> usize {
		self.inner.lock().pools.len()
	}

	fn drain(&self) -> Vec<PgPool> {
		self.inner
			.lock()
			.pools
			.drain()
			.map(|(_, entry)| entry.pool)
			.collect()
	}
}

fn close_in_background(pool: PgPool) {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		handle.spawn(async move { pool.close().await });
	}
}

/// [`Connector`] backed by sqlx pools
///
/// # Examples
///
/// ```
/// use pgrole_db::{PgConnector, PoolConfig};
///
/// let connector = PgConnector::new(PoolConfig::new().with_max_connections(2)).unwrap();
/// assert_eq!(connector.pool_count(), 0);
/// ```
pub struct PgConnector {
	config: PoolConfig,
	registry: PoolRegistry,
}

impl PgConnector {
	pub fn new(config: PoolConfig) -> Result<Self> {
		config.validate()?;
		Ok(Self {
			config,
			registry: PoolRegistry::default(),
		})
	}

	pub fn config(&self) -> &PoolConfig {
		&self.config
	}

	/// Number of live pools
	pub fn pool_count(&self) -> usize {
		self.registry.len()
	}

	/// Close every pool, used on shutdown
	pub async fn close_all(&self) {
		for pool in self.registry.drain() {
			pool.close().await;
		}
	}

	async fn open(&self, params: &ConnectionParams) -> Result<PgPool> {
		tracing::debug!(connection = %params, "opening pool");
		PgPoolOptions::new()
			.max_connections(self.config.max_connections)
			.min_connections(self.config.min_connections)
			.acquire_timeout(self.config.acquire_timeout)
			.idle_timeout(self.config.idle_timeout)
			.max_lifetime(self.config.max_lifetime)
			.test_before_acquire(self.config.test_before_acquire)
			.connect_with(self.config.connect_options(params))
			.await
			.map_err(|e| Error::connection(classify(e, &format!("connect to {}", params)).message()))
	}
}

#[async_trait]
impl Connector for PgConnector {
	async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Session>> {
		let key = PoolKey::from(params);
		let (pool, generation) = match self.registry.lookup(params) {
			Some(found) => found,
			None => {
				let pool = self.open(params).await?;
				let generation = self.registry.insert(params, pool.clone());
				(pool, generation)
			}
		};
		Ok(Arc::new(PgSession::new(
			pool,
			key,
			generation,
			self.registry.clone(),
		)))
	}
}

impl fmt::Debug for PgConnector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PgConnector")
			.field("config", &self.config)
			.field("pools", &self.registry.len())
			.finish()
	}
}
