//! Per-resource mutual exclusion

use parking_lot::Mutex;
use pgrole_core::ReconcileRequest;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

type LockTable = HashMap<ReconcileRequest, Arc<tokio::sync::Mutex<()>>>;

/// Async mutex per resource identity
///
/// Entries are created on demand and dropped once nobody holds or waits for
/// them.
///
/// # Examples
///
/// ```
/// use pgrole_core::ReconcileRequest;
/// use pgrole_engine::KeyedLocks;
///
/// # #[tokio::main]
/// # async fn main() {
/// let locks = KeyedLocks::new();
/// let request = ReconcileRequest::role("apps", "billing");
/// {
///     let _guard = locks.lock(&request).await;
///     assert!(locks.try_lock(&request).is_none());
/// }
/// assert!(locks.try_lock(&request).is_some());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
	table: Arc<Mutex<LockTable>>,
}

/// Held lock, released on drop
#[derive(Debug)]
pub struct KeyedLockGuard {
	key: ReconcileRequest,
	table: Arc<Mutex<LockTable>>,
	guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
	pub fn new() -> Self {
		Self::default()
	}

	fn entry(&self, key: &ReconcileRequest) -> Arc<tokio::sync::Mutex<()>> {
		self.table.lock().entry(key.clone()).or_default().clone()
	}

	/// Wait until `key` is free and take it
	pub async fn lock(&self, key: &ReconcileRequest) -> KeyedLockGuard {
		let guard = self.entry(key).lock_owned().await;
		KeyedLockGuard {
			key: key.clone(),
			table: self.table.clone(),
			guard: Some(guard),
		}
	}

	/// Take `key` only if it is free right now
	pub fn try_lock(&self, key: &ReconcileRequest) -> Option<KeyedLockGuard> {
		let mutex = self.entry(key);
		match Arc::clone(&mutex).try_lock_owned() {
			Ok(guard) => Some(KeyedLockGuard {
				key: key.clone(),
				table: self.table.clone(),
				guard: Some(guard),
			}),
			Err(_) => {
				drop(mutex);
				self.cleanup(key);
				None
			}
		}
	}

	/// Number of identities with a live lock entry
	pub fn len(&self) -> usize {
		self.table.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn cleanup(&self, key: &ReconcileRequest) {
		remove_if_unused(&self.table, key);
	}
}

fn remove_if_unused(table: &Mutex<LockTable>, key: &ReconcileRequest) {
	let mut table = table.lock();
	// the table's own reference is the last one
	if table.get(key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
		table.remove(key);
	}
}

impl Drop for KeyedLockGuard {
	fn drop(&mut self) {
		drop(self.guard.take());
		remove_if_unused(&self.table, &self.key);
	}
}
