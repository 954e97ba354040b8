//! Per-key work queue
//!
//! Requests for the same resource are coalesced: while a pass is running,
//! further submissions only mark the key dirty and one more pass follows.
//! Different resources run in parallel up to a fixed limit. Each key keeps
//! at most one requeue timer; any new submission replaces it.

use crate::controller::Reconciler;
use parking_lot::Mutex;
use pgrole_core::ReconcileRequest;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

struct Timer {
	generation: u64,
	handle: AbortHandle,
}

#[derive(Default)]
struct Entry {
	/// Cancellation of the pass in flight
	running: Option<CancellationToken>,
	/// Another pass is wanted once the current one ends
	dirty: bool,
	timer: Option<Timer>,
}

struct Inner {
	reconciler: Arc<dyn Reconciler>,
	entries: Mutex<HashMap<ReconcileRequest, Entry>>,
	permits: Arc<Semaphore>,
	shutdown: CancellationToken,
	tracker: TaskTracker,
	next_timer: AtomicU64,
}

/// Schedules reconciliation passes
///
/// Must be used from within a Tokio runtime.
#[derive(Clone)]
pub struct WorkQueue {
	inner: Arc<Inner>,
}

impl WorkQueue {
	pub fn new(reconciler: Arc<dyn Reconciler>, max_concurrent: usize) -> Self {
		Self {
			inner: Arc::new(Inner {
				reconciler,
				entries: Mutex::new(HashMap::new()),
				permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
				shutdown: CancellationToken::new(),
				tracker: TaskTracker::new(),
				next_timer: AtomicU64::new(0),
			}),
		}
	}

	/// Queue a pass for `request`
	///
	/// Returns `false` once the queue has been shut down.
	pub fn submit(&self, request: ReconcileRequest) -> bool {
		self.inner.submit(request, false)
	}

	/// Queue a pass for `request`, cancelling the one in flight
	///
	/// Used when a resource is marked for deletion so that a long create
	/// does not delay the cleanup.
	pub fn preempt(&self, request: ReconcileRequest) -> bool {
		self.inner.submit(request, true)
	}

	/// Keys with a pass in flight, a pass pending or a requeue timer
	pub fn len(&self) -> usize {
		self.inner.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Passes currently running or waiting for a permit
	pub fn in_flight(&self) -> usize {
		self.inner
			.entries
			.lock()
			.values()
			.filter(|entry| entry.running.is_some())
			.count()
	}

	/// Whether `request` has a requeue timer armed
	pub fn is_scheduled(&self, request: &ReconcileRequest) -> bool {
		self.inner
			.entries
			.lock()
			.get(request)
			.is_some_and(|entry| entry.timer.is_some())
	}

	pub fn is_shut_down(&self) -> bool {
		self.inner.shutdown.is_cancelled()
	}

	/// Stop accepting work, cancel running passes and wait for them to end
	pub async fn shutdown(&self) {
		self.inner.shutdown.cancel();
		self.inner.tracker.close();
		self.inner.tracker.wait().await;
		self.inner.entries.lock().clear();
		tracing::info!("work queue stopped");
	}
}

impl Inner {
	fn submit(self: &Arc<Self>, request: ReconcileRequest, preempt: bool) -> bool {
		if self.shutdown.is_cancelled() {
			return false;
		}

		let mut entries = self.entries.lock();
		let entry = entries.entry(request.clone()).or_default();
		if let Some(timer) = entry.timer.take() {
			timer.handle.abort();
		}

		match &entry.running {
			Some(cancel) => {
				entry.dirty = true;
				if preempt {
					tracing::debug!(kind = %request.kind, resource = %request.id, "preempting pass");
					cancel.cancel();
				}
			}
			None => {
				let cancel = self.shutdown.child_token();
				entry.running = Some(cancel.clone());
				let inner = Arc::clone(self);
				self.tracker.spawn(inner.work(request, cancel));
			}
		}
		true
	}

	async fn work(self: Arc<Self>, request: ReconcileRequest, mut cancel: CancellationToken) {
		loop {
			let permit = tokio::select! {
				biased;
				_ = cancel.cancelled() => None,
				permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
			};
			let outcome = match permit {
				Some(_permit) => Some(self.reconciler.reconcile(&request, &cancel).await),
				None => None,
			};

			let mut entries = self.entries.lock();
			let Some(entry) = entries.get_mut(&request) else {
				return;
			};
			if entry.dirty && !self.shutdown.is_cancelled() {
				entry.dirty = false;
				cancel = self.shutdown.child_token();
				entry.running = Some(cancel.clone());
				continue;
			}

			entry.running = None;
			entry.dirty = false;
			match outcome.and_then(|outcome| outcome.requeue_after) {
				Some(after) if !self.shutdown.is_cancelled() => {
					self.schedule(entry, &request, after);
				}
				_ => {
					if entry.timer.is_none() {
						entries.remove(&request);
					}
				}
			}
			return;
		}
	}

	fn schedule(self: &Arc<Self>, entry: &mut Entry, request: &ReconcileRequest, after: Duration) {
		if let Some(timer) = entry.timer.take() {
			timer.handle.abort();
		}
		let generation = self.next_timer.fetch_add(1, Ordering::Relaxed);
		let inner = Arc::clone(self);
		let request = request.clone();
		let handle = self.tracker.spawn(async move {
			tokio::select! {
				_ = inner.shutdown.cancelled() => {}
				_ = tokio::time::sleep(after) => inner.fire(request, generation),
			}
		});
		entry.timer = Some(Timer {
			generation,
			handle: handle.abort_handle(),
		});
	}

	fn fire(self: &Arc<Self>, request: ReconcileRequest, generation: u64) {
		{
			let mut entries = self.entries.lock();
			match entries.get_mut(&request) {
				Some(entry)
					if entry
						.timer
						.as_ref()
						.is_some_and(|timer| timer.generation == generation) =>
				{
					entry.timer = None;
				}
				_ => return,
			}
		}
		self.submit(request, false);
	}
}
