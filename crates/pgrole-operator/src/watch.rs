//! Watch loops feeding the work queue

use crate::crd::Declared;
use futures::StreamExt;
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::watcher::{self, Event};
use kube_runtime::WatchStreamExt;
use pgrole_core::{ReconcileRequest, ResourceId};
use pgrole_engine::WorkQueue;
use std::collections::HashMap;

/// Metadata that decides whether an event needs a pass
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observed {
	generation: Option<i64>,
	deleting: bool,
	finalizers: Vec<String>,
}

impl Observed {
	fn of<K: Declared>(object: &K) -> Self {
		Self {
			generation: object.meta().generation,
			deleting: object.meta().deletion_timestamp.is_some(),
			finalizers: object.finalizers().to_vec(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
	Skip,
	Submit,
	Preempt,
}

/// Decide what an applied object asks of the queue
///
/// Status-only updates leave generation and finalizers untouched and are
/// skipped, so a pass writing its own status does not wake itself up. Only
/// the first sighting of a deletion marker preempts.
fn trigger(previous: Option<&Observed>, current: &Observed) -> Trigger {
	match previous {
		Some(previous) if previous == current => Trigger::Skip,
		Some(previous) if current.deleting && !previous.deleting => Trigger::Preempt,
		None if current.deleting => Trigger::Preempt,
		_ => Trigger::Submit,
	}
}

/// Queue a pass for every object of kind `K` seen by the watcher
///
/// Objects newly marked for deletion preempt the pass in flight. Watch errors
/// are logged and the stream resumes with backoff.
pub async fn run<K: Declared>(api: Api<K>, queue: WorkQueue) {
	let mut stream = watcher::watcher(api, watcher::Config::default())
		.default_backoff()
		.boxed();
	let mut seen: HashMap<ResourceId, Observed> = HashMap::new();

	while let Some(event) = stream.next().await {
		if queue.is_shut_down() {
			break;
		}

		match event {
			Ok(Event::Apply(object)) => {
				let request = request_for(&object);
				let current = Observed::of(&object);
				match trigger(seen.get(&request.id), &current) {
					Trigger::Skip => {}
					Trigger::Submit => {
						queue.submit(request.clone());
					}
					Trigger::Preempt => {
						queue.preempt(request.clone());
					}
				}
				seen.insert(request.id, current);
			}
			Ok(Event::InitApply(object)) => {
				let request = request_for(&object);
				let current = Observed::of(&object);
				// relists resubmit; a known deletion is never preempted twice
				if trigger(seen.get(&request.id), &current) == Trigger::Preempt {
					queue.preempt(request.clone());
				} else {
					queue.submit(request.clone());
				}
				seen.insert(request.id, current);
			}
			Ok(Event::Delete(object)) => {
				let request = request_for(&object);
				tracing::debug!(kind = %K::KIND, resource = %request.id, "object removed");
				seen.remove(&request.id);
			}
			Ok(Event::Init) | Ok(Event::InitDone) => {}
			Err(e) => tracing::warn!(kind = %K::KIND, error = %e, "watch stream error"),
		}
	}
	tracing::info!(kind = %K::KIND, "watch stopped");
}

fn request_for<K: Declared>(object: &K) -> ReconcileRequest {
	ReconcileRequest::new(
		K::KIND,
		ResourceId::new(object.namespace().unwrap_or_default(), object.name_any()),
	)
}
