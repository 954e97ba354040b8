//! Plan execution

use pgrole_core::{Action, Error, Result, Session};
use tokio_util::sync::CancellationToken;

/// Outcome of running a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
	/// Actions that completed, in order
	pub applied: usize,
	pub total: usize,
	/// The failure that stopped the plan, if any
	pub error: Option<Error>,
}

impl ExecutionReport {
	pub fn is_complete(&self) -> bool {
		self.error.is_none() && self.applied == self.total
	}

	pub fn into_result(self) -> Result<usize> {
		match self.error {
			Some(error) => Err(error),
			None => Ok(self.applied),
		}
	}
}

/// Apply `plan` one action at a time, in order
///
/// The first failure stops the plan; completed actions are not rolled back.
/// Cancellation is checked before each action and races every statement.
pub async fn execute_plan(
	session: &dyn Session,
	plan: &[Action],
	cancel: &CancellationToken,
) -> ExecutionReport {
	let mut applied = 0;
	for action in plan {
		if cancel.is_cancelled() {
			return report(applied, plan, Some(cancelled(applied, plan)));
		}

		let result = tokio::select! {
			biased;
			_ = cancel.cancelled() => Err(cancelled(applied, plan)),
			result = session.execute(action) => result,
		};

		match result {
			Ok(()) => {
				tracing::info!(action = action.kind(), statement = %action, "applied");
				applied += 1;
			}
			Err(e) => {
				tracing::warn!(action = action.kind(), statement = %action, error = %e, "action failed");
				return report(applied, plan, Some(e));
			}
		}
	}
	report(applied, plan, None)
}

fn cancelled(applied: usize, plan: &[Action]) -> Error {
	Error::connection(format!(
		"cancelled after {} of {} actions",
		applied,
		plan.len()
	))
}

fn report(applied: usize, plan: &[Action], error: Option<Error>) -> ExecutionReport {
	ExecutionReport {
		applied,
		total: plan.len(),
		error,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use parking_lot::Mutex;
	use pgrole_core::{GrantState, GrantTarget, RoleState};
	use rstest::rstest;

	#[derive(Default)]
	struct Recorder {
		executed: Mutex<Vec<String>>,
		fail_on: Option<String>,
		cancel_on_execute: Option<CancellationToken>,
	}

	#[async_trait]
	impl Session for Recorder {
		async fn inspect_role(&self, _role: &str) -> Result<RoleState> {
			Ok(RoleState::absent())
		}

		async fn inspect_grant(&self, _grantee: &str, _target: &GrantTarget) -> Result<GrantState> {
			Ok(GrantState::default())
		}

		async fn execute(&self, action: &Action) -> Result<()> {
			let name = match action {
				Action::DropRole { name } => name.clone(),
				other => other.to_string(),
			};
			if let Some(token) = &self.cancel_on_execute {
				token.cancel();
				std::future::pending::<()>().await;
			}
			if self.fail_on.as_deref() == Some(name.as_str()) {
				return Err(Error::execution(format!("{} failed (SQLSTATE 2BP01)", name)));
			}
			self.executed.lock().push(name);
			Ok(())
		}
	}

	fn drops(names: &[&str]) -> Vec<Action> {
		names
			.iter()
			.map(|name| Action::DropRole {
				name: name.to_string(),
			})
			.collect()
	}

	#[tokio::test]
	async fn test_runs_in_order() {
		let session = Recorder::default();
		let report = execute_plan(&session, &drops(&["a", "b", "c"]), &CancellationToken::new()).await;
		assert!(report.is_complete());
		assert_eq!(*session.executed.lock(), vec!["a", "b", "c"]);
	}

	#[tokio::test]
	async fn test_failure_stops_the_plan() {
		let session = Recorder {
			fail_on: Some("b".to_string()),
			..Default::default()
		};
		let report = execute_plan(&session, &drops(&["a", "b", "c"]), &CancellationToken::new()).await;
		assert_eq!(report.applied, 1);
		assert_eq!(report.total, 3);
		assert!(matches!(report.error, Some(Error::Execution(_))));
		assert_eq!(*session.executed.lock(), vec!["a"]);
	}

	#[tokio::test]
	async fn test_cancellation_aborts_in_flight_statement() {
		let token = CancellationToken::new();
		let session = Recorder {
			cancel_on_execute: Some(token.clone()),
			..Default::default()
		};
		let report = execute_plan(&session, &drops(&["a", "b"]), &token).await;
		assert_eq!(report.applied, 0);
		let error = report.into_result().unwrap_err();
		assert!(matches!(error, Error::ConnectionFailed(_)));
	}

	#[rstest]
	#[tokio::test]
	async fn test_cancelled_before_start() {
		let token = CancellationToken::new();
		token.cancel();
		let session = Recorder::default();
		let report = execute_plan(&session, &drops(&["a"]), &token).await;
		assert_eq!(report.applied, 0);
		assert!(session.executed.lock().is_empty());
	}
}
