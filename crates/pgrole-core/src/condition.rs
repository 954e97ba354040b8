//! Status conditions
//!
//! Conditions are an append-only history on a resource's status. The last
//! entry is the current state; earlier entries are kept for diagnosis up to
//! [`MAX_CONDITION_HISTORY`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of conditions retained on a resource
pub const MAX_CONDITION_HISTORY: usize = 16;

/// Outcome category of a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub enum ConditionType {
	/// The database object was created
	Create,
	/// The database object already matched or was brought in line
	Sync,
	/// The pass failed
	Fail,
	/// The database object was removed
	Delete,
}

impl ConditionType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Create => "Create",
			Self::Sync => "Sync",
			Self::Fail => "Fail",
			Self::Delete => "Delete",
		}
	}
}

impl fmt::Display for ConditionType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub enum ConditionStatus {
	True,
	False,
	Unknown,
}

/// Machine-readable reason attached to a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub enum Reason {
	Created,
	Synced,
	Deleted,
	ResourceNotFound,
	ConnectionFailed,
	ValidationFailed,
	ExecutionFailed,
}

impl Reason {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Created => "Created",
			Self::Synced => "Synced",
			Self::Deleted => "Deleted",
			Self::ResourceNotFound => "ResourceNotFound",
			Self::ConnectionFailed => "ConnectionFailed",
			Self::ValidationFailed => "ValidationFailed",
			Self::ExecutionFailed => "ExecutionFailed",
		}
	}
}

impl fmt::Display for Reason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One entry of a resource's status history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct Condition {
	#[serde(rename = "type")]
	pub type_: ConditionType,
	pub status: ConditionStatus,
	pub reason: Reason,
	pub message: String,
	pub last_transition_time: DateTime<Utc>,
}

impl Condition {
	pub fn new(
		type_: ConditionType,
		status: ConditionStatus,
		reason: Reason,
		message: impl Into<String>,
	) -> Self {
		Self {
			type_,
			status,
			reason,
			message: message.into(),
			last_transition_time: Utc::now(),
		}
	}

	pub fn created(message: impl Into<String>) -> Self {
		Self::new(ConditionType::Create, ConditionStatus::True, Reason::Created, message)
	}

	pub fn synced(message: impl Into<String>) -> Self {
		Self::new(ConditionType::Sync, ConditionStatus::True, Reason::Synced, message)
	}

	pub fn deleted(message: impl Into<String>) -> Self {
		Self::new(ConditionType::Delete, ConditionStatus::True, Reason::Deleted, message)
	}

	pub fn failed(reason: Reason, message: impl Into<String>) -> Self {
		Self::new(ConditionType::Fail, ConditionStatus::False, reason, message)
	}

	pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
		self.last_transition_time = time;
		self
	}

	/// Same type, status, reason and message, ignoring the timestamp
	pub fn same_state(&self, other: &Condition) -> bool {
		self.type_ == other.type_
			&& self.status == other.status
			&& self.reason == other.reason
			&& self.message == other.message
	}
}

/// Bounded condition history
///
/// # Examples
///
/// ```
/// use pgrole_core::{Condition, Conditions};
///
/// let mut conditions = Conditions::default();
/// assert!(conditions.record(Condition::synced("role is in sync")));
/// assert!(!conditions.record(Condition::synced("role is in sync")));
/// assert_eq!(conditions.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
	pub fn new(conditions: Vec<Condition>) -> Self {
		Self(conditions)
	}

	/// Append a condition unless it repeats the current one
	///
	/// Returns whether the history changed. The oldest entries are dropped
	/// beyond [`MAX_CONDITION_HISTORY`].
	pub fn record(&mut self, condition: Condition) -> bool {
		if self.latest().is_some_and(|last| last.same_state(&condition)) {
			return false;
		}
		self.0.push(condition);
		if self.0.len() > MAX_CONDITION_HISTORY {
			let excess = self.0.len() - MAX_CONDITION_HISTORY;
			self.0.drain(..excess);
		}
		true
	}

	/// Append `batch` unless the history already ends with the same states
	///
	/// Conditions recorded together by one pass, such as a failure followed
	/// by `Delete/False`, are compared as a unit so that repeating the pass
	/// leaves the history untouched.
	pub fn record_all(&mut self, batch: Vec<Condition>) -> bool {
		if self.ends_with(&batch) {
			return false;
		}
		let mut changed = false;
		for condition in batch {
			changed |= self.record(condition);
		}
		changed
	}

	fn ends_with(&self, batch: &[Condition]) -> bool {
		!batch.is_empty()
			&& self.0.len() >= batch.len()
			&& self.0[self.0.len() - batch.len()..]
				.iter()
				.zip(batch)
				.all(|(recorded, condition)| recorded.same_state(condition))
	}

	pub fn latest(&self) -> Option<&Condition> {
		self.0.last()
	}

	/// Most recent condition of the given type
	pub fn latest_of(&self, type_: ConditionType) -> Option<&Condition> {
		self.0.iter().rev().find(|c| c.type_ == type_)
	}

	/// Whether the current state is a successful create or sync
	pub fn is_synced(&self) -> bool {
		matches!(
			self.latest(),
			Some(Condition {
				type_: ConditionType::Create | ConditionType::Sync,
				status: ConditionStatus::True,
				..
			})
		)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn as_slice(&self) -> &[Condition] {
		&self.0
	}

	pub fn into_inner(self) -> Vec<Condition> {
		self.0
	}
}

impl From<Vec<Condition>> for Conditions {
	fn from(conditions: Vec<Condition>) -> Self {
		Self(conditions)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_condition_serializes_with_type_key() {
		let time = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
			.unwrap()
			.with_timezone(&Utc);
		let condition = Condition::failed(Reason::ConnectionFailed, "dial tcp: refused").with_time(time);
		let value = serde_json::to_value(&condition).unwrap();
		assert_eq!(value["type"], "Fail");
		assert_eq!(value["status"], "False");
		assert_eq!(value["reason"], "ConnectionFailed");
		assert_eq!(value["lastTransitionTime"], "2024-05-01T10:00:00Z");
	}

	#[rstest]
	fn test_record_skips_identical_repeat() {
		let mut conditions = Conditions::default();
		assert!(conditions.record(Condition::failed(Reason::ConnectionFailed, "refused")));
		assert!(!conditions.record(Condition::failed(Reason::ConnectionFailed, "refused")));
		assert!(conditions.record(Condition::failed(Reason::ConnectionFailed, "timed out")));
		assert_eq!(conditions.len(), 2);
	}

	#[rstest]
	fn test_record_all_skips_repeated_batch() {
		let failure = || {
			vec![
				Condition::failed(Reason::ExecutionFailed, "2BP01"),
				Condition::new(
					ConditionType::Delete,
					ConditionStatus::False,
					Reason::ExecutionFailed,
					"2BP01",
				),
			]
		};
		let mut conditions = Conditions::default();
		conditions.record(Condition::synced("in sync"));
		assert!(conditions.record_all(failure()));
		assert!(!conditions.record_all(failure()));
		assert_eq!(conditions.len(), 3);

		assert!(conditions.record_all(vec![Condition::failed(Reason::ExecutionFailed, "other")]));
		assert!(conditions.record_all(failure()));
		assert_eq!(conditions.len(), 6);
	}

	#[rstest]
	fn test_history_is_bounded() {
		let mut conditions = Conditions::default();
		for i in 0..(MAX_CONDITION_HISTORY + 5) {
			conditions.record(Condition::failed(Reason::ExecutionFailed, format!("attempt {}", i)));
		}
		assert_eq!(conditions.len(), MAX_CONDITION_HISTORY);
		assert_eq!(conditions.as_slice()[0].message, "attempt 5");
		assert_eq!(
			conditions.latest().unwrap().message,
			format!("attempt {}", MAX_CONDITION_HISTORY + 4)
		);
	}

	#[rstest]
	fn test_is_synced_tracks_latest() {
		let mut conditions = Conditions::default();
		conditions.record(Condition::created("created"));
		assert!(conditions.is_synced());
		conditions.record(Condition::failed(Reason::ExecutionFailed, "boom"));
		assert!(!conditions.is_synced());
		assert_eq!(
			conditions.latest_of(ConditionType::Create).unwrap().reason,
			Reason::Created
		);
	}
}
