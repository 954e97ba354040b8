//! # pgrole engine
//!
//! Drives PostgreSQL roles and grants toward their declared state.
//!
//! A reconciliation pass fetches the resource, resolves its credentials,
//! inspects the database, [`plan`](planner)s the corrective actions and
//! [`execute`](executor)s them in order. The [`Controller`] records the
//! outcome as status conditions and decides when the resource is looked at
//! again; the [`WorkQueue`] schedules passes so that one resource is never
//! reconciled twice at the same time.
//!
//! With the `testing` feature, `memory` holds in-memory implementations of
//! every seam, used by the tests of this crate and of downstream adapters.

pub mod backoff;
pub mod config;
pub mod controller;
pub mod executor;
pub mod locks;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod planner;
pub mod queue;

pub use backoff::{Backoff, RetryStrategy};
pub use config::ControllerConfig;
pub use controller::{Controller, ReconcileOutcome, Reconciler};
pub use executor::{ExecutionReport, execute_plan};
pub use locks::KeyedLocks;
pub use planner::{plan_grant, plan_role};
pub use queue::WorkQueue;
