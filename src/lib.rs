//! # pgrole
//!
//! Declarative PostgreSQL role and grant reconciliation.
//!
//! pgrole compares the declared state of roles and grants with the live
//! database, computes the minimal corrective actions and applies them. The
//! facade re-exports the member crates:
//!
//! - [`core`]: declarative types, observed state, actions, conditions, errors
//!   and the seams every adapter implements
//! - [`engine`]: planner, executor, controller and work queue
//! - [`db`]: the sqlx-backed PostgreSQL connector (`postgres` feature)
//!
//! ## Feature Flags
//!
//! - `postgres` (default): include [`db`]
//! - `schema`: derive `schemars::JsonSchema` on the declarative types
//!
//! ## Quick Example
//!
//! ```rust
//! use pgrole::prelude::*;
//!
//! let desired = DesiredGrant::new(
//!     "app",
//!     GrantTarget::table("public", "orders"),
//!     [Privilege::Select, Privilege::Insert].into_iter().collect(),
//! );
//! let actual = GrantState::new([Privilege::Select].into_iter().collect());
//!
//! let plan = plan_grant(&desired, &actual);
//! assert_eq!(plan.len(), 1);
//! assert_eq!(plan[0].to_string(), "grant INSERT on table public.orders to app");
//! ```

pub use pgrole_core as core;
#[cfg(feature = "postgres")]
pub use pgrole_db as db;
pub use pgrole_engine as engine;

pub use pgrole_core::{Error, Result};

/// Commonly used types
pub mod prelude {
	pub use pgrole_core::{
		Action, Condition, ConditionType, Conditions, ConnectionParams, Connector, DesiredGrant,
		DesiredRole, Error, GrantScope, GrantSpec, GrantState, GrantTarget, Privilege,
		PrivilegeSet, ReconcileRequest, Result, RoleFlag, RolePrivileges, RoleSpec, RoleState,
		Session,
	};
	#[cfg(feature = "postgres")]
	pub use pgrole_db::{PgConnector, PoolConfig};
	pub use pgrole_engine::{
		Controller, ControllerConfig, ReconcileOutcome, RetryStrategy, WorkQueue, plan_grant,
		plan_role,
	};
}
