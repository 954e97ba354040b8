//! # pgrole core
//!
//! Shared vocabulary of the pgrole reconciliation engine.
//!
//! This crate has no knowledge of any orchestration platform or database driver.
//! It defines:
//!
//! - **Declarative types**: [`RoleSpec`], [`GrantSpec`] and the references they carry
//! - **Observed state**: [`RoleState`], [`GrantState`], [`PasswordVerifier`]
//! - **Actions**: the corrective [`Action`]s produced by the planner
//! - **Status**: [`Condition`]s and the bounded [`Conditions`] history
//! - **Errors**: the four-kind [`Error`] taxonomy used by every layer
//! - **Seams**: [`SecretStore`], [`StatusSink`], [`ResourceStore`], [`Connector`]
//!   and [`Session`], implemented by the database and platform adapters
//! - **Credentials**: [`CredentialResolver`] turning a secret reference into
//!   validated [`ConnectionParams`]
//!
//! ## Feature Flags
//!
//! - `schema`: derive `schemars::JsonSchema` on the declarative types

pub mod action;
pub mod condition;
pub mod credentials;
pub mod database;
pub mod error;
pub mod grant;
pub mod password;
pub mod resource;
pub mod role;
pub mod secret;
pub mod state;
pub mod store;

pub use action::{Action, RoleChange};
pub use condition::{
	Condition, ConditionStatus, ConditionType, Conditions, MAX_CONDITION_HISTORY, Reason,
};
pub use credentials::{ConnectionParams, CredentialResolver, SecretData, SslMode};
pub use database::{Connector, Session};
pub use error::{Error, Result};
pub use grant::{DesiredGrant, GrantScope, GrantSpec, GrantTarget, Privilege, PrivilegeSet};
pub use password::PasswordVerifier;
pub use resource::{
	FINALIZER, ReconcileRequest, Resource, ResourceId, ResourceKind, ResourceReference,
	SecretKeySelector,
};
pub use role::{DEFAULT_CONNECTION_LIMIT, DesiredRole, RoleFlag, RolePrivileges, RoleSpec};
pub use secret::SecretString;
pub use state::{GrantState, RoleState};
pub use store::{ResourceStore, SecretStore, StatusSink};
