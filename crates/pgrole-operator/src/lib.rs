//! # pgrole operator
//!
//! Kubernetes adapter of the pgrole engine: the `Role` and `Grant` custom
//! resources, the API-backed [`KubeStore`] and the watch loops that feed the
//! engine's work queue.

pub mod crd;
pub mod store;
pub mod watch;

pub use crd::{Declared, Grant, GrantResourceSpec, ResourceStatus, Role, RoleResourceSpec};
pub use store::KubeStore;
