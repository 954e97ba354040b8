//! # pgrole db
//!
//! PostgreSQL side of the pgrole reconciliation engine, built on `sqlx`.
//!
//! - [`PgConnector`]: pooled administrative connections keyed by
//!   endpoint, port, username and database
//! - [`PgSession`]: catalog introspection and statement execution on one pool
//! - [`sql`]: rendering of role and privilege statements with quoted
//!   identifiers and literals
//!
//! ## Feature Flags
//!
//! - `integration-tests`: enable the tests that start PostgreSQL in a container

pub mod config;
pub mod error;
pub mod introspect;
pub mod pool;
pub mod session;
pub mod sql;

pub use config::{APPLICATION_NAME, PoolConfig};
pub use pool::{PgConnector, PoolKey};
pub use session::PgSession;
