//! Database access for the probes.
//!
//! Layout:
//! - `session.rs`: the `Connector`/`Session` seam the probe loop is written against
//! - `postgres.rs`: sqlx-backed implementation (one connection, no pool)
//! - `models.rs`: rows and facts read back from the node
//! - `schema.rs`: SQL text

pub mod models;
pub mod postgres;
pub mod schema;
pub mod session;

pub use models::{ReplicationInfo, ServerStatus};
pub use postgres::{PgConnector, PgSession};
pub use session::{Connector, Session};
